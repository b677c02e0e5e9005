//! Relay (STUN) endpoint discovery
//!
//! Picks the public relay closest to the caller so ICE negotiation has a
//! low-latency server reflexive path. Three datasets are combined:
//!
//! - a map of relay IP -> approximate `[latitude, longitude]`
//! - the caller's own approximate location
//! - the list of currently reachable `ip:port` relay candidates
//!
//! The closest candidate by great-circle distance wins. Candidates with no
//! known location are skipped rather than treated as zero distance.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Mean Earth radius used for haversine distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Which of the three discovery datasets an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    /// Relay IP -> coordinate map
    GeoMap,
    /// Caller's own coordinate
    CallerLocation,
    /// `ip:port` candidate list
    Candidates,
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dataset::GeoMap => "relay location map",
            Dataset::CallerLocation => "caller location",
            Dataset::Candidates => "relay candidate list",
        })
    }
}

/// Why no relay endpoint could be selected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelaySelectionError {
    /// A dataset could not be fetched or parsed
    #[error("{dataset} unavailable: {reason}")]
    Unavailable {
        /// Dataset that failed
        dataset: Dataset,
        /// Failure reason
        reason: String,
    },

    /// All data was available but no candidate has a known location
    #[error("none of {candidates} relay candidates has a known location")]
    NoCandidateMatched {
        /// Number of parsed candidates
        candidates: usize,
    },
}

impl RelaySelectionError {
    fn unavailable(dataset: Dataset, reason: impl Into<String>) -> Self {
        RelaySelectionError::Unavailable {
            dataset,
            reason: reason.into(),
        }
    }

    /// True when the failure means "no data", false for "no match"
    pub fn is_data_unavailable(&self) -> bool {
        matches!(self, RelaySelectionError::Unavailable { .. })
    }
}

/// A relay candidate, `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayEndpoint {
    /// Host or IP literal
    pub host: String,
    /// UDP port
    pub port: u16,
}

impl RelayEndpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// URL form used in ICE configuration
    pub fn ice_url(&self) -> String {
        format!("stun:{}", self)
    }
}

impl fmt::Display for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for RelayEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in {:?}", s))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("missing host in {:?}", s));
        }
        let port: u16 = port
            .parse()
            .map_err(|e| format!("bad port in {:?}: {}", s, e))?;
        if port == 0 {
            return Err(format!("port 0 in {:?}", s));
        }
        Ok(Self::new(host, port))
    }
}

/// Approximate geographic coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude in degrees, -90..=90
    pub latitude: f64,
    /// Longitude in degrees, -180..=180
    pub longitude: f64,
}

impl GeoPoint {
    /// Validated coordinate
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance in kilometres
    pub fn haversine_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }
}

fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse the relay location map: a JSON object of `ip -> [lat, lon]`.
///
/// Entries whose coordinates are not numeric are skipped.
pub fn parse_geo_map(body: &str) -> Result<HashMap<String, GeoPoint>, RelaySelectionError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| RelaySelectionError::unavailable(Dataset::GeoMap, e.to_string()))?;
    let entries = value
        .as_object()
        .ok_or_else(|| RelaySelectionError::unavailable(Dataset::GeoMap, "not a JSON object"))?;

    let mut map = HashMap::with_capacity(entries.len());
    for (ip, coords) in entries {
        let point = match coords.as_array().map(Vec::as_slice) {
            Some([lat, lon, ..]) => coordinate(lat)
                .zip(coordinate(lon))
                .and_then(|(lat, lon)| GeoPoint::new(lat, lon)),
            _ => None,
        };
        match point {
            Some(point) => {
                map.insert(ip.clone(), point);
            }
            None => warn!("Skipping relay {} with malformed coordinates {}", ip, coords),
        }
    }

    if map.is_empty() {
        return Err(RelaySelectionError::unavailable(
            Dataset::GeoMap,
            "no usable entries",
        ));
    }
    Ok(map)
}

/// Parse the caller location: `{"latitude": .., "longitude": ..}`
pub fn parse_caller_location(body: &str) -> Result<GeoPoint, RelaySelectionError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| RelaySelectionError::unavailable(Dataset::CallerLocation, e.to_string()))?;

    let lat = value.get("latitude").and_then(coordinate);
    let lon = value.get("longitude").and_then(coordinate);
    lat.zip(lon)
        .and_then(|(lat, lon)| GeoPoint::new(lat, lon))
        .ok_or_else(|| {
            RelaySelectionError::unavailable(
                Dataset::CallerLocation,
                format!("missing or non-numeric coordinates in {}", value),
            )
        })
}

/// Parse the newline-delimited candidate list, skipping unparsable lines
pub fn parse_candidates(body: &str) -> Result<Vec<RelayEndpoint>, RelaySelectionError> {
    let candidates: Vec<RelayEndpoint> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.parse() {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!("Skipping relay candidate: {}", e);
                None
            }
        })
        .collect();

    if candidates.is_empty() {
        return Err(RelaySelectionError::unavailable(
            Dataset::Candidates,
            "no parsable candidates",
        ));
    }
    Ok(candidates)
}

/// Pick the candidate closest to `caller`.
///
/// Only candidates whose host appears in `geo_map` are considered. Ties go to
/// the candidate listed first.
pub fn select_closest(
    geo_map: &HashMap<String, GeoPoint>,
    caller: GeoPoint,
    candidates: &[RelayEndpoint],
) -> Result<RelayEndpoint, RelaySelectionError> {
    let mut best: Option<(&RelayEndpoint, f64)> = None;

    for candidate in candidates {
        let Some(location) = geo_map.get(&candidate.host) else {
            continue;
        };
        let distance = caller.haversine_km(location);
        if best.map_or(true, |(_, best_distance)| distance < best_distance) {
            best = Some((candidate, distance));
        }
    }

    match best {
        Some((endpoint, distance)) => {
            debug!("Closest relay {} at {:.0} km", endpoint, distance);
            Ok(endpoint.clone())
        }
        None => Err(RelaySelectionError::NoCandidateMatched {
            candidates: candidates.len(),
        }),
    }
}

/// Source of the three discovery datasets, as raw response bodies
#[async_trait]
pub trait RelayDirectory: Send + Sync {
    /// Fetch one dataset
    async fn fetch(&self, dataset: Dataset) -> Result<String, RelaySelectionError>;
}

/// Relay discovery configuration
#[derive(Debug, Clone)]
pub struct RelayDiscoveryConfig {
    /// URL of the relay location map
    pub geo_map_url: String,
    /// URL of the caller geolocation lookup
    pub caller_location_url: String,
    /// URL of the candidate list
    pub candidates_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Deadline for the whole selection
    pub overall_timeout: Duration,
    /// Reuse the last selection for this long (None = always re-derive)
    pub cache_ttl: Option<Duration>,
}

impl Default for RelayDiscoveryConfig {
    fn default() -> Self {
        Self {
            geo_map_url:
                "https://raw.githubusercontent.com/pradt2/always-online-stun/master/geoip_cache.txt"
                    .to_string(),
            caller_location_url: "https://geolocation-db.com/json".to_string(),
            candidates_url:
                "https://raw.githubusercontent.com/pradt2/always-online-stun/master/valid_ipv4s.txt"
                    .to_string(),
            request_timeout: Duration::from_secs(5),
            overall_timeout: Duration::from_secs(8),
            cache_ttl: None,
        }
    }
}

impl RelayDiscoveryConfig {
    fn url(&self, dataset: Dataset) -> &str {
        match dataset {
            Dataset::GeoMap => &self.geo_map_url,
            Dataset::CallerLocation => &self.caller_location_url,
            Dataset::Candidates => &self.candidates_url,
        }
    }
}

/// Fetches the discovery datasets over HTTP
#[derive(Debug, Clone)]
pub struct HttpRelayDirectory {
    client: reqwest::Client,
    config: RelayDiscoveryConfig,
}

impl HttpRelayDirectory {
    /// Build a client with the configured request timeout
    pub fn new(config: RelayDiscoveryConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl RelayDirectory for HttpRelayDirectory {
    async fn fetch(&self, dataset: Dataset) -> Result<String, RelaySelectionError> {
        let url = self.config.url(dataset);
        debug!("Fetching {} from {}", dataset, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RelaySelectionError::unavailable(dataset, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelaySelectionError::unavailable(
                dataset,
                format!("HTTP {}", status),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| RelaySelectionError::unavailable(dataset, e.to_string()))
    }
}

/// Selects the relay endpoint for new sessions
#[derive(Clone)]
pub struct NetworkPathSelector {
    directory: Arc<dyn RelayDirectory>,
    overall_timeout: Duration,
    cache_ttl: Option<Duration>,
    cached: Arc<Mutex<Option<(RelayEndpoint, Instant)>>>,
}

impl fmt::Debug for NetworkPathSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkPathSelector")
            .field("overall_timeout", &self.overall_timeout)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl NetworkPathSelector {
    /// Selector backed by HTTP discovery
    pub fn new(config: RelayDiscoveryConfig) -> Result<Self, reqwest::Error> {
        let overall_timeout = config.overall_timeout;
        let cache_ttl = config.cache_ttl;
        let directory = HttpRelayDirectory::new(config)?;
        Ok(Self::with_directory(
            Arc::new(directory),
            overall_timeout,
            cache_ttl,
        ))
    }

    /// Selector backed by an arbitrary directory
    pub fn with_directory(
        directory: Arc<dyn RelayDirectory>,
        overall_timeout: Duration,
        cache_ttl: Option<Duration>,
    ) -> Self {
        Self {
            directory,
            overall_timeout,
            cache_ttl,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolve the closest relay endpoint
    pub async fn select_relay_endpoint(&self) -> Result<RelayEndpoint, RelaySelectionError> {
        if let Some(endpoint) = self.cached_endpoint() {
            debug!("Using cached relay {}", endpoint);
            return Ok(endpoint);
        }

        let started = Instant::now();
        let endpoint = tokio::time::timeout(self.overall_timeout, self.discover())
            .await
            .map_err(|_| {
                RelaySelectionError::unavailable(
                    Dataset::Candidates,
                    format!("discovery timed out after {:?}", self.overall_timeout),
                )
            })??;

        info!(
            "Selected relay {} in {:?}",
            endpoint,
            started.elapsed()
        );
        if self.cache_ttl.is_some() {
            *self.cached.lock() = Some((endpoint.clone(), Instant::now()));
        }
        Ok(endpoint)
    }

    async fn discover(&self) -> Result<RelayEndpoint, RelaySelectionError> {
        let (geo_map, caller, candidates) = futures::try_join!(
            self.directory.fetch(Dataset::GeoMap),
            self.directory.fetch(Dataset::CallerLocation),
            self.directory.fetch(Dataset::Candidates),
        )?;

        let geo_map = parse_geo_map(&geo_map)?;
        let caller = parse_caller_location(&caller)?;
        let candidates = parse_candidates(&candidates)?;
        debug!(
            "Relay discovery: {} located relays, {} candidates",
            geo_map.len(),
            candidates.len()
        );

        select_closest(&geo_map, caller, &candidates)
    }

    fn cached_endpoint(&self) -> Option<RelayEndpoint> {
        let ttl = self.cache_ttl?;
        let mut cached = self.cached.lock();
        match cached.as_ref() {
            Some((endpoint, at)) if at.elapsed() < ttl => Some(endpoint.clone()),
            Some(_) => {
                *cached = None;
                None
            }
            None => None,
        }
    }
}
