//! Relay selection tests
//!
//! Exercises NetworkPathSelector against an in-memory directory, and
//! HttpRelayDirectory against throwaway servers on the loopback interface.

use async_trait::async_trait;
use roadrtc_core::relay::{parse_candidates, parse_geo_map, select_closest};
use roadrtc_core::{
    Dataset, GeoPoint, HttpRelayDirectory, NetworkPathSelector, RelayDirectory,
    RelayDiscoveryConfig, RelayEndpoint, RelaySelectionError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// In-memory directory; a `None` body simulates a network failure
struct StaticDirectory {
    geo_map: Option<String>,
    caller: Option<String>,
    candidates: Option<String>,
    delay: Duration,
    fetches: AtomicUsize,
}

impl StaticDirectory {
    fn new(geo_map: &str, caller: &str, candidates: &str) -> Self {
        Self {
            geo_map: Some(geo_map.to_string()),
            caller: Some(caller.to_string()),
            candidates: Some(candidates.to_string()),
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RelayDirectory for StaticDirectory {
    async fn fetch(&self, dataset: Dataset) -> Result<String, RelaySelectionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let body = match dataset {
            Dataset::GeoMap => &self.geo_map,
            Dataset::CallerLocation => &self.caller,
            Dataset::Candidates => &self.candidates,
        };
        body.clone().ok_or_else(|| RelaySelectionError::Unavailable {
            dataset,
            reason: "connection refused".to_string(),
        })
    }
}

fn selector(directory: StaticDirectory) -> NetworkPathSelector {
    NetworkPathSelector::with_directory(Arc::new(directory), Duration::from_secs(2), None)
}

#[tokio::test]
async fn test_selects_only_located_candidate() {
    let directory = StaticDirectory::new(
        r#"{"1.2.3.4": [0, 0]}"#,
        r#"{"latitude": 0, "longitude": 0}"#,
        "1.2.3.4:3478\n5.6.7.8:3478\n",
    );

    let endpoint = selector(directory).select_relay_endpoint().await.unwrap();
    assert_eq!(endpoint.to_string(), "1.2.3.4:3478");
}

#[tokio::test]
async fn test_picks_nearest_relay() {
    // Caller in Sydney; relays in Tokyo, Singapore and Melbourne
    let directory = StaticDirectory::new(
        r#"{
            "10.0.0.1": [35.68, 139.69],
            "10.0.0.2": [1.35, 103.82],
            "10.0.0.3": [-37.81, 144.96]
        }"#,
        r#"{"latitude": -33.87, "longitude": 151.21}"#,
        "10.0.0.1:3478\n10.0.0.2:3478\n10.0.0.3:19302\n",
    );

    let endpoint = selector(directory).select_relay_endpoint().await.unwrap();
    assert_eq!(endpoint, RelayEndpoint::new("10.0.0.3", 19302));
}

#[tokio::test]
async fn test_ties_go_to_first_listed_candidate() {
    let directory = StaticDirectory::new(
        r#"{"10.0.0.1": [5, 5], "10.0.0.2": [5, 5]}"#,
        r#"{"latitude": 0, "longitude": 0}"#,
        "10.0.0.2:3478\n10.0.0.1:3478\n",
    );

    let endpoint = selector(directory).select_relay_endpoint().await.unwrap();
    assert_eq!(endpoint.host, "10.0.0.2");
}

#[tokio::test]
async fn test_candidate_fetch_failure_is_reported() {
    let mut directory = StaticDirectory::new(
        r#"{"1.2.3.4": [0, 0]}"#,
        r#"{"latitude": 0, "longitude": 0}"#,
        "",
    );
    directory.candidates = None;

    let err = selector(directory).select_relay_endpoint().await.unwrap_err();
    assert!(err.is_data_unavailable());
    assert!(matches!(
        err,
        RelaySelectionError::Unavailable {
            dataset: Dataset::Candidates,
            ..
        }
    ));
}

#[tokio::test]
async fn test_no_match_is_distinct_from_no_data() {
    let directory = StaticDirectory::new(
        r#"{"9.9.9.9": [0, 0]}"#,
        r#"{"latitude": 0, "longitude": 0}"#,
        "1.2.3.4:3478\n5.6.7.8:3478\n",
    );

    let err = selector(directory).select_relay_endpoint().await.unwrap_err();
    assert_eq!(err, RelaySelectionError::NoCandidateMatched { candidates: 2 });
    assert!(!err.is_data_unavailable());
}

#[tokio::test]
async fn test_malformed_caller_location_is_unavailable() {
    let directory = StaticDirectory::new(
        r#"{"1.2.3.4": [0, 0]}"#,
        r#"{"latitude": "Not found", "longitude": "Not found"}"#,
        "1.2.3.4:3478\n",
    );

    let err = selector(directory).select_relay_endpoint().await.unwrap_err();
    assert!(matches!(
        err,
        RelaySelectionError::Unavailable {
            dataset: Dataset::CallerLocation,
            ..
        }
    ));
}

#[tokio::test]
async fn test_hung_directory_times_out() {
    let mut directory = StaticDirectory::new(
        r#"{"1.2.3.4": [0, 0]}"#,
        r#"{"latitude": 0, "longitude": 0}"#,
        "1.2.3.4:3478\n",
    );
    directory.delay = Duration::from_secs(30);

    let selector =
        NetworkPathSelector::with_directory(Arc::new(directory), Duration::from_millis(50), None);
    let started = std::time::Instant::now();
    let err = selector.select_relay_endpoint().await.unwrap_err();

    assert!(err.is_data_unavailable());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cache_ttl_reuses_selection() {
    let directory = Arc::new(StaticDirectory::new(
        r#"{"1.2.3.4": [0, 0]}"#,
        r#"{"latitude": 0, "longitude": 0}"#,
        "1.2.3.4:3478\n",
    ));
    let selector = NetworkPathSelector::with_directory(
        directory.clone(),
        Duration::from_secs(2),
        Some(Duration::from_secs(60)),
    );

    let first = selector.select_relay_endpoint().await.unwrap();
    let second = selector.select_relay_endpoint().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(directory.fetches.load(Ordering::SeqCst), 3);
}

#[test]
fn test_selection_matches_brute_force_minimum() {
    let geo_map = parse_geo_map(
        r#"{
            "10.0.0.1": [48.85, 2.35],
            "10.0.0.2": [40.71, -74.0],
            "10.0.0.3": [-23.55, -46.63],
            "10.0.0.4": [55.75, 37.62],
            "10.0.0.5": [19.43, -99.13]
        }"#,
    )
    .unwrap();
    let candidates = parse_candidates(
        "10.0.0.1:3478\n10.0.0.2:3478\n10.0.0.3:3478\n10.0.0.4:3478\n10.0.0.5:3478\n10.0.0.6:3478\n",
    )
    .unwrap();

    let callers = [
        (51.5, -0.12),
        (34.05, -118.24),
        (-34.6, -58.38),
        (59.93, 30.33),
        (0.0, 0.0),
        (-89.0, 179.0),
    ];

    for (lat, lon) in callers {
        let caller = GeoPoint::new(lat, lon).unwrap();
        let selected = select_closest(&geo_map, caller, &candidates).unwrap();

        let best = candidates
            .iter()
            .filter_map(|c| geo_map.get(&c.host).map(|p| caller.haversine_km(p)))
            .fold(f64::INFINITY, f64::min);
        let selected_distance = caller.haversine_km(&geo_map[&selected.host]);

        assert_eq!(selected_distance, best);
        assert_ne!(selected.host, "10.0.0.6");
    }
}

#[test]
fn test_unlocated_candidates_never_selected() {
    let mut geo_map = HashMap::new();
    geo_map.insert("10.0.0.1".to_string(), GeoPoint::new(80.0, 170.0).unwrap());
    let candidates = vec![
        RelayEndpoint::new("10.0.0.9", 3478),
        RelayEndpoint::new("10.0.0.1", 3478),
    ];

    // The unlocated candidate must not win as if it were at distance zero
    let caller = GeoPoint::new(0.0, 0.0).unwrap();
    let selected = select_closest(&geo_map, caller, &candidates).unwrap();
    assert_eq!(selected.host, "10.0.0.1");
}

// ============================================================================
// HTTP directory
// ============================================================================

/// Config pointing every dataset at `addr`
fn local_config(addr: std::net::SocketAddr, request_timeout: Duration) -> RelayDiscoveryConfig {
    RelayDiscoveryConfig {
        geo_map_url: format!("http://{}/geo", addr),
        caller_location_url: format!("http://{}/caller", addr),
        candidates_url: format!("http://{}/candidates", addr),
        request_timeout,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_http_error_status_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 4096];
        let _ = stream.read(&mut request).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
    });

    let directory = HttpRelayDirectory::new(local_config(addr, Duration::from_secs(5))).unwrap();
    let err = directory.fetch(Dataset::Candidates).await.unwrap_err();

    match err {
        RelaySelectionError::Unavailable { dataset, reason } => {
            assert_eq!(dataset, Dataset::Candidates);
            assert!(reason.contains("503"), "{}", reason);
        }
        other => panic!("expected Unavailable, got {:?}", other),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn test_silent_server_hits_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept and hold the connection without ever answering
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    });

    let directory =
        HttpRelayDirectory::new(local_config(addr, Duration::from_millis(200))).unwrap();
    let started = std::time::Instant::now();
    let err = tokio::time::timeout(Duration::from_secs(2), directory.fetch(Dataset::GeoMap))
        .await
        .expect("request timeout did not fire")
        .unwrap_err();

    assert!(matches!(
        err,
        RelaySelectionError::Unavailable {
            dataset: Dataset::GeoMap,
            ..
        }
    ));
    assert!(started.elapsed() >= Duration::from_millis(150));
    server.abort();
}
