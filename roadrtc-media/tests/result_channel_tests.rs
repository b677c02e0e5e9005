//! Result channel tests
//!
//! The producer must never wait on the consumer; the consumer sees lists in
//! production order and drains them before observing the close.

use roadrtc_media::*;
use std::time::Duration;

fn list(sequence: u64) -> DetectionList {
    let detection = Detection::new(
        (sequence % LABELS.len() as u64) as usize,
        0.75,
        BoundingBox::new(0, 0, 32, 32),
    )
    .unwrap();
    DetectionList::new(sequence, sequence * 40, vec![detection])
}

// ============================================================================
// ORDERING AND BACKPRESSURE
// ============================================================================

#[tokio::test]
async fn test_enqueue_without_consumer_then_drain_in_order() {
    let (tx, mut rx) = ResultChannel::bounded(ResultChannelConfig {
        capacity: 16,
        overflow: OverflowPolicy::DropOldest,
    })
    .unwrap();

    // No consumer is polling; publishing must still return immediately
    for sequence in 0..16 {
        assert_eq!(tx.publish(list(sequence)), PublishOutcome::Queued);
    }

    for expected in 0..16 {
        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence, expected);
    }
    assert_eq!(rx.dropped(), 0);
}

#[test]
fn test_drop_oldest_keeps_newest_in_order() {
    let (tx, mut rx) = ResultChannel::bounded(ResultChannelConfig::default()).unwrap();

    for sequence in 0..20 {
        tx.publish(list(sequence));
    }

    let received: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|l| l.sequence)
        .collect();
    assert_eq!(received, (12..20).collect::<Vec<_>>());
    assert_eq!(tx.dropped(), 12);
}

#[test]
fn test_drop_newest_keeps_oldest_in_order() {
    let (tx, mut rx) = ResultChannel::bounded(ResultChannelConfig {
        capacity: 4,
        overflow: OverflowPolicy::DropNewest,
    })
    .unwrap();

    for sequence in 0..10 {
        let outcome = tx.publish(list(sequence));
        if sequence < 4 {
            assert_eq!(outcome, PublishOutcome::Queued);
        } else {
            assert_eq!(outcome, PublishOutcome::Discarded);
        }
    }

    let received: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|l| l.sequence)
        .collect();
    assert_eq!(received, vec![0, 1, 2, 3]);
}

// ============================================================================
// WAKEUPS, TIMEOUTS AND CLOSE
// ============================================================================

#[tokio::test]
async fn test_waiting_consumer_is_woken() {
    let (tx, mut rx) = ResultChannel::bounded(ResultChannelConfig::default()).unwrap();

    let consumer = tokio::spawn(async move { rx.recv().await.map(|l| l.sequence) });
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.publish(list(7));

    assert_eq!(consumer.await.unwrap(), Some(7));
}

#[tokio::test]
async fn test_recv_timeout_outcomes() {
    let (tx, mut rx) = ResultChannel::bounded(ResultChannelConfig::default()).unwrap();

    assert_eq!(
        rx.recv_timeout(Duration::from_millis(10)).await,
        RecvOutcome::Timeout
    );

    tx.publish(list(1));
    match rx.recv_timeout(Duration::from_millis(10)).await {
        RecvOutcome::Item(l) => assert_eq!(l.sequence, 1),
        other => panic!("expected item, got {:?}", other),
    }

    drop(tx);
    assert_eq!(
        rx.recv_timeout(Duration::from_millis(10)).await,
        RecvOutcome::Closed
    );
}

#[test]
fn test_queued_items_drain_before_close() {
    let (tx, mut rx) = ResultChannel::bounded(ResultChannelConfig::default()).unwrap();
    tx.publish(list(1));
    tx.publish(list(2));
    tx.close();

    assert_eq!(tx.publish(list(3)), PublishOutcome::Closed);
    assert_eq!(tokio_test::block_on(rx.recv()).map(|l| l.sequence), Some(1));
    assert_eq!(tokio_test::block_on(rx.recv()).map(|l| l.sequence), Some(2));
    assert_eq!(tokio_test::block_on(rx.recv()), None);
    assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
}

#[tokio::test]
async fn test_close_wakes_waiting_consumer() {
    let (tx, mut rx) = ResultChannel::latest_only();

    let consumer = tokio::spawn(async move { rx.recv().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(tx);

    let result = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .expect("consumer should observe the close")
        .unwrap();
    assert!(result.is_none());
}
