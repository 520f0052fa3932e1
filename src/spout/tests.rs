use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use super::collector::{ChannelCollector, Collector, Emitted, Tuple};
use super::tracker::{FailureOutcome, FailureTracker};
use super::{RedeliverySpout, Spout, SpoutContext};
use crate::config::BrokerSettings;
use crate::consumer::memory::ClientStatus;
use crate::consumer::{BrokerClient, MemoryBroker};
use crate::message::MessageRecord;
use crate::utils::error::{ClientError, EmitError, SpoutError};

/// Channel collector that can be told to reject every emit.
struct FlakyCollector {
    inner: ChannelCollector,
    reject: AtomicBool,
}

impl Collector for FlakyCollector {
    fn emit(&self, tuple: Tuple, msg_id: &str) -> Result<(), EmitError> {
        if self.reject.load(Ordering::Acquire) {
            return Err(EmitError::Rejected("host busy".to_string()));
        }
        self.inner.emit(tuple, msg_id)
    }
}

fn settings(max_fail_times: i32) -> BrokerSettings {
    BrokerSettings {
        topic: "orders".to_string(),
        max_fail_times,
        consume_message_batch_max_size: 2,
        ..BrokerSettings::default()
    }
}

fn open_spout(
    max_fail_times: i32,
) -> (
    RedeliverySpout<MemoryBroker>,
    MemoryBroker,
    UnboundedReceiver<Emitted>,
) {
    let broker = MemoryBroker::new();
    let (collector, rx) = ChannelCollector::new();
    let spout = RedeliverySpout::new(broker.clone(), settings(max_fail_times), Arc::new(collector));
    spout.open(&SpoutContext { task_id: 3 }).unwrap();
    (spout, broker, rx)
}

fn drain(rx: &mut UnboundedReceiver<Emitted>) -> Vec<Emitted> {
    let mut out = Vec::new();
    while let Ok(emitted) = rx.try_recv() {
        out.push(emitted);
    }
    out
}

#[test]
fn test_open_sets_instance_name_from_task() {
    let (spout, broker, _rx) = open_spout(3);
    let options = broker.options().unwrap();
    assert_eq!(options.instance_name, "3");
    assert_eq!(spout.consumer().unwrap().options(), &options);
    assert_eq!(broker.status(), ClientStatus::Running);
}

#[test]
fn test_open_twice_is_rejected() {
    let (spout, _broker, _rx) = open_spout(3);
    assert!(matches!(
        spout.open(&SpoutContext { task_id: 4 }),
        Err(SpoutError::AlreadyOpen)
    ));
}

#[test]
fn test_open_surfaces_client_init_failure() {
    let broker = MemoryBroker::new();
    broker.refuse_connections(true);
    let (collector, _rx) = ChannelCollector::new();
    let spout = RedeliverySpout::new(broker, settings(3), Arc::new(collector));

    assert!(matches!(
        spout.open(&SpoutContext { task_id: 1 }),
        Err(SpoutError::ClientInit(_))
    ));
    assert!(spout.consumer().is_none());
}

#[test]
fn test_open_shuts_down_consumer_that_fails_to_start() {
    let broker = MemoryBroker::new();
    // already running, so the consumer's start is rejected
    BrokerClient::start(&broker).unwrap();
    let (collector, _rx) = ChannelCollector::new();
    let spout = RedeliverySpout::new(broker.clone(), settings(3), Arc::new(collector));

    assert!(matches!(
        spout.open(&SpoutContext { task_id: 1 }),
        Err(SpoutError::ClientInit(ClientError::InvalidState(_)))
    ));
    assert!(spout.consumer().is_none());
    assert_eq!(broker.status(), ClientStatus::Shutdown);
    assert!(broker.listener_capability().is_none());

    // the failed open is not mistaken for a running one
    assert!(matches!(
        spout.open(&SpoutContext { task_id: 1 }),
        Err(SpoutError::ClientInit(_))
    ));
}

#[test]
fn test_declared_fields_and_config() {
    let (spout, _broker, _rx) = open_spout(3);
    assert_eq!(spout.declare_output_fields().names(), ["message", "stat"]);
    assert!(spout.component_config().is_none());
}

#[test]
fn test_delivery_batch_emits_untracked_tuples() {
    let (spout, broker, mut rx) = open_spout(3);

    spout.deactivate();
    let m3 = broker.publish("orders", None, "m3");
    let m4 = broker.publish("orders", None, "m4");
    spout.activate();

    let emitted = drain(&mut rx);
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].msg_id, m3);
    assert_eq!(emitted[1].msg_id, m4);
    for e in &emitted {
        assert_eq!(e.msg_id, e.tuple.message.msg_id);
        assert_eq!(e.tuple.stat.failure_times(), 0);
    }
    // accepted: nothing parked for broker-level redelivery
    assert_eq!(broker.reconsume_len(), 0);
    assert_eq!(spout.pending_failures(), 0);
}

#[test]
fn test_emit_failure_asks_broker_to_reconsume() {
    let (spout, broker, rx) = open_spout(3);
    drop(rx);

    broker.publish("orders", None, "lost");
    assert_eq!(broker.reconsume_len(), 1);
    assert_eq!(spout.pending_failures(), 0);
}

#[tokio::test]
async fn test_first_failure_fetches_and_queues() {
    let (spout, broker, _rx) = open_spout(0);
    let m2 = broker.publish("orders", None, "m2");

    spout.fail(&m2).await;

    assert_eq!(broker.fetch_count(), 1);
    assert!(spout.is_tracked(&m2));
    assert_eq!(spout.failure_times(&m2), Some(0));
    assert_eq!(spout.queued_retries(), 1);

    // with a zero ceiling the next failure gives up
    spout.fail(&m2).await;
    assert!(!spout.is_tracked(&m2));
    assert_eq!(spout.queued_retries(), 1);
    assert_eq!(broker.fetch_count(), 1);
}

#[tokio::test]
async fn test_ceiling_of_three() {
    let (spout, broker, _rx) = open_spout(3);
    let m1 = broker.publish("orders", None, "m1");

    for _ in 0..3 {
        spout.fail(&m1).await;
    }
    assert!(spout.is_tracked(&m1));
    assert_eq!(spout.failure_times(&m1), Some(2));
    assert_eq!(spout.queued_retries(), 3);

    spout.fail(&m1).await;
    assert!(!spout.is_tracked(&m1));
    assert_eq!(spout.queued_retries(), 3);

    // abandoned records are never re-emitted, only skipped
    let next = tokio::time::timeout(Duration::from_millis(50), spout.next_tuple()).await;
    assert!(next.is_err());
    assert_eq!(spout.queued_retries(), 0);
}

#[tokio::test]
async fn test_bounded_retry_for_several_ceilings() {
    for ceiling in 1..=4 {
        let (spout, broker, _rx) = open_spout(ceiling);
        let id = broker.publish("orders", None, "bounded");

        for call in 1..=ceiling {
            spout.fail(&id).await;
            assert_eq!(spout.queued_retries(), call as usize);
            assert!(spout.is_tracked(&id));
        }
        spout.fail(&id).await;
        assert!(!spout.is_tracked(&id));
        assert_eq!(spout.queued_retries(), ceiling as usize);
    }
}

#[tokio::test]
async fn test_negative_ceiling_always_requeues() {
    let (spout, broker, _rx) = open_spout(-1);
    let id = broker.publish("orders", None, "forever");

    for _ in 0..50 {
        spout.fail(&id).await;
    }
    assert!(spout.is_tracked(&id));
    assert_eq!(spout.queued_retries(), 50);
    assert_eq!(spout.failure_times(&id), Some(49));
}

#[tokio::test]
async fn test_ack_is_idempotent() {
    let (spout, broker, _rx) = open_spout(3);
    spout.ack("never-seen");
    assert_eq!(spout.pending_failures(), 0);

    let id = broker.publish("orders", None, "acked");
    spout.fail(&id).await;
    spout.ack(&id);
    spout.ack(&id);
    assert!(!spout.is_tracked(&id));

    // a later failure starts over with a new fetch
    spout.fail(&id).await;
    assert_eq!(broker.fetch_count(), 2);
    assert_eq!(spout.failure_times(&id), Some(0));
}

#[tokio::test]
async fn test_drain_reemits_with_same_id_and_elapsed_time() {
    let (spout, broker, mut rx) = open_spout(3);
    let id = broker.publish("orders", None, "retry me");
    drain(&mut rx);

    spout.fail(&id).await;
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert!(spout.next_tuple().await);

    let emitted = drain(&mut rx);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].msg_id, id);
    assert_eq!(emitted[0].tuple.message.body_lossy(), "retry me");
    assert!(emitted[0].tuple.stat.elapsed_ms() >= 20);
    assert_eq!(spout.queued_retries(), 0);
    // still tracked, awaiting the outcome of the re-emission
    assert!(spout.is_tracked(&id));

    spout.fail(&id).await;
    assert!(spout.next_tuple().await);
    let emitted = drain(&mut rx);
    assert_eq!(emitted[0].tuple.stat.failure_times(), 1);
}

#[tokio::test]
async fn test_acked_record_is_skipped_by_drain() {
    let (spout, broker, mut rx) = open_spout(3);
    let acked = broker.publish("orders", None, "acked");
    let kept = broker.publish("orders", None, "kept");
    drain(&mut rx);

    spout.fail(&acked).await;
    spout.fail(&kept).await;
    spout.ack(&acked);

    assert!(spout.next_tuple().await);
    let emitted = drain(&mut rx);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].msg_id, kept);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_failures_fetch_once() {
    let (spout, broker, _rx) = open_spout(-1);
    let spout = Arc::new(spout);
    let id = broker.publish("orders", None, "raced");
    broker.set_fetch_delay(Duration::from_millis(30));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let spout = spout.clone();
            let id = id.clone();
            tokio::spawn(async move { spout.fail(&id).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(broker.fetch_count(), 1);
    assert_eq!(spout.pending_failures(), 1);
    assert_eq!(spout.failure_times(&id), Some(15));
    assert_eq!(spout.queued_retries(), 16);
}

#[tokio::test]
async fn test_fetch_failure_leaves_id_untracked() {
    let (spout, broker, _rx) = open_spout(3);
    let id = broker.publish("orders", None, "flaky");

    broker.fail_fetches(true);
    spout.fail(&id).await;
    assert!(!spout.is_tracked(&id));
    assert_eq!(spout.queued_retries(), 0);

    broker.fail_fetches(false);
    spout.fail(&id).await;
    assert!(spout.is_tracked(&id));
    assert_eq!(broker.fetch_count(), 2);
}

#[tokio::test]
async fn test_waiter_skips_fetch_after_shared_fetch_fails() {
    let tracker = FailureTracker::new(3);
    let second_fetches = AtomicUsize::new(0);

    let first = tracker.fail("m1", || async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Err(ClientError::Unavailable("broker".to_string()))
    });
    let second = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        tracker
            .fail("m1", || async {
                second_fetches.fetch_add(1, Ordering::SeqCst);
                Ok(MessageRecord::new("m1", "orders", vec![]))
            })
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(matches!(
        first,
        FailureOutcome::FetchFailed(ClientError::Unavailable(_))
    ));
    assert!(matches!(second, FailureOutcome::Released));
    assert_eq!(second_fetches.load(Ordering::SeqCst), 0);
    assert!(!tracker.is_tracked("m1"));
    assert_eq!(tracker.queued(), 0);
}

#[tokio::test]
async fn test_unknown_message_is_not_tracked() {
    let (spout, _broker, _rx) = open_spout(3);
    spout.fail("does-not-exist").await;
    assert_eq!(spout.pending_failures(), 0);
}

#[tokio::test]
async fn test_fail_before_open_is_ignored() {
    let broker = MemoryBroker::new();
    let (collector, _rx) = ChannelCollector::new();
    let spout = RedeliverySpout::new(broker.clone(), settings(3), Arc::new(collector));

    spout.fail("m").await;
    assert_eq!(spout.pending_failures(), 0);
    assert_eq!(broker.fetch_count(), 0);
}

#[tokio::test]
async fn test_failed_reemit_is_requeued() {
    let broker = MemoryBroker::new();
    let (inner, mut rx) = ChannelCollector::new();
    let collector = Arc::new(FlakyCollector {
        inner,
        reject: AtomicBool::new(false),
    });
    let spout = RedeliverySpout::new(broker.clone(), settings(3), collector.clone());
    spout.open(&SpoutContext { task_id: 9 }).unwrap();
    let id = broker.publish("orders", None, "busy");
    drain(&mut rx);

    spout.fail(&id).await;
    collector.reject.store(true, Ordering::Release);
    assert!(!spout.next_tuple().await);
    assert_eq!(spout.queued_retries(), 1);

    collector.reject.store(false, Ordering::Release);
    assert!(spout.next_tuple().await);
    assert_eq!(drain(&mut rx)[0].msg_id, id);
}

#[tokio::test]
async fn test_close_wakes_blocked_drain() {
    let (spout, broker, _rx) = open_spout(3);
    let spout = Arc::new(spout);

    let waiting = {
        let spout = spout.clone();
        tokio::spawn(async move { spout.next_tuple().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    spout.close();

    let emitted = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .expect("drain did not return after close")
        .unwrap();
    assert!(!emitted);
    assert!(spout.is_closed());
    assert_eq!(broker.status(), ClientStatus::Shutdown);

    // later calls return at once
    assert!(!spout.next_tuple().await);
}

#[tokio::test]
async fn test_close_keeps_pending_records_visible() {
    let (spout, broker, _rx) = open_spout(3);
    let id = broker.publish("orders", None, "pending");
    spout.fail(&id).await;

    spout.close();
    assert!(spout.is_tracked(&id));
    assert_eq!(spout.pending_failures(), 1);
}

#[tokio::test]
async fn test_pause_stops_new_deliveries_but_not_retries() {
    let (spout, broker, mut rx) = open_spout(3);
    let failed = broker.publish("orders", None, "failed");
    drain(&mut rx);
    spout.fail(&failed).await;

    spout.deactivate();
    assert_eq!(broker.status(), ClientStatus::Suspended);
    let held = broker.publish("orders", None, "held");
    assert!(drain(&mut rx).is_empty());

    assert!(spout.next_tuple().await);
    let emitted = drain(&mut rx);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].msg_id, failed);
    assert!(spout.is_tracked(&failed));

    spout.activate();
    let emitted = drain(&mut rx);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].msg_id, held);
}
