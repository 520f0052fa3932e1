use std::sync::Arc;
use std::time::Duration;

use spoutbridge::config::BrokerSettings;
use spoutbridge::consumer::MemoryBroker;
use spoutbridge::spout::{ChannelCollector, RedeliverySpout, Spout, SpoutContext};

#[tokio::test]
async fn host_loop_acks_after_one_retry() {
    let broker = MemoryBroker::new();
    let (collector, mut emitted) = ChannelCollector::new();
    let settings = BrokerSettings {
        topic: "payments".to_string(),
        topic_tag: "card".to_string(),
        max_fail_times: 2,
        ..BrokerSettings::default()
    };
    let spout = Arc::new(RedeliverySpout::new(
        broker.clone(),
        settings,
        Arc::new(collector),
    ));
    spout.open(&SpoutContext { task_id: 5 }).unwrap();

    let puller = {
        let spout = spout.clone();
        tokio::spawn(async move {
            let mut reemitted = 0;
            while spout.next_tuple().await {
                reemitted += 1;
            }
            reemitted
        })
    };

    let card = broker.publish("payments", Some("card"), "charge");
    broker.publish("payments", Some("wire"), "ignored");

    let first = emitted.recv().await.unwrap();
    assert_eq!(first.msg_id, card);
    spout.fail(&first.msg_id).await;

    let second = tokio::time::timeout(Duration::from_secs(1), emitted.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.msg_id, card);
    assert_eq!(second.tuple.message.body_lossy(), "charge");
    spout.ack(&second.msg_id);

    assert_eq!(spout.pending_failures(), 0);
    assert_eq!(broker.fetch_count(), 1);

    spout.close();
    assert_eq!(puller.await.unwrap(), 1);
    assert!(emitted.try_recv().is_err());
}

#[tokio::test]
async fn message_is_abandoned_after_ceiling() {
    let broker = MemoryBroker::new();
    let (collector, mut emitted) = ChannelCollector::new();
    let settings = BrokerSettings {
        max_fail_times: 1,
        ..BrokerSettings::default()
    };
    let spout = RedeliverySpout::new(broker.clone(), settings, Arc::new(collector));
    spout.open(&SpoutContext { task_id: 1 }).unwrap();

    let id = broker.publish("spout_topic", None, "doomed");
    assert_eq!(emitted.recv().await.unwrap().msg_id, id);

    spout.fail(&id).await;
    assert!(spout.next_tuple().await);
    let retry = emitted.recv().await.unwrap();
    assert_eq!(retry.msg_id, id);

    spout.fail(&id).await;
    assert!(!spout.is_tracked(&id));
    spout.close();
}
