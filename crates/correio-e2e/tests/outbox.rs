mod helpers;

use std::time::Duration;

use correio_core::{ConsumerRegistry, DataStorage, MessageDirection, StatusName};
use helpers::{fast_config, wait_until, TestApp};
use serde::Serialize;

#[derive(Serialize)]
struct OrderCreated {
    id: u32,
}

#[tokio::test]
async fn published_message_reaches_broker_and_succeeds() {
    let app = TestApp::start(fast_config(), ConsumerRegistry::empty());

    let envelope = app
        .server
        .publisher()
        .publish("order.created", &OrderCreated { id: 1 })
        .await
        .unwrap();
    assert_eq!(envelope.status, StatusName::Scheduled);

    let storage = app.storage.clone();
    let id = envelope.id.clone();
    wait_until("publish to reach Succeeded", || {
        let storage = storage.clone();
        let id = id.clone();
        async move {
            storage
                .get_message(MessageDirection::Publish, &id)
                .await
                .unwrap()
                .is_some_and(|m| m.status == StatusName::Succeeded)
        }
    })
    .await;

    let sent = app.broker.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].name(), Some("order.created"));
    assert_eq!(sent[0].id(), Some(envelope.id.as_str()));

    app.server.shutdown().await;
}

#[tokio::test]
async fn rolled_back_transaction_publishes_nothing() {
    let app = TestApp::start(fast_config(), ConsumerRegistry::empty());
    let publisher = app.server.publisher();

    // The outbox write shares the caller's transaction: business change and
    // message stand or fall together.
    let mut tx = app.storage.begin().await.unwrap();
    let envelope = publisher
        .publish_in("order.created", &OrderCreated { id: 1 }, tx.as_mut())
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert!(app
        .storage
        .get_message(MessageDirection::Publish, &envelope.id)
        .await
        .unwrap()
        .is_none());

    // Even after sweep passes there is nothing to forward
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(app.broker.sent().await.is_empty());

    app.server.shutdown().await;
}

#[tokio::test]
async fn committed_outbox_row_is_forwarded_by_the_sweeper() {
    let app = TestApp::start(fast_config(), ConsumerRegistry::empty());
    let publisher = app.server.publisher();

    // Commit without flushing: the sweeper alone must deliver it
    let mut tx = app.storage.begin().await.unwrap();
    let envelope = publisher
        .publish_in("order.created", &OrderCreated { id: 2 }, tx.as_mut())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let storage = app.storage.clone();
    let id = envelope.id.clone();
    wait_until("sweeper to forward the committed row", || {
        let storage = storage.clone();
        let id = id.clone();
        async move {
            storage
                .get_message(MessageDirection::Publish, &id)
                .await
                .unwrap()
                .is_some_and(|m| m.status == StatusName::Succeeded)
        }
    })
    .await;

    let stored = app
        .storage
        .get_message(MessageDirection::Publish, &envelope.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.retries, 1, "one sweeper re-entry delivered it");

    app.server.shutdown().await;
}

#[tokio::test]
async fn delayed_publish_waits_for_due_time() {
    let app = TestApp::start(fast_config(), ConsumerRegistry::empty());

    app.server
        .publisher()
        .publish_delayed(
            "order.created",
            &OrderCreated { id: 3 },
            Duration::from_millis(200),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        app.broker.sent().await.is_empty(),
        "nothing on the wire before the due time"
    );

    let broker = app.broker.clone();
    wait_until("delayed message to be sent", || {
        let broker = broker.clone();
        async move { !broker.sent().await.is_empty() }
    })
    .await;

    app.server.shutdown().await;
}
