mod helpers;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use correio_core::{
    ConsumerContext, ConsumerRegistryBuilder, CorreioConfig, DataStorage, MessageDirection,
    StatusName,
};
use helpers::{fast_config, wait_until, TestApp};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct OrderCreated {
    id: u32,
}

fn resolved(group: &str, config: &CorreioConfig) -> String {
    format!("{group}.{}", config.group.version)
}

#[tokio::test]
async fn subscriber_executes_and_commits_after_transition() {
    let config = fast_config();
    let seen = Arc::new(AtomicU32::new(0));
    let handler_seen = Arc::clone(&seen);

    let registry = ConsumerRegistryBuilder::new()
        .subscribe("orders", move |ctx: ConsumerContext| {
            let seen = Arc::clone(&handler_seen);
            async move {
                let order: OrderCreated = ctx.body()?;
                assert_eq!(order.id, 7);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build(&config.group)
        .unwrap();

    let app = TestApp::start(config.clone(), registry);
    let group = resolved(&config.group.default_group, &config);
    app.wait_subscribed(&[group.clone()]).await;

    let envelope = app
        .server
        .publisher()
        .publish("orders", &OrderCreated { id: 7 })
        .await
        .unwrap();

    let storage = app.storage.clone();
    let id = envelope.id.clone();
    wait_until("inbound envelope to reach Succeeded", || {
        let storage = storage.clone();
        let id = id.clone();
        async move {
            storage
                .get_message(MessageDirection::Subscribe, &id)
                .await
                .unwrap()
                .is_some_and(|m| m.status == StatusName::Succeeded)
        }
    })
    .await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    // Commit-before-ack ordering: the ack arrived only after the persisted
    // transition above was observable.
    assert_eq!(app.broker.committed(&group).await.len(), 1);
    assert!(app.broker.rejected(&group).await.is_empty());

    app.server.shutdown().await;
}

#[tokio::test]
async fn topic_fans_out_to_every_subscribed_group() {
    let config = fast_config();
    let billing_seen = Arc::new(AtomicU32::new(0));
    let shipping_seen = Arc::new(AtomicU32::new(0));
    let billing_handler = Arc::clone(&billing_seen);
    let shipping_handler = Arc::clone(&shipping_seen);

    let registry = ConsumerRegistryBuilder::new()
        .subscribe_group("orders", "billing", move |_ctx| {
            let seen = Arc::clone(&billing_handler);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .subscribe_group("orders", "shipping", move |_ctx| {
            let seen = Arc::clone(&shipping_handler);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build(&config.group)
        .unwrap();

    let app = TestApp::start(config.clone(), registry);
    app.wait_subscribed(&[resolved("billing", &config), resolved("shipping", &config)])
        .await;

    app.server
        .publisher()
        .publish("orders", &OrderCreated { id: 1 })
        .await
        .unwrap();

    let billing = Arc::clone(&billing_seen);
    let shipping = Arc::clone(&shipping_seen);
    wait_until("both groups to receive the message", || {
        let billing = Arc::clone(&billing);
        let shipping = Arc::clone(&shipping);
        async move {
            billing.load(Ordering::SeqCst) == 1 && shipping.load(Ordering::SeqCst) == 1
        }
    })
    .await;

    assert_eq!(
        app.broker
            .committed(&resolved("billing", &config))
            .await
            .len(),
        1
    );
    assert_eq!(
        app.broker
            .committed(&resolved("shipping", &config))
            .await
            .len(),
        1
    );

    app.server.shutdown().await;
}

#[tokio::test]
async fn failing_handler_marks_failed_and_rejects() {
    let mut config = fast_config();
    // Keep the sweeper out of this test's window
    config.retry.failed_retry_interval_secs = 60;

    let registry = ConsumerRegistryBuilder::new()
        .subscribe("orders", |_ctx| async {
            anyhow::bail!("handler always refuses")
        })
        .build(&config.group)
        .unwrap();

    let app = TestApp::start(config.clone(), registry);
    let group = resolved(&config.group.default_group, &config);
    app.wait_subscribed(&[group.clone()]).await;

    let envelope = app
        .server
        .publisher()
        .publish("orders", &OrderCreated { id: 1 })
        .await
        .unwrap();

    let storage = app.storage.clone();
    let id = envelope.id.clone();
    wait_until("inbound envelope to reach Failed", || {
        let storage = storage.clone();
        let id = id.clone();
        async move {
            storage
                .get_message(MessageDirection::Subscribe, &id)
                .await
                .unwrap()
                .is_some_and(|m| m.status == StatusName::Failed)
        }
    })
    .await;

    let stored = app
        .storage
        .get_message(MessageDirection::Subscribe, &envelope.id)
        .await
        .unwrap()
        .unwrap();
    assert!(
        stored.origin.has_exception(),
        "the failure is captured in the exception header"
    );

    let broker = app.broker.clone();
    let group_name = group.clone();
    wait_until("the delivery to be rejected", || {
        let broker = broker.clone();
        let group = group_name.clone();
        async move { !broker.rejected(&group).await.is_empty() }
    })
    .await;
    assert!(app.broker.committed(&group).await.is_empty());

    app.server.shutdown().await;
}
