//! End-to-end queue scenarios: leasing, expiry, redelivery, delay,
//! dead-lettering, and lease exclusivity under concurrency.
//!
//! All timing runs on the harness's virtual clock; "waiting six seconds"
//! is a clock advance, not a sleep.

use std::{sync::Arc, time::Duration};

use courier_core::{CoreError, MessageState};
use courier_testing::{QueueBuilder, TestEnv};

#[tokio::test]
async fn lease_expiry_and_token_rotation() {
    let env = TestEnv::new().await;
    let queue = QueueBuilder::new("scenario-one")
        .visibility_timeout_seconds(5)
        .max_attempts(3)
        .create(&env)
        .await;

    env.queues.send(queue.id, serde_json::json!("a"), 0).await.unwrap();

    let first = env.queues.receive(queue.id, None).await.unwrap().unwrap();
    assert_eq!(first.attempt, 1);
    let stale_token = first.ack_token.unwrap();

    // Within the lease nothing is redeliverable.
    assert!(env.queues.receive(queue.id, None).await.unwrap().is_none());

    env.advance_time(Duration::from_secs(6));

    let second = env.queues.receive(queue.id, None).await.unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.attempt, 2);
    let current_token = second.ack_token.unwrap();
    assert_ne!(stale_token, current_token);

    // The superseded token is the documented caller error and changes
    // nothing.
    assert!(matches!(
        env.queues.ack(stale_token).await,
        Err(CoreError::InvalidAckToken)
    ));
    assert_eq!(
        env.storage.find_message(second.id).unwrap().state,
        MessageState::InFlight
    );

    env.queues.ack(current_token).await.unwrap();
    assert!(env.queues.receive(queue.id, None).await.unwrap().is_none());

    // Acked is terminal: repeated ack fails, nothing is ever redelivered.
    assert!(matches!(
        env.queues.ack(current_token).await,
        Err(CoreError::InvalidAckToken)
    ));
    env.advance_time(Duration::from_secs(3600));
    assert!(env.queues.receive(queue.id, None).await.unwrap().is_none());
}

#[tokio::test]
async fn delayed_send_stays_invisible_until_due() {
    let env = TestEnv::new().await;
    let queue = QueueBuilder::new("scenario-two").create(&env).await;

    env.queues.send(queue.id, serde_json::json!("b"), 10).await.unwrap();

    assert!(env.queues.receive(queue.id, None).await.unwrap().is_none());

    env.advance_time(Duration::from_secs(9));
    assert!(env.queues.receive(queue.id, None).await.unwrap().is_none());

    env.advance_time(Duration::from_secs(1));
    let message = env.queues.receive(queue.id, None).await.unwrap().unwrap();
    assert_eq!(message.body, serde_json::json!("b"));
}

#[tokio::test]
async fn exhausted_attempts_dead_letter_the_message() {
    let env = TestEnv::new().await;
    let queue = QueueBuilder::new("dead-letter")
        .visibility_timeout_seconds(5)
        .max_attempts(3)
        .create(&env)
        .await;

    let message_id = env.queues.send(queue.id, serde_json::json!("poison"), 0).await.unwrap();

    for _ in 0..3 {
        assert!(env.queues.receive(queue.id, None).await.unwrap().is_some());
        env.advance_time(Duration::from_secs(6));
    }

    assert!(env.queues.receive(queue.id, None).await.unwrap().is_none());
    assert_eq!(env.storage.find_message(message_id).unwrap().state, MessageState::Dead);
    assert_eq!(env.storage.count_messages(queue.id, MessageState::Dead), 1);
}

#[tokio::test]
async fn oldest_eligible_message_is_served_first() {
    let env = TestEnv::new().await;
    let queue = QueueBuilder::new("ordering").create(&env).await;

    env.queues.send(queue.id, serde_json::json!("first"), 0).await.unwrap();
    env.queues.send(queue.id, serde_json::json!("second"), 0).await.unwrap();
    env.queues.send(queue.id, serde_json::json!("third"), 0).await.unwrap();

    let mut order = Vec::new();
    while let Some(message) = env.queues.receive(queue.id, None).await.unwrap() {
        order.push(message.body);
    }

    assert_eq!(
        order,
        vec![
            serde_json::json!("first"),
            serde_json::json!("second"),
            serde_json::json!("third")
        ]
    );
}

#[tokio::test]
async fn fifo_queue_blocks_behind_unacked_head() {
    let env = TestEnv::new().await;
    let queue = QueueBuilder::new("strict")
        .fifo()
        .visibility_timeout_seconds(5)
        .create(&env)
        .await;

    env.queues.send(queue.id, serde_json::json!(1), 0).await.unwrap();
    env.queues.send(queue.id, serde_json::json!(2), 0).await.unwrap();

    let head = env.queues.receive(queue.id, Some("worker-a")).await.unwrap().unwrap();
    assert_eq!(head.body, serde_json::json!(1));

    // A second consumer gets nothing while the head is leased.
    assert!(env.queues.receive(queue.id, Some("worker-b")).await.unwrap().is_none());

    env.queues.ack(head.ack_token.unwrap()).await.unwrap();
    let next = env.queues.receive(queue.id, Some("worker-b")).await.unwrap().unwrap();
    assert_eq!(next.body, serde_json::json!(2));
}

#[tokio::test]
async fn concurrent_receivers_get_exactly_one_lease() {
    let env = Arc::new(TestEnv::new().await);
    let queue = QueueBuilder::new("race").create(&env).await;

    env.queues.send(queue.id, serde_json::json!("contested"), 0).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let env = env.clone();
        let queue_id = queue.id;
        handles.push(tokio::spawn(async move {
            env.queues.receive(queue_id, None).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1, "exactly one receiver must win the lease");
}
