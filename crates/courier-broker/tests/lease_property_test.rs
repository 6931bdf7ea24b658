//! Property tests for the lease/ack-token contract.
//!
//! Drives the queue engine with arbitrary operation sequences and checks
//! the invariants the broker promises: tokens are minted at most once,
//! a granted lease always expires in the future, superseded tokens are
//! rejected without corrupting state, and acknowledged messages never
//! come back.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use courier_broker::{CreateQueue, MemoryBrokerStorage, QueueEngine};
use courier_core::{
    models::{AckToken, MessageId},
    storage::memory::MemoryStorage,
    Clock, CoreError, TestClock,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Send { delay: u32 },
    Receive,
    AckCurrent,
    AckSuperseded,
    Advance { seconds: u32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..5).prop_map(|delay| Op::Send { delay }),
        Just(Op::Receive),
        Just(Op::AckCurrent),
        Just(Op::AckSuperseded),
        (1u32..10).prop_map(|seconds| Op::Advance { seconds }),
    ]
}

async fn run_ops(ops: Vec<Op>) {
    let clock = Arc::new(TestClock::new());
    let storage = Arc::new(MemoryBrokerStorage::new(Arc::new(MemoryStorage::new())));
    let engine = QueueEngine::new(storage, clock.clone());

    // The attempt ceiling is far above the operation count so nothing
    // dead-letters mid-run; dead-letter behavior has its own tests.
    let queue = engine
        .create_queue(CreateQueue {
            visibility_timeout_seconds: 4,
            max_attempts: 1000,
            ..CreateQueue::new("property")
        })
        .await
        .unwrap();

    let mut minted: HashSet<AckToken> = HashSet::new();
    let mut current: HashMap<MessageId, AckToken> = HashMap::new();
    let mut superseded: Vec<AckToken> = Vec::new();
    let mut acked: HashSet<MessageId> = HashSet::new();

    for op in ops {
        match op {
            Op::Send { delay } => {
                engine.send(queue.id, serde_json::json!("payload"), delay).await.unwrap();
            },
            Op::Receive => {
                if let Some(message) = engine.receive(queue.id, None).await.unwrap() {
                    assert!(
                        !acked.contains(&message.id),
                        "acknowledged message must never be redelivered"
                    );

                    let token = message.ack_token.expect("leased message carries a token");
                    assert!(minted.insert(token), "ack token minted twice");
                    assert!(
                        message.visible_at > clock.now_utc(),
                        "granted lease must expire in the future"
                    );

                    if let Some(previous) = current.insert(message.id, token) {
                        superseded.push(previous);
                    }
                }
            },
            Op::AckCurrent => {
                let entry = current.iter().next().map(|(&id, &token)| (id, token));
                if let Some((message_id, token)) = entry {
                    engine.ack(token).await.expect("current token must acknowledge");
                    current.remove(&message_id);
                    acked.insert(message_id);
                }
            },
            Op::AckSuperseded => {
                if let Some(token) = superseded.pop() {
                    assert!(
                        matches!(engine.ack(token).await, Err(CoreError::InvalidAckToken)),
                        "superseded token must be rejected"
                    );
                }
            },
            Op::Advance { seconds } => {
                clock.advance(Duration::from_secs(u64::from(seconds)));
            },
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lease_tokens_are_exclusive_and_single_use(
        ops in proptest::collection::vec(op_strategy(), 1..60)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("test runtime");
        runtime.block_on(run_ops(ops));
    }
}
