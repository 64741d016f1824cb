//! Message pump tests
//!
//! Ordering, fault containment, overflow policies and shutdown.

mod common;

use std::collections::HashMap;

use agora_core::{AgoraConfig, CloudEvent, Envelope, OverflowPolicy, Payload, RpcRequest, TraceContext};
use agora_runtime::{EnqueueOutcome, LifecycleState};
use common::*;
use proptest::prelude::*;

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_events_processed_in_enqueue_order() {
    let (agent, _worker) = scripted_echo("1", &AgoraConfig::default());
    agent.activate().await.unwrap();

    for seq in 0..100 {
        assert_eq!(agent.enqueue(note(seq)), EnqueueOutcome::Accepted);
    }

    wait_until(|| agent.stats().processed == 100).await;
    assert_eq!(agent.behavior().notes(), (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_messages_queued_before_activation_are_processed() {
    let (agent, _worker) = scripted_echo("1", &AgoraConfig::default());
    agent.enqueue(note(1));
    agent.enqueue(note(2));
    assert_eq!(agent.state(), LifecycleState::Created);
    assert_eq!(agent.stats().processed, 0);

    agent.activate().await.unwrap();
    wait_until(|| agent.stats().processed == 2).await;
    assert_eq!(agent.behavior().notes(), vec![1, 2]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Handlers observe any enqueued sequence in enqueue order
    #[test]
    fn prop_fifo_order(seqs in prop::collection::vec(any::<u32>(), 1..64)) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let observed = rt.block_on(async {
            let (agent, _worker) = scripted_echo("p", &AgoraConfig::default());
            agent.activate().await.unwrap();
            for seq in &seqs {
                agent.enqueue(note(*seq));
            }
            let expected = seqs.len() as u64;
            wait_until(|| agent.stats().processed == expected).await;
            agent.behavior().notes()
        });

        prop_assert_eq!(observed, seqs);
    }
}

// =============================================================================
// Fault containment
// =============================================================================

#[tokio::test]
async fn test_unregistered_event_is_dropped() {
    let (agent, _worker) = scripted_echo("1", &AgoraConfig::default());
    agent.activate().await.unwrap();

    let greeting = CloudEvent::from_event(
        &Greeting {
            text: "hello".into(),
        },
        "test",
        "Echo",
    )
    .unwrap();
    agent.enqueue(Envelope::Event(greeting));
    agent.enqueue(note(7));

    wait_until(|| agent.stats().processed == 2).await;
    assert_eq!(agent.behavior().notes(), vec![7]);
    assert_eq!(agent.stats().faulted, 0);
}

#[tokio::test]
async fn test_missing_handler_for_expected_event_is_reported() {
    let (agent, _worker) = scripted_echo("1", &AgoraConfig::default());
    agent.context().registry().register_event::<Farewell>();
    agent.activate().await.unwrap();

    agent.enqueue(Envelope::Event(
        CloudEvent::from_event(&Farewell, "test", "Echo").unwrap(),
    ));
    agent.enqueue(note(2));

    wait_until(|| agent.stats().processed == 2).await;
    assert_eq!(agent.stats().faulted, 1);
    assert_eq!(agent.behavior().notes(), vec![2]);
}

#[tokio::test]
async fn test_failing_handler_does_not_stop_pump() {
    let (agent, _worker) = scripted_echo("1", &AgoraConfig::default());
    agent.activate().await.unwrap();

    agent.enqueue(Envelope::Event(
        CloudEvent::from_event(&Poison, "test", "Echo").unwrap(),
    ));
    agent.enqueue(note(3));

    wait_until(|| agent.stats().processed == 2).await;
    assert_eq!(agent.stats().faulted, 1);
    assert_eq!(agent.behavior().notes(), vec![3]);
}

#[tokio::test]
async fn test_malformed_payload_does_not_stop_pump() {
    let (agent, _worker) = scripted_echo("1", &AgoraConfig::default());
    agent.activate().await.unwrap();

    let garbage = CloudEvent::new(
        "Note",
        "test",
        "Echo",
        Payload::new(agora_core::CONTENT_TYPE_JSON, "{not json"),
    );
    agent.enqueue(Envelope::Event(garbage));
    agent.enqueue(note(4));

    wait_until(|| agent.stats().processed == 2).await;
    assert_eq!(agent.stats().faulted, 1);
    assert_eq!(agent.behavior().notes(), vec![4]);
}

#[tokio::test]
async fn test_outbound_publish_carries_trace_and_source() {
    let (agent, worker) = scripted_echo("1", &AgoraConfig::default());
    agent.activate().await.unwrap();

    let parent = TraceContext::new_root();
    let mut relay = CloudEvent::from_event(&Relay { seq: 9 }, "test", "Echo").unwrap();
    parent.inject(&mut relay.attributes);
    agent.enqueue(Envelope::Event(relay));

    wait_until(|| worker.published.lock().len() == 1).await;
    let published = worker.published.lock()[0].clone();
    assert_eq!(published.type_name, "Note");
    assert_eq!(published.source, "1");
    assert_eq!(published.topic(), Some("out"));
    assert_eq!(published.decode::<Note>().unwrap(), Note { seq: 9 });

    let outbound = TraceContext::extract(&published.attributes);
    assert_eq!(outbound.trace_id(), parent.trace_id());
    assert_ne!(outbound.traceparent(), parent.traceparent());
}

// =============================================================================
// Overflow policies
// =============================================================================

#[tokio::test]
async fn test_reject_policy_refuses_when_full() {
    let (agent, _worker) = scripted_echo("1", &config_with_mailbox(2, OverflowPolicy::Reject));

    assert_eq!(agent.enqueue(note(0)), EnqueueOutcome::Accepted);
    assert_eq!(agent.enqueue(note(1)), EnqueueOutcome::Accepted);
    assert_eq!(agent.enqueue(note(2)), EnqueueOutcome::Full);
    assert!(agent.deliver(note(3)).await.is_err());

    agent.activate().await.unwrap();
    wait_until(|| agent.stats().processed == 2).await;
    assert_eq!(agent.behavior().notes(), vec![0, 1]);
    assert_eq!(agent.stats().mailbox.rejected, 2);
}

#[tokio::test]
async fn test_drop_oldest_policy_evicts() {
    let (agent, _worker) = scripted_echo("1", &config_with_mailbox(2, OverflowPolicy::DropOldest));

    agent.enqueue(note(0));
    agent.enqueue(note(1));
    assert_eq!(agent.enqueue(note(2)), EnqueueOutcome::EvictedOldest);

    agent.activate().await.unwrap();
    wait_until(|| agent.stats().processed == 2).await;
    assert_eq!(agent.behavior().notes(), vec![1, 2]);
    assert_eq!(agent.stats().mailbox.evicted, 1);
}

#[tokio::test]
async fn test_evicted_request_is_answered_with_error() {
    let (agent, worker) = scripted_echo("1", &config_with_mailbox(1, OverflowPolicy::DropOldest));

    let request = RpcRequest::new(agent.id().clone(), "ping", Payload::empty());
    let request_id = request.request_id;
    agent.enqueue(Envelope::Request(request));
    agent.enqueue(note(1));

    wait_until(|| !worker.responses.lock().is_empty()).await;
    let response = worker.responses.lock()[0].clone();
    assert_eq!(response.request_id, request_id);
    assert!(response.error_message().unwrap().contains("evicted"));
}

#[tokio::test]
async fn test_refused_request_is_answered_with_error() {
    let (agent, worker) = scripted_echo("1", &config_with_mailbox(1, OverflowPolicy::Reject));
    agent.enqueue(note(0));

    let request = RpcRequest::new(agent.id().clone(), "ping", Payload::empty());
    let request_id = request.request_id;
    assert_eq!(agent.enqueue(Envelope::Request(request)), EnqueueOutcome::Full);

    wait_until(|| !worker.responses.lock().is_empty()).await;
    let response = worker.responses.lock()[0].clone();
    assert_eq!(response.request_id, request_id);
    assert!(response.error_message().unwrap().contains("Mailbox full"));
}

#[tokio::test]
async fn test_block_policy_waits_for_space() {
    let (agent, _worker) = scripted_echo("1", &config_with_mailbox(1, OverflowPolicy::Block));
    agent.deliver(note(0)).await.unwrap();

    let producer = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.deliver(note(1)).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!producer.is_finished());

    agent.activate().await.unwrap();
    producer.await.unwrap().unwrap();
    wait_until(|| agent.stats().processed == 2).await;
    assert_eq!(agent.behavior().notes(), vec![0, 1]);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_shutdown_drains_queued_messages() {
    let (agent, _worker) = scripted_echo("1", &AgoraConfig::default());
    for seq in 0..50 {
        agent.enqueue(note(seq));
    }
    agent.activate().await.unwrap();
    agent.shutdown().await.unwrap();

    assert_eq!(agent.state(), LifecycleState::Stopped);
    assert_eq!(agent.behavior().notes().len(), 50);
    assert_eq!(agent.enqueue(note(99)), EnqueueOutcome::Closed);
}

#[tokio::test]
async fn test_activate_after_shutdown_fails() {
    let (agent, _worker) = scripted_echo("1", &AgoraConfig::default());
    agent.activate().await.unwrap();
    agent.shutdown().await.unwrap();
    agent.shutdown().await.unwrap();

    assert!(matches!(
        agent.activate().await,
        Err(agora_core::Error::AgentNotRunning { .. })
    ));
}

#[tokio::test]
async fn test_event_attributes_survive_dispatch() {
    let (agent, _worker) = scripted_echo("1", &AgoraConfig::default());
    agent.activate().await.unwrap();

    let mut event = CloudEvent::from_event(&Note { seq: 5 }, "test", "Echo").unwrap();
    event.attributes = HashMap::from([
        ("topic".to_string(), "Echo".to_string()),
        ("traceparent".to_string(), "bogus".to_string()),
    ]);
    agent.enqueue(Envelope::Event(event));

    wait_until(|| agent.stats().processed == 1).await;
    assert_eq!(agent.behavior().notes(), vec![5]);
}
