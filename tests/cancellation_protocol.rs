//! End-to-end tests for workflow cancellation: operator request, propagation,
//! agent acknowledgment and convergence, all against the in-memory store.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use cancelq::engine::{
    CancellationAck, CancellationService, ChannelEscalationSink, ConvergenceMonitor,
    MonitorConfig, PropagationConfig, PropagationEngine, RetryPolicy,
};
use cancelq::protocol::{AckOutcome, AgentProtocol, AgentWorker, ProtocolConfig, Teardown, WorkerConfig};
use cancelq::storage::memory::InMemoryStore;
use cancelq::storage::{CancellationLedger, ElementStore};
use cancelq::{CancelError, Element, ElementStatus};

struct Harness {
    store: Arc<InMemoryStore>,
    service: CancellationService,
    protocol: Arc<AgentProtocol>,
    monitor: ConvergenceMonitor,
}

fn create_harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let propagation = PropagationEngine::new(
        store.clone(),
        PropagationConfig {
            retry: RetryPolicy::no_backoff(10),
            concurrency: 4,
        },
    );
    let (sink, _rx) = ChannelEscalationSink::new();

    Harness {
        service: CancellationService::new(store.clone(), store.clone(), propagation.clone()),
        protocol: Arc::new(AgentProtocol::new(
            store.clone(),
            store.clone(),
            ProtocolConfig {
                retry: RetryPolicy::no_backoff(10),
                claim_batch_size: 64,
            },
        )),
        monitor: ConvergenceMonitor::new(
            store.clone(),
            store.clone(),
            propagation,
            Arc::new(sink),
            MonitorConfig::default(),
        ),
        store,
    }
}

/// Teardown that always succeeds; repeated calls are harmless.
struct NoopTeardown;

#[async_trait]
impl Teardown for NoopTeardown {
    async fn teardown(&self, _element: &Element) -> anyhow::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Scenario
// ============================================================================

#[tokio::test]
async fn test_wf42_scenario() {
    let h = create_harness();

    let e1 = Element::new("wf-42");
    let e2 = Element::new("wf-42")
        .with_status(ElementStatus::Running)
        .with_owner("agentA");
    h.store.put(&e1).await.unwrap();
    h.store.put(&e2).await.unwrap();

    let ack = h.service.request_workflow_cancellation("wf-42").await.unwrap();
    let intent = match ack {
        CancellationAck::Requested { intent, created, .. } => {
            assert!(created);
            intent
        }
        other => panic!("unexpected ack: {:?}", other),
    };
    assert_eq!(intent.total_element_count_at_request_time, 2);

    // Unclaimed work needs no agent: it went through CancelRequested to Canceled.
    let e1_now = h.store.get(e1.id).await.unwrap().unwrap();
    assert_eq!(e1_now.status, ElementStatus::Canceled);
    assert_eq!(e1_now.version, 2);

    let e2_now = h.store.get(e2.id).await.unwrap().unwrap();
    assert_eq!(e2_now.status, ElementStatus::CancelRequested);

    let pending = h.monitor.reconcile_once().await.unwrap();
    assert!(!pending[0].resolved);

    let outcome = h.protocol.acknowledge(e2.id, "agentA").await.unwrap();
    assert!(matches!(outcome, AckOutcome::Acknowledged(_)));

    let results = h.monitor.reconcile_once().await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].resolved);
    assert_eq!(results[0].acknowledged, 2);

    let intent = h.store.get_intent("wf-42").await.unwrap().unwrap();
    assert!(intent.resolved);
    assert_eq!(intent.acknowledged_element_count, 2);
}

// ============================================================================
// Testable properties
// ============================================================================

#[tokio::test]
async fn test_request_cancellation_twice_keeps_one_intent() {
    let h = create_harness();
    h.store.put(&Element::new("wf-1")).await.unwrap();

    let (first, _) = h.store.request_cancellation("wf-1", 1).await.unwrap();
    let (second, created) = h.store.request_cancellation("wf-1", 1).await.unwrap();

    assert!(!created);
    assert_eq!(first.requested_at, second.requested_at);
    assert_eq!(h.store.list_unresolved().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_wrong_agent_never_transitions_element() {
    let h = create_harness();
    h.store.put(&Element::new("wf-1")).await.unwrap();
    let claimed = h
        .protocol
        .claim(&"agentA".to_string())
        .await
        .unwrap()
        .unwrap();
    h.service.request_workflow_cancellation("wf-1").await.unwrap();
    let before = h.store.get(claimed.id).await.unwrap().unwrap();

    let result = h.protocol.acknowledge(claimed.id, "agentB").await;

    assert!(matches!(result, Err(CancelError::OwnershipMismatch { .. })));
    let after = h.store.get(claimed.id).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(after.status, ElementStatus::CancelRequested);
}

#[tokio::test]
async fn test_workflow_converges_once_agents_acknowledge() {
    let h = create_harness();
    for _ in 0..10 {
        h.store.put(&Element::new("wf-big")).await.unwrap();
    }

    let agents = ["agentA", "agentB", "agentC"];
    for agent in agents {
        for _ in 0..2 {
            h.protocol
                .claim(&agent.to_string())
                .await
                .unwrap()
                .unwrap();
        }
    }

    h.service.request_workflow_cancellation("wf-big").await.unwrap();
    assert!(!h.monitor.reconcile_once().await.unwrap()[0].resolved);

    for agent in agents {
        let worker = AgentWorker::new(
            agent,
            h.protocol.clone(),
            NoopTeardown,
            WorkerConfig::default(),
        );
        let report = worker.run_cancellation_pass().await.unwrap();
        assert_eq!(report.acknowledged, 2);
    }

    let results = h.monitor.reconcile_once().await.unwrap();
    assert!(results[0].resolved);
    assert_eq!(results[0].acknowledged, 10);
    assert!(h.store.list_unresolved().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_redelivered_cancellation_is_idempotent_for_agent() {
    let h = create_harness();
    h.store.put(&Element::new("wf-1")).await.unwrap();
    let claimed = h
        .protocol
        .claim(&"agentA".to_string())
        .await
        .unwrap()
        .unwrap();
    h.service.request_workflow_cancellation("wf-1").await.unwrap();

    // The agent restarts between teardown and seeing the acknowledgment succeed.
    h.protocol.acknowledge(claimed.id, "agentA").await.unwrap();
    let again = h.protocol.acknowledge(claimed.id, "agentA").await.unwrap();

    assert!(matches!(again, AckOutcome::AlreadyAcknowledged(_)));
    assert_eq!(again.element().status, ElementStatus::Canceled);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_compare_and_swap_has_one_winner() {
    let store = Arc::new(InMemoryStore::new());
    let element = Element::new("wf-1");
    store.put(&element).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let id = element.id;
            tokio::spawn(async move {
                store
                    .compare_and_swap_status(id, 0, ElementStatus::CancelRequested)
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_concurrent_claims_hand_out_each_element_once() {
    let h = create_harness();
    for _ in 0..20 {
        h.store.put(&Element::new("wf-1")).await.unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let protocol = h.protocol.clone();
            tokio::spawn(async move {
                let agent = format!("agent-{}", i);
                let mut claimed = Vec::new();
                while let Some(element) = protocol.claim(&agent).await.unwrap() {
                    claimed.push(element.id);
                }
                claimed
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
}

#[tokio::test]
async fn test_concurrent_propagation_has_no_duplicate_effects() {
    let store = Arc::new(InMemoryStore::new());
    for _ in 0..50 {
        store.put(&Element::new("wf-1")).await.unwrap();
    }

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = PropagationEngine::new(
                store.clone(),
                PropagationConfig {
                    retry: RetryPolicy::no_backoff(10),
                    concurrency: 8,
                },
            );
            tokio::spawn(async move { engine.propagate("wf-1").await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let elements = store.query_by_workflow("wf-1").await.unwrap();
    assert_eq!(elements.len(), 50);
    for element in elements {
        assert_eq!(element.status, ElementStatus::Canceled);
        assert_eq!(element.version, 2);
    }
}
