//! End-to-end escalation scenarios: alert group lifecycle racing against
//! at-least-once task delivery.
//!
//! The memory task queue never delivers on its own; tests drain it and hand
//! tasks to the engine manually, which makes it easy to deliver a task
//! twice, late, or after a user action - exactly the races the engine must
//! tolerate.

use std::sync::Arc;

use oncore_core::ids::UserId;
use oncore_core::queue::{MemoryTaskQueue, ScheduledTask, TaskHandler, TaskKind};
use oncore_core::user::User;
use oncore_escalation::{
    AlertGroupLogType, AlertGroupRepository, AlertGroupStateMachine, AuditLog, ChannelFilter,
    EscalationChain, EscalationConfig, EscalationEngine, EscalationPolicy,
    EscalationPolicyExecutor, EscalationScheduler, EscalationStep, LockRegistry, MemoryAlertGroups,
    MemoryAuditLog, MemoryRouting, MemoryWebhookTrigger, StaticOnCallResolver, TransitionOutcome,
};
use oncore_notify::{
    BackendRegistry, MemoryBackend, MemoryUserDirectory, NotificationDispatch, PersonalLogStore,
    UserNotificationPolicy,
};

struct Harness {
    engine: Arc<EscalationEngine>,
    machine: Arc<AlertGroupStateMachine>,
    queue: Arc<MemoryTaskQueue>,
    repository: Arc<MemoryAlertGroups>,
    routing: Arc<MemoryRouting>,
    audit: Arc<MemoryAuditLog>,
    backend: MemoryBackend,
    user_a: User,
    user_b: User,
}

async fn harness() -> Harness {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();

    let config = EscalationConfig::default();
    let repository = Arc::new(MemoryAlertGroups::new());
    let routing = Arc::new(MemoryRouting::new());
    let queue = Arc::new(MemoryTaskQueue::new());
    let scheduler = Arc::new(EscalationScheduler::new(queue.clone()));
    let audit = Arc::new(MemoryAuditLog::new());
    let locks = Arc::new(LockRegistry::new());

    let machine = Arc::new(AlertGroupStateMachine::new(
        repository.clone(),
        routing.clone(),
        scheduler.clone(),
        audit.clone(),
        locks.clone(),
        config.clone(),
    ));

    let backend = MemoryBackend::new("memory");
    let registry = Arc::new(BackendRegistry::new());
    registry.register(Arc::new(backend.clone())).await;
    let dispatch = Arc::new(NotificationDispatch::new(
        registry,
        Arc::new(PersonalLogStore::new()),
    ));

    let users = Arc::new(MemoryUserDirectory::new());
    let user_a = User::new("alice");
    let user_b = User::new("bob");
    for user in [&user_a, &user_b] {
        users.register_user(user.clone());
        users.set_policies(
            user.id.clone(),
            false,
            vec![UserNotificationPolicy::notify(user.id.clone(), 0, "memory")],
        );
    }

    let executor = Arc::new(EscalationPolicyExecutor::new(
        config.clone(),
        Arc::new(StaticOnCallResolver::new()),
        Arc::new(MemoryWebhookTrigger::new()),
        audit.clone(),
    ));

    let engine = Arc::new(EscalationEngine::new(
        repository.clone(),
        machine.clone(),
        executor,
        scheduler,
        dispatch,
        users.clone(),
        audit.clone(),
        locks,
        config,
    ));

    Harness {
        engine,
        machine,
        queue,
        repository,
        routing,
        audit,
        backend,
        user_a,
        user_b,
    }
}

impl Harness {
    /// The three-step chain from the acceptance scenarios:
    /// notify A, wait 5m, notify B.
    fn register_three_step_chain(&self) {
        let chain = EscalationChain::new("chain-1", "critical path")
            .with_policy(EscalationPolicy::new(
                "p-0",
                0,
                EscalationStep::NotifyUsers {
                    users: vec![self.user_a.id.clone()],
                },
            ))
            .with_policy(EscalationPolicy::new("p-1", 1, EscalationStep::Wait).with_wait_delay(300))
            .with_policy(EscalationPolicy::new(
                "p-2",
                2,
                EscalationStep::NotifyUsers {
                    users: vec![self.user_b.id.clone()],
                },
            ));
        self.routing
            .register(ChannelFilter::new("cf-1", "default").with_escalation_chain(chain));
    }

    fn register_chain(&self, policies: Vec<EscalationPolicy>) {
        let mut chain = EscalationChain::new("chain-1", "default");
        chain.policies = policies;
        self.routing
            .register(ChannelFilter::new("cf-1", "default").with_escalation_chain(chain));
    }

    async fn create_group(&self) -> oncore_escalation::AlertGroup {
        self.engine
            .create_alert_group(
                "grafana",
                Some("cf-1".to_string()),
                "High CPU",
                "CPU above 95%",
                serde_json::json!({"value": 97}),
            )
            .await
            .unwrap()
    }

    /// Deliver everything currently queued, repeatedly, until the queue
    /// stays empty or the round budget runs out.
    async fn deliver_all(&self, rounds: usize) {
        for _ in 0..rounds {
            let tasks = self.queue.drain();
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                self.engine.handle(task).await;
            }
        }
    }

    async fn deliver(&self, task: ScheduledTask) {
        self.engine.handle(task).await;
    }
}

fn is_escalation_step(task: &ScheduledTask) -> bool {
    matches!(task.kind, TaskKind::EscalationStep { .. })
}

#[tokio::test]
async fn test_full_chain_notifies_both_users() {
    let h = harness().await;
    h.register_three_step_chain();

    let group = h.create_group().await;
    h.deliver_all(20).await;

    let notified: Vec<_> = h.backend.sent().into_iter().map(|(user, _)| user).collect();
    assert_eq!(notified, vec![h.user_a.id.clone(), h.user_b.id.clone()]);

    let stored = h.repository.get(&group.id).await.unwrap().unwrap();
    assert!(stored.is_escalation_finished);
    assert!(stored.active_escalation_id.is_none());
    // Chain exhausted without forcing a terminal state
    assert!(stored.is_firing());

    let finished: Vec<_> = h
        .audit
        .records_for(&group.id)
        .into_iter()
        .filter(|r| r.record_type == AlertGroupLogType::EscalationFinished)
        .collect();
    assert_eq!(finished.len(), 1);
}

#[tokio::test]
async fn test_acknowledge_before_first_step_suppresses_all_notifications() {
    let h = harness().await;
    h.register_three_step_chain();

    let group = h.create_group().await;
    // The first step is queued but has not fired yet
    assert_eq!(h.queue.len(), 1);

    let outcome = h
        .machine
        .acknowledge(&group.id, UserId::new())
        .await
        .unwrap();
    assert!(outcome.applied());

    // The stale step is delivered late; nothing must happen
    h.deliver_all(20).await;

    assert_eq!(h.backend.count(), 0);
    let stored = h.repository.get(&group.id).await.unwrap().unwrap();
    let snapshot = stored.escalation_snapshot.as_ref().unwrap();
    assert_eq!(snapshot.last_active_escalation_policy_order, None);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_resolve_suppresses_late_stale_step() {
    let h = harness().await;
    h.register_three_step_chain();

    let group = h.create_group().await;

    // Deliver step 0: notify A, schedule the wait step
    let tasks = h.queue.drain();
    assert_eq!(tasks.len(), 1);
    h.deliver(tasks[0].clone()).await;

    let mut queued = h.queue.drain();
    // Deliver A's personal notification now; hold back the escalation step
    let step_two = queued
        .iter()
        .position(is_escalation_step)
        .map(|i| queued.remove(i))
        .unwrap();
    for task in queued {
        h.deliver(task).await;
    }
    assert_eq!(h.backend.count(), 1);

    h.machine.resolve(&group.id, Some(UserId::new())).await.unwrap();

    // The stale wait-step task arrives late, then anything it might spawn
    h.deliver(step_two).await;
    h.deliver_all(20).await;

    // User B is never notified, nothing further executed
    assert_eq!(h.backend.count(), 1);
    let stored = h.repository.get(&group.id).await.unwrap().unwrap();
    assert!(stored.is_resolved());
    assert!(stored.is_escalation_finished);
}

#[tokio::test]
async fn test_duplicate_step_delivery_notifies_once() {
    let h = harness().await;
    h.register_three_step_chain();

    h.create_group().await;

    let tasks = h.queue.drain();
    assert_eq!(tasks.len(), 1);

    // At-least-once delivery hands the same task to two workers
    h.deliver(tasks[0].clone()).await;
    h.deliver(tasks[0].clone()).await;

    let follow_ups = h.queue.drain();
    let notify_count = follow_ups
        .iter()
        .filter(|t| matches!(t.kind, TaskKind::NotifyUser { .. }))
        .count();
    assert_eq!(notify_count, 1);

    for task in follow_ups {
        if matches!(task.kind, TaskKind::NotifyUser { .. }) {
            h.deliver(task).await;
        }
    }
    assert_eq!(h.backend.count(), 1);
}

#[tokio::test]
async fn test_unacknowledge_resumes_from_cursor() {
    let h = harness().await;
    h.register_three_step_chain();

    let group = h.create_group().await;

    // Step 0 fires: A is notified
    let tasks = h.queue.drain();
    h.deliver(tasks[0].clone()).await;
    for task in h.queue.drain() {
        if matches!(task.kind, TaskKind::NotifyUser { .. }) {
            h.deliver(task).await;
        }
        // the queued wait step is dropped here; acknowledge would fence it anyway
    }
    assert_eq!(h.backend.count(), 1);

    h.machine.acknowledge(&group.id, UserId::new()).await.unwrap();
    let user = UserId::new();
    h.machine.unacknowledge(&group.id, user).await.unwrap();

    // Resume walks the wait step and then notifies B; A is not re-notified
    h.deliver_all(20).await;

    let notified: Vec<_> = h.backend.sent().into_iter().map(|(u, _)| u).collect();
    assert_eq!(notified, vec![h.user_a.id.clone(), h.user_b.id.clone()]);

    let stored = h.repository.get(&group.id).await.unwrap().unwrap();
    assert!(stored.is_escalation_finished);
}

#[tokio::test]
async fn test_silence_and_automatic_unsilence_restarts_cycle() {
    let h = harness().await;
    h.register_three_step_chain();

    let group = h.create_group().await;

    h.machine
        .silence(&group.id, UserId::new(), 60)
        .await
        .unwrap();

    let stored = h.repository.get(&group.id).await.unwrap().unwrap();
    assert!(stored.is_silenced());
    let silenced_at = stored.silenced_at.unwrap();
    let silenced_until = stored.silenced_until.unwrap();
    assert_eq!((silenced_until - silenced_at).num_seconds(), 60);

    // Queue now holds the stale first step and the unsilence timer
    let tasks = h.queue.drain();
    let unsilence = tasks
        .iter()
        .find(|t| matches!(t.kind, TaskKind::Unsilence { .. }))
        .cloned()
        .unwrap();
    assert_eq!((unsilence.run_at - silenced_at).num_seconds(), 60);

    // Stale escalation step delivered during the silence window: no-op
    for task in tasks {
        h.deliver(task.clone()).await;
    }
    // The unsilence delivery returned the group to firing and re-armed
    let stored = h.repository.get(&group.id).await.unwrap().unwrap();
    assert!(stored.is_firing());

    // A fresh notify cycle runs from the top
    h.deliver_all(20).await;
    let notified: Vec<_> = h.backend.sent().into_iter().map(|(u, _)| u).collect();
    assert_eq!(notified, vec![h.user_a.id.clone(), h.user_b.id.clone()]);
}

#[tokio::test]
async fn test_two_attaches_to_resolved_group_unresolve_once() {
    let h = harness().await;
    h.register_three_step_chain();

    let group = h.create_group().await;
    h.deliver_all(20).await;
    h.backend.clear();

    h.machine.resolve(&group.id, Some(UserId::new())).await.unwrap();

    // Two alerts of the same grouping window arrive at a resolved group
    let first = h
        .engine
        .attach_alert(&group.id, serde_json::json!({"n": 1}))
        .await
        .unwrap();
    let second = h
        .engine
        .attach_alert(&group.id, serde_json::json!({"n": 2}))
        .await
        .unwrap();

    assert_eq!(first, TransitionOutcome::Applied);
    assert_eq!(second, TransitionOutcome::NoChange);

    let unresolved: Vec<_> = h
        .audit
        .records_for(&group.id)
        .into_iter()
        .filter(|r| r.record_type == AlertGroupLogType::UnResolved)
        .collect();
    assert_eq!(unresolved.len(), 1);

    let stored = h.repository.get(&group.id).await.unwrap().unwrap();
    assert!(stored.is_firing());
    assert!(stored.restarted_at.is_some());
}

#[tokio::test]
async fn test_resolve_step_resolves_automatically() {
    let h = harness().await;
    h.register_chain(vec![
        EscalationPolicy::new(
            "p-0",
            0,
            EscalationStep::NotifyUsers {
                users: vec![h.user_a.id.clone()],
            },
        ),
        EscalationPolicy::new("p-1", 1, EscalationStep::Resolve),
    ]);

    let group = h.create_group().await;
    h.deliver_all(20).await;

    let stored = h.repository.get(&group.id).await.unwrap().unwrap();
    assert!(stored.is_resolved());
    assert!(stored.resolved_by.is_none());

    let resolved: Vec<_> = h
        .audit
        .records_for(&group.id)
        .into_iter()
        .filter(|r| r.record_type == AlertGroupLogType::Resolved)
        .collect();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].reason.as_deref(), Some("resolved automatically"));
}

#[tokio::test]
async fn test_empty_schedule_is_inert() {
    let h = harness().await;
    h.register_chain(vec![EscalationPolicy::new(
        "p-0",
        0,
        EscalationStep::NotifyOnCallSchedule {
            schedule: "empty-schedule".to_string(),
        },
    )]);

    let group = h.create_group().await;
    h.deliver_all(20).await;

    // Empty schedule is non-fatal: logged, walk completed with zero effect
    assert_eq!(h.backend.count(), 0);
    let records = h.audit.records_for(&group.id);
    assert!(records
        .iter()
        .any(|r| r.record_type == AlertGroupLogType::EscalationFailed));
    assert!(records
        .iter()
        .any(|r| r.record_type == AlertGroupLogType::EscalationFinished));
}

#[tokio::test]
async fn test_alerts_in_window_pauses_until_volume_returns() {
    let h = harness().await;
    h.register_chain(vec![
        EscalationPolicy::new(
            "p-0",
            0,
            EscalationStep::NotifyIfNumAlertsInWindow {
                num_alerts: 2,
                window_minutes: 60,
            },
        ),
        EscalationPolicy::new(
            "p-1",
            1,
            EscalationStep::NotifyUsers {
                users: vec![h.user_a.id.clone()],
            },
        ),
    ]);

    let group = h.create_group().await;
    // One alert only: the window step pauses the walk
    h.deliver_all(20).await;
    assert_eq!(h.backend.count(), 0);

    let stored = h.repository.get(&group.id).await.unwrap().unwrap();
    let snapshot = stored.escalation_snapshot.as_ref().unwrap();
    assert!(snapshot.pause_escalation);
    // Cursor must not have advanced past the window step
    assert_eq!(snapshot.last_active_escalation_policy_order, None);

    // Alert volume returns; each attach resumes the walk at the same step
    h.engine
        .attach_alert(&group.id, serde_json::json!({}))
        .await
        .unwrap();
    h.engine
        .attach_alert(&group.id, serde_json::json!({}))
        .await
        .unwrap();
    h.deliver_all(20).await;

    assert_eq!(h.backend.count(), 1);
    let stored = h.repository.get(&group.id).await.unwrap().unwrap();
    assert!(stored.is_escalation_finished);
}

async fn current_state(h: &Harness, id: &oncore_core::ids::AlertGroupId) -> &'static str {
    match h.repository.get(id).await.unwrap().unwrap().state {
        oncore_escalation::AlertGroupState::Firing => "firing",
        oncore_escalation::AlertGroupState::Acknowledged => "acknowledged",
        oncore_escalation::AlertGroupState::Resolved => "resolved",
        oncore_escalation::AlertGroupState::Silenced => "silenced",
    }
}

#[tokio::test]
async fn test_state_is_always_a_single_valid_variant() {
    let h = harness().await;
    h.register_three_step_chain();

    let group = h.create_group().await;
    assert_eq!(current_state(&h, &group.id).await, "firing");

    h.machine.acknowledge(&group.id, UserId::new()).await.unwrap();
    assert_eq!(current_state(&h, &group.id).await, "acknowledged");

    h.machine.unacknowledge(&group.id, UserId::new()).await.unwrap();
    assert_eq!(current_state(&h, &group.id).await, "firing");

    h.machine.silence(&group.id, UserId::new(), 30).await.unwrap();
    assert_eq!(current_state(&h, &group.id).await, "silenced");

    h.machine.unsilence(&group.id, Some(UserId::new())).await.unwrap();
    assert_eq!(current_state(&h, &group.id).await, "firing");

    h.machine.resolve(&group.id, Some(UserId::new())).await.unwrap();
    assert_eq!(current_state(&h, &group.id).await, "resolved");
}
