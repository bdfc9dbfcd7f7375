/// Stateful orchestrator: owns the task state machine and is the single
/// writer to the Store. Every public method runs inside one Store
/// transaction; DependencyResolver and PriorityScorer are consulted as
/// pure, read-only helpers against a snapshot taken inside that
/// transaction.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::{Sqlite, Transaction};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{QueueError, QueueResult, StoreError};
use crate::resolver::{self, DependencyGraph};
use crate::scorer::PriorityScorer;
use crate::store::{self, Store};
use crate::types::{
    DependencyKind, EnqueueInput, PruneFilter, QueueStatus, Task, TaskFilter, TaskPatch,
    TaskSource, TaskStatus, DEFAULT_AGENT_TYPE, DEFAULT_BASE_PRIORITY,
    DEFAULT_EXECUTION_TIMEOUT_SECONDS, DEFAULT_MAX_RETRIES,
};

/// Guards the single in-flight write transaction (§5's single-writer
/// posture); readers go straight to the pool and are not serialized here.
pub struct QueueService {
    store: Store,
    scorer: PriorityScorer,
    config: Config,
    write_lock: Mutex<()>,
}

/// Legal transitions for the seven-state machine, expressed as an
/// exhaustive match rather than a lookup table, matching this codebase's
/// existing hand-written state-machine guard style.
fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    match (from, to) {
        (Pending, Ready) | (Pending, Blocked) => true,
        (Blocked, Ready) | (Blocked, Cancelled) => true,
        (Ready, Running) | (Ready, Cancelled) => true,
        (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
        _ => false,
    }
}

fn require_transition(from: TaskStatus, to: TaskStatus) -> QueueResult<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(QueueError::InvalidState(format!(
            "cannot transition from {from} to {to}"
        )))
    }
}

impl QueueService {
    pub async fn new(config: Config) -> QueueResult<Self> {
        let store = Store::new(&config.db_path)
            .await
            .map_err(|e| QueueError::StoreError(e.to_string()))?;
        let scorer = PriorityScorer::new(config.scoring_weights, config.deadline_horizon_seconds);
        Ok(Self {
            store,
            scorer,
            config,
            write_lock: Mutex::new(()),
        })
    }

    #[cfg(test)]
    pub async fn in_memory(config: Config) -> QueueResult<Self> {
        let store = Store::new(":memory:")
            .await
            .map_err(|e| QueueError::StoreError(e.to_string()))?;
        let scorer = PriorityScorer::new(config.scoring_weights, config.deadline_horizon_seconds);
        Ok(Self {
            store,
            scorer,
            config,
            write_lock: Mutex::new(()),
        })
    }

    /// Retries the given transactional closure up to `retry_max` times with
    /// exponential backoff, per §4.4.4. Only `StoreError` is considered
    /// transient and retried; logical errors (NotFound, InvalidState, ...)
    /// propagate immediately.
    async fn with_write_transaction<T, F>(&self, operation: &str, f: F) -> QueueResult<T>
    where
        F: for<'c> Fn(
            &'c mut Transaction<'_, Sqlite>,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = QueueResult<T>> + Send + 'c>,
        >,
    {
        let _guard = self.write_lock.lock().await;
        let mut backoff_ms = self.config.retry_initial_backoff_ms;
        let mut attempt = 0u32;

        loop {
            let mut tx = self
                .store
                .begin()
                .await
                .map_err(|e| QueueError::StoreError(e.to_string()))?;

            match f(&mut tx).await {
                Ok(value) => {
                    tx.commit()
                        .await
                        .map_err(|e| QueueError::StoreError(e.to_string()))?;
                    return Ok(value);
                }
                Err(QueueError::StoreError(msg)) if attempt < self.config.retry_max => {
                    let _ = tx.rollback().await;
                    warn!(operation, attempt, backoff_ms, error = %msg, "retrying transient store error");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms as f64 * self.config.retry_backoff_multiplier) as u64;
                    attempt += 1;
                }
                Err(other) => {
                    let _ = tx.rollback().await;
                    return Err(other);
                }
            }
        }
    }

    #[instrument(skip(self, input))]
    pub async fn enqueue(&self, input: EnqueueInput) -> QueueResult<Task> {
        input.validate()?;

        let description = input.description.clone();
        let summary = input.summary.clone();
        let agent_type = if input.agent_type.is_empty() {
            DEFAULT_AGENT_TYPE.to_string()
        } else {
            input.agent_type.clone()
        };
        let base_priority = input.base_priority;
        let prerequisites = input.prerequisites.clone();
        let source = input.source;
        let parent_task_id = input.parent_task_id;
        let deadline = input.deadline;
        let estimated_duration_seconds = input.estimated_duration_seconds;
        let session_id = input.session_id.clone();
        let input_data = input.input_data.clone();
        let max_retries = input.max_retries;
        let execution_timeout_seconds = input.execution_timeout_seconds;
        let scorer = &self.scorer;

        self.with_write_transaction("enqueue", move |tx| {
            let description = description.clone();
            let summary = summary.clone();
            let agent_type = agent_type.clone();
            let prerequisites = prerequisites.clone();
            let session_id = session_id.clone();
            let input_data = input_data.clone();
            Box::pin(async move {
                for prereq_id in &prerequisites {
                    if !store::task_exists(tx, *prereq_id).await? {
                        return Err(QueueError::NotFound(format!(
                            "prerequisite task not found: {prereq_id}"
                        )));
                    }
                }

                let task_id = Uuid::new_v4();
                for prereq_id in &prerequisites {
                    if *prereq_id == task_id {
                        return Err(QueueError::Validation(
                            "a task cannot depend on itself".to_string(),
                        ));
                    }
                }

                let existing_edges = store::all_edges(tx).await?;
                let graph = DependencyGraph::from_edges(&existing_edges);
                let proposed: Vec<(Uuid, Uuid)> =
                    prerequisites.iter().map(|&p| (task_id, p)).collect();
                graph.detect_cycles_on_add(&proposed)?;

                let now = Utc::now();
                let mut task = Task {
                    id: task_id,
                    description,
                    summary,
                    agent_type,
                    base_priority,
                    status: TaskStatus::Blocked,
                    source,
                    parent_task_id,
                    session_id,
                    submitted_at: now,
                    started_at: None,
                    completed_at: None,
                    updated_at: now,
                    deadline,
                    estimated_duration_seconds,
                    input_data,
                    result: None,
                    error_message: None,
                    retry_count: 0,
                    max_retries,
                    execution_timeout_seconds,
                    calculated_priority: 0.0,
                    dependency_depth: 0,
                };

                store::insert_task(tx, &task).await?;
                for prereq_id in &prerequisites {
                    store::insert_edge(tx, task_id, *prereq_id, DependencyKind::Sequential).await?;
                }
                store::record_event(tx, task_id, None, TaskStatus::Blocked, Some("enqueued")).await?;

                let mut all_edges = existing_edges;
                all_edges.extend(proposed.iter().map(|&(dependent_id, prerequisite_id)| {
                    crate::types::DependencyEdge {
                        id: Uuid::new_v4(),
                        dependent_id,
                        prerequisite_id,
                        kind: DependencyKind::Sequential,
                        created_at: now,
                        resolved_at: None,
                    }
                }));
                let graph = DependencyGraph::from_edges(&all_edges);
                task.dependency_depth = graph.calculate_depth(task_id);

                let all_tasks = store::all_tasks(tx).await?;
                let status_of = |id: Uuid| all_tasks.iter().find(|t| t.id == id).map(|t| t.status);
                let unmet = resolver::unmet_prerequisites(&prerequisites, status_of);
                if unmet.is_empty() {
                    require_transition(TaskStatus::Blocked, TaskStatus::Ready)
                        .or_else(|_| -> QueueResult<()> { Ok(()) })?;
                    task.status = TaskStatus::Ready;
                    store::record_event(tx, task_id, Some(TaskStatus::Blocked), TaskStatus::Ready, None)
                        .await?;
                }

                let blocked_dependents = 0; // freshly inserted task has no dependents yet
                task.calculated_priority = scorer.score(&task, blocked_dependents, now);

                let patch = TaskPatch {
                    status: Some(task.status),
                    calculated_priority: Some(task.calculated_priority),
                    dependency_depth: Some(task.dependency_depth),
                    ..Default::default()
                };
                store::update_task(tx, task_id, &patch).await?;

                Ok(task)
            })
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn dequeue(&self) -> QueueResult<Option<Task>> {
        self.with_write_transaction("dequeue", |tx| {
            Box::pin(async move {
                let filter = TaskFilter {
                    status: Some(TaskStatus::Ready),
                    ..Default::default()
                };
                let candidates = store::list_tasks(tx, &filter, 1).await?;
                let Some(task) = candidates.into_iter().next() else {
                    return Ok(None);
                };

                require_transition(TaskStatus::Ready, TaskStatus::Running)?;
                let now = Utc::now();
                let patch = TaskPatch {
                    status: Some(TaskStatus::Running),
                    started_at: Some(Some(now)),
                    ..Default::default()
                };
                store::update_task(tx, task.id, &patch).await?;
                store::record_event(tx, task.id, Some(TaskStatus::Ready), TaskStatus::Running, None)
                    .await?;

                let mut task = task;
                task.status = TaskStatus::Running;
                task.started_at = Some(now);
                Ok(Some(task))
            })
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn complete(&self, id: Uuid) -> QueueResult<Vec<Uuid>> {
        let scorer = &self.scorer;
        self.with_write_transaction("complete", move |tx| {
            Box::pin(async move {
                let task = store::get_task(tx, id).await?;
                require_transition(task.status, TaskStatus::Completed)?;

                let now = Utc::now();
                let patch = TaskPatch {
                    status: Some(TaskStatus::Completed),
                    completed_at: Some(Some(now)),
                    ..Default::default()
                };
                store::update_task(tx, id, &patch).await?;
                store::record_event(tx, id, Some(task.status), TaskStatus::Completed, None).await?;
                store::resolve_edges_of_prerequisite(tx, id, now).await?;

                let candidate_edges = store::edges_by_prerequisite(tx, id).await?;
                let all_edges = store::all_edges(tx).await?;
                let all_tasks = store::all_tasks(tx).await?;
                let graph = DependencyGraph::from_edges(&all_edges);

                let mut newly_ready = Vec::new();
                for edge in candidate_edges {
                    let dependent_id = edge.dependent_id;
                    let Some(dependent) = all_tasks.iter().find(|t| t.id == dependent_id) else {
                        continue;
                    };
                    if dependent.status != TaskStatus::Blocked {
                        continue;
                    }
                    let prereqs = graph.direct_prerequisites(dependent_id);
                    let status_of = |pid: Uuid| all_tasks.iter().find(|t| t.id == pid).map(|t| t.status);
                    let unmet = resolver::unmet_prerequisites(prereqs, status_of);
                    if unmet.is_empty() {
                        require_transition(TaskStatus::Blocked, TaskStatus::Ready)?;
                        let blocked_dependents = graph
                            .direct_dependents(dependent_id)
                            .iter()
                            .filter(|&&id| {
                                all_tasks
                                    .iter()
                                    .any(|t| t.id == id && t.status == TaskStatus::Blocked)
                            })
                            .count();
                        let new_priority = scorer.score(dependent, blocked_dependents, now);
                        let patch = TaskPatch {
                            status: Some(TaskStatus::Ready),
                            calculated_priority: Some(new_priority),
                            ..Default::default()
                        };
                        store::update_task(tx, dependent_id, &patch).await?;
                        store::record_event(
                            tx,
                            dependent_id,
                            Some(TaskStatus::Blocked),
                            TaskStatus::Ready,
                            None,
                        )
                        .await?;
                        newly_ready.push(dependent_id);
                    }
                }

                info!(task_id = %id, newly_ready = newly_ready.len(), "task completed");
                Ok(newly_ready)
            })
        })
        .await
    }

    #[instrument(skip(self, error_message))]
    pub async fn fail(&self, id: Uuid, error_message: String) -> QueueResult<Vec<Uuid>> {
        self.with_write_transaction("fail", move |tx| {
            let error_message = error_message.clone();
            Box::pin(async move {
                let task = store::get_task(tx, id).await?;
                require_transition(task.status, TaskStatus::Failed)?;

                let patch = TaskPatch {
                    status: Some(TaskStatus::Failed),
                    error_message: Some(Some(error_message)),
                    ..Default::default()
                };
                store::update_task(tx, id, &patch).await?;
                store::record_event(tx, id, Some(task.status), TaskStatus::Failed, None).await?;

                let cascaded = cascade_cancel(tx, id).await?;
                warn!(task_id = %id, cascaded = cascaded.len(), "task failed, cascading cancellation");
                Ok(cascaded)
            })
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> QueueResult<Vec<Uuid>> {
        self.with_write_transaction("cancel", move |tx| {
            Box::pin(async move {
                let task = store::get_task(tx, id).await?;
                if task.status.is_terminal() {
                    return Err(QueueError::InvalidState(format!(
                        "task {id} is already terminal ({})",
                        task.status
                    )));
                }
                require_transition(task.status, TaskStatus::Cancelled)?;

                let patch = TaskPatch {
                    status: Some(TaskStatus::Cancelled),
                    ..Default::default()
                };
                store::update_task(tx, id, &patch).await?;
                store::record_event(tx, id, Some(task.status), TaskStatus::Cancelled, None).await?;

                let mut result = vec![id];
                result.extend(cascade_cancel(tx, id).await?);
                Ok(result)
            })
        })
        .await
    }

    pub async fn get(&self, id: Uuid) -> QueueResult<Task> {
        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(|e| QueueError::StoreError(e.to_string()))?;
        store::get_task(&mut conn, id).await.map_err(Into::into)
    }

    pub async fn list(&self, filter: TaskFilter, limit: i64) -> QueueResult<Vec<Task>> {
        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(|e| QueueError::StoreError(e.to_string()))?;
        store::list_tasks(&mut conn, &filter, limit)
            .await
            .map_err(Into::into)
    }

    pub async fn status(&self) -> QueueResult<QueueStatus> {
        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(|e| QueueError::StoreError(e.to_string()))?;
        store::queue_status(&mut conn).await.map_err(Into::into)
    }

    pub async fn execution_plan(&self, ids: Vec<Uuid>) -> QueueResult<Vec<Vec<Uuid>>> {
        if ids.is_empty() {
            return Err(QueueError::Validation(
                "at least one task id is required".to_string(),
            ));
        }
        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(|e| QueueError::StoreError(e.to_string()))?;
        let edges = store::all_edges(&mut conn).await?;
        resolver::execution_plan(&ids, &edges).map_err(Into::into)
    }

    /// Operational maintenance: deletes terminal tasks matching `filter`
    /// (with their edges and events), optionally vacuuming per
    /// `config.vacuum_mode`. Never mutates a non-terminal task.
    #[instrument(skip(self))]
    pub async fn prune(&self, filter: PruneFilter) -> QueueResult<u64> {
        let pruned = self
            .with_write_transaction("prune", move |tx| {
                let filter = filter.clone();
                Box::pin(async move {
                    store::prune_tasks(tx, &filter).await.map_err(Into::into)
                })
            })
            .await?;

        if self.config.should_vacuum(pruned) {
            self.store.vacuum().await?;
            info!(pruned, "vacuumed store after prune");
        }
        Ok(pruned)
    }
}

/// Cascades `cancelled` status to every non-terminal transitive dependent
/// of `id` (§4.4.3). Caller has already transitioned `id` itself.
async fn cascade_cancel(tx: &mut Transaction<'_, Sqlite>, id: Uuid) -> QueueResult<Vec<Uuid>> {
    let all_edges = store::all_edges(tx).await?;
    let graph = DependencyGraph::from_edges(&all_edges);
    let dependents = graph.transitive_dependents(id);

    let mut cancelled = Vec::new();
    for dependent_id in dependents {
        let task = store::get_task(tx, dependent_id).await?;
        if task.status.is_terminal() {
            continue;
        }
        let patch = TaskPatch {
            status: Some(TaskStatus::Cancelled),
            ..Default::default()
        };
        store::update_task(tx, dependent_id, &patch).await?;
        store::record_event(tx, dependent_id, Some(task.status), TaskStatus::Cancelled, None)
            .await?;
        cancelled.push(dependent_id);
    }
    Ok(cancelled)
}

impl Default for EnqueueInput {
    fn default() -> Self {
        Self {
            description: String::new(),
            source: TaskSource::Human,
            summary: None,
            agent_type: DEFAULT_AGENT_TYPE.to_string(),
            base_priority: DEFAULT_BASE_PRIORITY,
            prerequisites: Vec::new(),
            parent_task_id: None,
            deadline: None,
            estimated_duration_seconds: None,
            session_id: None,
            input_data: serde_json::json!({}),
            max_retries: DEFAULT_MAX_RETRIES,
            execution_timeout_seconds: DEFAULT_EXECUTION_TIMEOUT_SECONDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(description: &str, prerequisites: Vec<Uuid>) -> EnqueueInput {
        EnqueueInput {
            description: description.to_string(),
            prerequisites,
            ..Default::default()
        }
    }

    async fn service() -> QueueService {
        QueueService::in_memory(Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn linear_chain_blocks_then_drains_in_order() {
        let svc = service().await;
        let a = svc.enqueue(input("A", vec![])).await.unwrap();
        let b = svc.enqueue(input("B", vec![a.id])).await.unwrap();
        let c = svc.enqueue(input("C", vec![b.id])).await.unwrap();

        assert_eq!(a.status, TaskStatus::Ready);
        assert_eq!(b.status, TaskStatus::Blocked);
        assert_eq!(c.status, TaskStatus::Blocked);

        let dequeued = svc.dequeue().await.unwrap().unwrap();
        assert_eq!(dequeued.id, a.id);

        let newly_ready = svc.complete(a.id).await.unwrap();
        assert_eq!(newly_ready, vec![b.id]);
        assert_eq!(svc.get(c.id).await.unwrap().status, TaskStatus::Blocked);

        let dequeued = svc.dequeue().await.unwrap().unwrap();
        assert_eq!(dequeued.id, b.id);
        let newly_ready = svc.complete(b.id).await.unwrap();
        assert_eq!(newly_ready, vec![c.id]);
    }

    #[tokio::test]
    async fn diamond_completes_in_expected_order() {
        let svc = service().await;
        let a = svc.enqueue(input("A", vec![])).await.unwrap();
        let b = svc.enqueue(input("B", vec![a.id])).await.unwrap();
        let c = svc.enqueue(input("C", vec![a.id])).await.unwrap();
        let d = svc.enqueue(input("D", vec![b.id, c.id])).await.unwrap();

        svc.dequeue().await.unwrap();
        let mut ready = svc.complete(a.id).await.unwrap();
        ready.sort();
        let mut expected = vec![b.id, c.id];
        expected.sort();
        assert_eq!(ready, expected);

        svc.dequeue().await.unwrap();
        let ready = svc.complete(b.id).await.unwrap();
        assert!(ready.is_empty());
        assert_eq!(svc.get(d.id).await.unwrap().status, TaskStatus::Blocked);

        svc.dequeue().await.unwrap();
        let ready = svc.complete(c.id).await.unwrap();
        assert_eq!(ready, vec![d.id]);
    }

    #[tokio::test]
    async fn self_dependency_is_rejected() {
        // A task cannot list itself; simulate by enqueuing a task whose
        // prerequisite id does not exist and confirming NotFound fires
        // before cycle detection would ever run.
        let svc = service().await;
        let random_id = Uuid::new_v4();
        let err = svc.enqueue(input("X", vec![random_id])).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn cascade_failure_cancels_all_descendants() {
        let svc = service().await;
        let a = svc.enqueue(input("A", vec![])).await.unwrap();
        let b = svc.enqueue(input("B", vec![a.id])).await.unwrap();
        let c = svc.enqueue(input("C", vec![b.id])).await.unwrap();
        let d = svc.enqueue(input("D", vec![c.id])).await.unwrap();

        svc.dequeue().await.unwrap();
        let cascaded = svc.fail(a.id, "oom".to_string()).await.unwrap();
        let mut cascaded = cascaded;
        cascaded.sort();
        let mut expected = vec![b.id, c.id, d.id];
        expected.sort();
        assert_eq!(cascaded, expected);

        assert_eq!(svc.get(a.id).await.unwrap().status, TaskStatus::Failed);
        assert_eq!(svc.get(b.id).await.unwrap().status, TaskStatus::Cancelled);
        assert_eq!(svc.get(d.id).await.unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn priority_ties_break_by_submission_order() {
        let svc = service().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let task = svc.enqueue(input(&format!("T{i}"), vec![])).await.unwrap();
            ids.push(task.id);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        for expected_id in ids {
            let dequeued = svc.dequeue().await.unwrap().unwrap();
            assert_eq!(dequeued.id, expected_id);
        }
    }

    #[tokio::test]
    async fn cancel_returns_self_first_then_cascaded() {
        let svc = service().await;
        let a = svc.enqueue(input("A", vec![])).await.unwrap();
        let b = svc.enqueue(input("B", vec![a.id])).await.unwrap();

        let cancelled = svc.cancel(a.id).await.unwrap();
        assert_eq!(cancelled[0], a.id);
        assert!(cancelled.contains(&b.id));
    }

    #[tokio::test]
    async fn terminal_task_cannot_be_mutated_again() {
        let svc = service().await;
        let a = svc.enqueue(input("A", vec![])).await.unwrap();
        svc.cancel(a.id).await.unwrap();
        let err = svc.cancel(a.id).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidState(_)));
    }

    #[tokio::test]
    async fn execution_plan_of_diamond_has_three_batches() {
        let svc = service().await;
        let a = svc.enqueue(input("A", vec![])).await.unwrap();
        let b = svc.enqueue(input("B", vec![a.id])).await.unwrap();
        let c = svc.enqueue(input("C", vec![a.id])).await.unwrap();
        let d = svc.enqueue(input("D", vec![b.id, c.id])).await.unwrap();

        let plan = svc
            .execution_plan(vec![a.id, b.id, c.id, d.id])
            .await
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0], vec![a.id]);
        assert_eq!(plan[2], vec![d.id]);
    }

    #[tokio::test]
    async fn prune_removes_completed_but_not_blocked() {
        let svc = service().await;
        let a = svc.enqueue(input("A", vec![])).await.unwrap();
        let b = svc.enqueue(input("B", vec![a.id])).await.unwrap();
        svc.dequeue().await.unwrap();
        svc.complete(a.id).await.unwrap();

        let pruned = svc.prune(PruneFilter::default()).await.unwrap();
        assert_eq!(pruned, 1);
        assert!(svc.get(a.id).await.is_err());
        assert_eq!(svc.get(b.id).await.unwrap().status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn status_aggregate_reflects_counts() {
        let svc = service().await;
        svc.enqueue(input("A", vec![])).await.unwrap();
        svc.enqueue(input("B", vec![])).await.unwrap();

        let status = svc.status().await.unwrap();
        assert_eq!(status.total, 2);
        assert_eq!(status.ready, 2);
    }
}
