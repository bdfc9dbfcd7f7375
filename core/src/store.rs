/// Persistent state for tasks and dependency edges.
///
/// Backed by SQLite in WAL mode, following the same connect/migrate
/// shape as the rest of this codebase's state stores: a pooled
/// `SqlitePool`, an idempotent inline migration list, and free functions
/// that take a borrowed connection/transaction so a single caller-owned
/// transaction can span several of these calls (§4.1's "single
/// transaction per operation").
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use crate::errors::{StoreError, StoreResult};
use crate::types::{DependencyEdge, DependencyKind, PruneFilter, Task, TaskFilter, TaskPatch, TaskStatus};

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new(db_path: &str) -> StoreResult<Self> {
        if db_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_path)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_millis(5000));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.apply_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> StoreResult<Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Applies versioned, idempotent migrations. Re-running against an
    /// already-migrated file is a no-op; columns added after the initial
    /// release (e.g. `summary`) are added with `ALTER TABLE ... ADD COLUMN`
    /// guarded by a version check rather than assumed present.
    async fn apply_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?;

        let migrations: Vec<(i64, &str)> = vec![
            (
                1,
                r#"
                CREATE TABLE tasks (
                    id TEXT PRIMARY KEY,
                    description TEXT NOT NULL,
                    agent_type TEXT NOT NULL,
                    base_priority REAL NOT NULL,
                    status TEXT NOT NULL,
                    source TEXT NOT NULL,
                    parent_task_id TEXT,
                    session_id TEXT,
                    submitted_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    updated_at TEXT NOT NULL,
                    deadline TEXT,
                    estimated_duration_seconds INTEGER,
                    input_data TEXT NOT NULL,
                    result TEXT,
                    error_message TEXT,
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    max_retries INTEGER NOT NULL DEFAULT 0,
                    execution_timeout_seconds INTEGER NOT NULL DEFAULT 3600,
                    calculated_priority REAL NOT NULL DEFAULT 0,
                    dependency_depth INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE task_dependencies (
                    id TEXT PRIMARY KEY,
                    dependent_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    prerequisite_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    resolved_at TEXT,
                    UNIQUE(dependent_id, prerequisite_id)
                );

                CREATE TABLE task_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id TEXT NOT NULL,
                    from_status TEXT,
                    to_status TEXT NOT NULL,
                    occurred_at TEXT NOT NULL,
                    detail TEXT
                );

                CREATE INDEX idx_tasks_ready
                    ON tasks(status, calculated_priority DESC, submitted_at ASC)
                    WHERE status = 'ready';

                CREATE INDEX idx_tasks_blocked ON tasks(status) WHERE status = 'blocked';

                CREATE INDEX idx_tasks_deadline ON tasks(deadline)
                    WHERE deadline IS NOT NULL
                      AND status NOT IN ('completed', 'failed', 'cancelled');

                CREATE INDEX idx_deps_prereq_unresolved ON task_dependencies(prerequisite_id)
                    WHERE resolved_at IS NULL;

                CREATE INDEX idx_deps_dependent_unresolved ON task_dependencies(dependent_id)
                    WHERE resolved_at IS NULL;
                "#,
            ),
            (
                2,
                // `summary` shipped after the initial release; tolerate being
                // re-applied to a file that already has the column.
                "ALTER TABLE tasks ADD COLUMN summary TEXT",
            ),
        ];

        for (version, sql) in migrations {
            if version <= current {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                if let Err(err) = sqlx::query(statement).execute(&mut *tx).await {
                    // Tolerate "duplicate column" from a partially-applied
                    // migration being retried against an older file.
                    if !err.to_string().contains("duplicate column") {
                        return Err(StoreError::Migration(err.to_string()));
                    }
                }
            }
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(version, "applied store migration");
        }

        Ok(())
    }

    /// Used by tests to assert a query is index-covered rather than a full
    /// table scan.
    pub async fn explain(&self, query: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(&format!("EXPLAIN QUERY PLAN {query}"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| r.get::<String, _>("detail"))
            .collect())
    }

    /// Reclaims file space after a prune. Takes an exclusive lock on the
    /// whole database file for the duration, hence `vacuum_mode` gating.
    pub async fn vacuum(&self) -> StoreResult<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_task_row(row: &SqliteRow) -> StoreResult<Task> {
    let status_str: String = row.get("status");
    let source_str: String = row.get("source");
    let input_data_str: String = row.get("input_data");
    let result_str: Option<String> = row.get("result");

    Ok(Task {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        description: row.get("description"),
        summary: row.get("summary"),
        agent_type: row.get("agent_type"),
        base_priority: row.get("base_priority"),
        status: TaskStatus::from_str(&status_str)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        source: source_str
            .parse()
            .map_err(|e: crate::errors::QueueError| StoreError::Serialization(e.to_string()))?,
        parent_task_id: row
            .get::<Option<String>, _>("parent_task_id")
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        session_id: row.get("session_id"),
        submitted_at: parse_ts(row.get("submitted_at"))?,
        started_at: row
            .get::<Option<String>, _>("started_at")
            .map(|s| parse_ts(s))
            .transpose()?,
        completed_at: row
            .get::<Option<String>, _>("completed_at")
            .map(|s| parse_ts(s))
            .transpose()?,
        updated_at: parse_ts(row.get("updated_at"))?,
        deadline: row
            .get::<Option<String>, _>("deadline")
            .map(|s| parse_ts(s))
            .transpose()?,
        estimated_duration_seconds: row.get("estimated_duration_seconds"),
        input_data: serde_json::from_str(&input_data_str)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        result: result_str
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        execution_timeout_seconds: row.get("execution_timeout_seconds"),
        calculated_priority: row.get("calculated_priority"),
        dependency_depth: row.get("dependency_depth"),
    })
}

fn parse_ts(s: String) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_edge_row(row: &SqliteRow) -> StoreResult<DependencyEdge> {
    let kind_str: String = row.get("kind");
    Ok(DependencyEdge {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        dependent_id: Uuid::parse_str(&row.get::<String, _>("dependent_id"))
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        prerequisite_id: Uuid::parse_str(&row.get::<String, _>("prerequisite_id"))
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        kind: kind_str
            .parse()
            .map_err(|e: crate::errors::QueueError| StoreError::Serialization(e.to_string()))?,
        created_at: parse_ts(row.get("created_at"))?,
        resolved_at: row
            .get::<Option<String>, _>("resolved_at")
            .map(parse_ts)
            .transpose()?,
    })
}

pub async fn insert_task(conn: &mut SqliteConnection, task: &Task) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tasks (
            id, description, summary, agent_type, base_priority, status, source,
            parent_task_id, session_id, submitted_at, started_at, completed_at,
            updated_at, deadline, estimated_duration_seconds, input_data, result,
            error_message, retry_count, max_retries, execution_timeout_seconds,
            calculated_priority, dependency_depth
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task.id.to_string())
    .bind(&task.description)
    .bind(&task.summary)
    .bind(&task.agent_type)
    .bind(task.base_priority)
    .bind(task.status.as_str())
    .bind(task.source.as_str())
    .bind(task.parent_task_id.map(|id| id.to_string()))
    .bind(&task.session_id)
    .bind(task.submitted_at.to_rfc3339())
    .bind(task.started_at.map(|t| t.to_rfc3339()))
    .bind(task.completed_at.map(|t| t.to_rfc3339()))
    .bind(task.updated_at.to_rfc3339())
    .bind(task.deadline.map(|t| t.to_rfc3339()))
    .bind(task.estimated_duration_seconds)
    .bind(serde_json::to_string(&task.input_data).map_err(|e| StoreError::Serialization(e.to_string()))?)
    .bind(
        task.result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
    )
    .bind(&task.error_message)
    .bind(task.retry_count)
    .bind(task.max_retries)
    .bind(task.execution_timeout_seconds)
    .bind(task.calculated_priority)
    .bind(task.dependency_depth)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_task(conn: &mut SqliteConnection, id: Uuid) -> StoreResult<Task> {
    let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    parse_task_row(&row)
}

pub async fn task_exists(conn: &mut SqliteConnection, id: Uuid) -> StoreResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}

pub async fn update_task(
    conn: &mut SqliteConnection,
    id: Uuid,
    patch: &TaskPatch,
) -> StoreResult<()> {
    // Small fixed set of optionally-updated columns; built as a single
    // UPDATE so the whole patch applies atomically within the caller's
    // transaction.
    let mut sets: Vec<String> = vec!["updated_at = ?".to_string()];
    if patch.status.is_some() {
        sets.push("status = ?".to_string());
    }
    if patch.started_at.is_some() {
        sets.push("started_at = ?".to_string());
    }
    if patch.completed_at.is_some() {
        sets.push("completed_at = ?".to_string());
    }
    if patch.result.is_some() {
        sets.push("result = ?".to_string());
    }
    if patch.error_message.is_some() {
        sets.push("error_message = ?".to_string());
    }
    if patch.retry_count.is_some() {
        sets.push("retry_count = ?".to_string());
    }
    if patch.calculated_priority.is_some() {
        sets.push("calculated_priority = ?".to_string());
    }
    if patch.dependency_depth.is_some() {
        sets.push("dependency_depth = ?".to_string());
    }

    let sql = format!("UPDATE tasks SET {} WHERE id = ?", sets.join(", "));
    let mut q = sqlx::query(&sql).bind(Utc::now().to_rfc3339());
    if let Some(status) = patch.status {
        q = q.bind(status.as_str());
    }
    if let Some(started_at) = &patch.started_at {
        q = q.bind(started_at.map(|t| t.to_rfc3339()));
    }
    if let Some(completed_at) = &patch.completed_at {
        q = q.bind(completed_at.map(|t| t.to_rfc3339()));
    }
    if let Some(result) = &patch.result {
        q = q.bind(
            result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
        );
    }
    if let Some(error_message) = &patch.error_message {
        q = q.bind(error_message.clone());
    }
    if let Some(retry_count) = patch.retry_count {
        q = q.bind(retry_count);
    }
    if let Some(calculated_priority) = patch.calculated_priority {
        q = q.bind(calculated_priority);
    }
    if let Some(dependency_depth) = patch.dependency_depth {
        q = q.bind(dependency_depth);
    }
    q = q.bind(id.to_string());

    let result = q.execute(conn).await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}

pub async fn list_tasks(
    conn: &mut SqliteConnection,
    filter: &TaskFilter,
    limit: i64,
) -> StoreResult<Vec<Task>> {
    let mut sql = "SELECT * FROM tasks WHERE 1=1".to_string();
    let mut binds: Vec<String> = Vec::new();

    if let Some(status) = filter.status {
        sql.push_str(" AND status = ?");
        binds.push(status.as_str().to_string());
    }
    if let Some(source) = filter.source {
        sql.push_str(" AND source = ?");
        binds.push(source.as_str().to_string());
    }
    if let Some(agent_type) = &filter.agent_type {
        sql.push_str(" AND agent_type = ?");
        binds.push(agent_type.clone());
    }
    sql.push_str(" ORDER BY calculated_priority DESC, submitted_at ASC LIMIT ?");

    let mut q = sqlx::query(&sql);
    for b in &binds {
        q = q.bind(b);
    }
    q = q.bind(limit);

    let rows = q.fetch_all(conn).await?;
    rows.iter().map(parse_task_row).collect()
}

pub async fn all_tasks(conn: &mut SqliteConnection) -> StoreResult<Vec<Task>> {
    let rows = sqlx::query("SELECT * FROM tasks").fetch_all(conn).await?;
    rows.iter().map(parse_task_row).collect()
}

pub async fn insert_edge(
    conn: &mut SqliteConnection,
    dependent_id: Uuid,
    prerequisite_id: Uuid,
    kind: DependencyKind,
) -> StoreResult<DependencyEdge> {
    let edge = DependencyEdge {
        id: Uuid::new_v4(),
        dependent_id,
        prerequisite_id,
        kind,
        created_at: Utc::now(),
        resolved_at: None,
    };
    sqlx::query(
        r#"
        INSERT INTO task_dependencies (id, dependent_id, prerequisite_id, kind, created_at, resolved_at)
        VALUES (?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(edge.id.to_string())
    .bind(edge.dependent_id.to_string())
    .bind(edge.prerequisite_id.to_string())
    .bind(edge.kind.as_str())
    .bind(edge.created_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(edge)
}

pub async fn resolve_edges_of_prerequisite(
    conn: &mut SqliteConnection,
    prerequisite_id: Uuid,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query(
        "UPDATE task_dependencies SET resolved_at = ? WHERE prerequisite_id = ? AND resolved_at IS NULL",
    )
    .bind(at.to_rfc3339())
    .bind(prerequisite_id.to_string())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn unresolved_edges_of_dependent(
    conn: &mut SqliteConnection,
    dependent_id: Uuid,
) -> StoreResult<Vec<DependencyEdge>> {
    let rows = sqlx::query(
        "SELECT * FROM task_dependencies WHERE dependent_id = ? AND resolved_at IS NULL",
    )
    .bind(dependent_id.to_string())
    .fetch_all(conn)
    .await?;
    rows.iter().map(parse_edge_row).collect()
}

pub async fn edges_by_prerequisite(
    conn: &mut SqliteConnection,
    prerequisite_id: Uuid,
) -> StoreResult<Vec<DependencyEdge>> {
    let rows = sqlx::query("SELECT * FROM task_dependencies WHERE prerequisite_id = ?")
        .bind(prerequisite_id.to_string())
        .fetch_all(conn)
        .await?;
    rows.iter().map(parse_edge_row).collect()
}

pub async fn edges_by_dependent(
    conn: &mut SqliteConnection,
    dependent_id: Uuid,
) -> StoreResult<Vec<DependencyEdge>> {
    let rows = sqlx::query("SELECT * FROM task_dependencies WHERE dependent_id = ?")
        .bind(dependent_id.to_string())
        .fetch_all(conn)
        .await?;
    rows.iter().map(parse_edge_row).collect()
}

pub async fn all_edges(conn: &mut SqliteConnection) -> StoreResult<Vec<DependencyEdge>> {
    let rows = sqlx::query("SELECT * FROM task_dependencies")
        .fetch_all(conn)
        .await?;
    rows.iter().map(parse_edge_row).collect()
}

pub async fn record_event(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    from_status: Option<TaskStatus>,
    to_status: TaskStatus,
    detail: Option<&str>,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO task_events (task_id, from_status, to_status, occurred_at, detail) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(task_id.to_string())
    .bind(from_status.map(|s| s.as_str()))
    .bind(to_status.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(detail)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn queue_status(
    conn: &mut SqliteConnection,
) -> StoreResult<crate::types::QueueStatus> {
    use crate::types::QueueStatus;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
        .fetch_one(&mut *conn)
        .await?;

    let mut counts = [0i64; 7];
    let statuses = [
        TaskStatus::Pending,
        TaskStatus::Blocked,
        TaskStatus::Ready,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];
    for (i, status) in statuses.iter().enumerate() {
        let c: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&mut *conn)
            .await?;
        counts[i] = c;
    }

    let average_calculated_priority: Option<f64> =
        sqlx::query_scalar("SELECT AVG(calculated_priority) FROM tasks")
            .fetch_one(&mut *conn)
            .await?;

    let max_depth: Option<i64> = sqlx::query_scalar("SELECT MAX(dependency_depth) FROM tasks")
        .fetch_one(&mut *conn)
        .await?;

    let oldest_non_terminal: Option<String> = sqlx::query_scalar(
        "SELECT MIN(submitted_at) FROM tasks WHERE status NOT IN ('completed', 'failed', 'cancelled')",
    )
    .fetch_one(&mut *conn)
    .await?;

    let newest: Option<String> = sqlx::query_scalar("SELECT MAX(submitted_at) FROM tasks")
        .fetch_one(&mut *conn)
        .await?;

    Ok(QueueStatus {
        total,
        pending: counts[0],
        blocked: counts[1],
        ready: counts[2],
        running: counts[3],
        completed: counts[4],
        failed: counts[5],
        cancelled: counts[6],
        average_calculated_priority: average_calculated_priority.unwrap_or(0.0),
        max_depth: max_depth.unwrap_or(0),
        oldest_non_terminal_submitted_at: oldest_non_terminal.map(|s| parse_ts(s)).transpose()?,
        newest_submitted_at: newest.map(|s| parse_ts(s)).transpose()?,
    })
}

/// Deletes terminal tasks matching `filter` along with their edges and
/// events. Never touches a non-terminal task, regardless of filter.
pub async fn prune_tasks(conn: &mut SqliteConnection, filter: &PruneFilter) -> StoreResult<u64> {
    let terminal = [
        TaskStatus::Completed.as_str(),
        TaskStatus::Failed.as_str(),
        TaskStatus::Cancelled.as_str(),
    ];
    let statuses: Vec<&str> = if filter.statuses.is_empty() {
        terminal.to_vec()
    } else {
        filter
            .statuses
            .iter()
            .map(TaskStatus::as_str)
            .filter(|s| terminal.contains(s))
            .collect()
    };
    if statuses.is_empty() {
        return Ok(0);
    }

    let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let mut sql = format!("SELECT id FROM tasks WHERE status IN ({placeholders})");
    if filter.older_than.is_some() {
        sql.push_str(" AND updated_at < ?");
    }

    let mut q = sqlx::query_scalar::<_, String>(&sql);
    for s in &statuses {
        q = q.bind(*s);
    }
    if let Some(older_than) = filter.older_than {
        q = q.bind(older_than.to_rfc3339());
    }
    let ids: Vec<String> = q.fetch_all(&mut *conn).await?;

    for id in &ids {
        sqlx::query("DELETE FROM task_events WHERE task_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM task_dependencies WHERE dependent_id = ? OR prerequisite_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(ids.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskSource;

    fn sample_task(status: TaskStatus) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            description: "do the thing".to_string(),
            summary: None,
            agent_type: "requirements-gatherer".to_string(),
            base_priority: 5.0,
            status,
            source: TaskSource::Human,
            parent_task_id: None,
            session_id: None,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            deadline: None,
            estimated_duration_seconds: None,
            input_data: serde_json::json!({}),
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: 0,
            execution_timeout_seconds: 3600,
            calculated_priority: 50.0,
            dependency_depth: 0,
        }
    }

    async fn memory_store() -> Store {
        Store::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_get_task_round_trips() {
        let store = memory_store().await;
        let task = sample_task(TaskStatus::Ready);
        let mut tx = store.begin().await.unwrap();
        insert_task(&mut tx, &task).await.unwrap();
        let fetched = get_task(&mut tx, task.id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(fetched.id, task.id);
        assert_eq!(fetched.description, task.description);
        assert_eq!(fetched.status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn get_missing_task_is_not_found() {
        let store = memory_store().await;
        let mut tx = store.begin().await.unwrap();
        let err = get_task(&mut tx, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_task_patch_applies_only_set_fields() {
        let store = memory_store().await;
        let task = sample_task(TaskStatus::Blocked);
        let mut tx = store.begin().await.unwrap();
        insert_task(&mut tx, &task).await.unwrap();

        let patch = TaskPatch {
            status: Some(TaskStatus::Ready),
            ..Default::default()
        };
        update_task(&mut tx, task.id, &patch).await.unwrap();
        let fetched = get_task(&mut tx, task.id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(fetched.status, TaskStatus::Ready);
        assert_eq!(fetched.base_priority, task.base_priority);
    }

    #[tokio::test]
    async fn edges_resolve_and_query_by_endpoint() {
        let store = memory_store().await;
        let a = sample_task(TaskStatus::Ready);
        let b = sample_task(TaskStatus::Blocked);
        let mut tx = store.begin().await.unwrap();
        insert_task(&mut tx, &a).await.unwrap();
        insert_task(&mut tx, &b).await.unwrap();
        insert_edge(&mut tx, b.id, a.id, DependencyKind::Sequential)
            .await
            .unwrap();

        let unresolved = unresolved_edges_of_dependent(&mut tx, b.id).await.unwrap();
        assert_eq!(unresolved.len(), 1);

        resolve_edges_of_prerequisite(&mut tx, a.id, Utc::now())
            .await
            .unwrap();
        let unresolved = unresolved_edges_of_dependent(&mut tx, b.id).await.unwrap();
        assert!(unresolved.is_empty());

        let by_prereq = edges_by_prerequisite(&mut tx, a.id).await.unwrap();
        assert_eq!(by_prereq.len(), 1);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn list_tasks_filters_by_status() {
        let store = memory_store().await;
        let a = sample_task(TaskStatus::Ready);
        let b = sample_task(TaskStatus::Blocked);
        let mut tx = store.begin().await.unwrap();
        insert_task(&mut tx, &a).await.unwrap();
        insert_task(&mut tx, &b).await.unwrap();

        let filter = TaskFilter {
            status: Some(TaskStatus::Ready),
            ..Default::default()
        };
        let ready = list_tasks(&mut tx, &filter, 50).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, a.id);
    }

    #[tokio::test]
    async fn prune_removes_only_terminal_tasks() {
        let store = memory_store().await;
        let done = sample_task(TaskStatus::Completed);
        let running = sample_task(TaskStatus::Running);
        let mut tx = store.begin().await.unwrap();
        insert_task(&mut tx, &done).await.unwrap();
        insert_task(&mut tx, &running).await.unwrap();

        let pruned = prune_tasks(&mut tx, &PruneFilter::default()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(pruned, 1);
        let mut tx = store.begin().await.unwrap();
        assert!(!task_exists(&mut tx, done.id).await.unwrap());
        assert!(task_exists(&mut tx, running.id).await.unwrap());
    }

    #[tokio::test]
    async fn migrations_are_idempotent_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let path_str = path.to_str().unwrap();

        let store1 = Store::new(path_str).await.unwrap();
        drop(store1);
        // Reopening an already-migrated file must not error, and the
        // `summary` column (added in migration 2) must already exist.
        let store2 = Store::new(path_str).await.unwrap();
        let mut tx = store2.begin().await.unwrap();
        let task = sample_task(TaskStatus::Ready);
        insert_task(&mut tx, &task).await.unwrap();
        let fetched = get_task(&mut tx, task.id).await.unwrap();
        assert!(fetched.summary.is_none());
    }
}
