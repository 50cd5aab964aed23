use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shipqueue_domain::{Condition, QueueItem, QueueItemFilter, QueueItemStatus, QueueStorage};
use shipqueue_errors::{QueueError, QueueResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info, instrument};

use super::map_sqlx_error;

const COLUMNS: &str = "id, queue_name, context, task_type, serialized_task, status, priority, \
     retries, max_attempts, progress_base_points, failure_description, runner_id, created_at, \
     scheduled_at, queued_at, started_at, finished_at, last_update_at";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_name TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '',
    task_type TEXT NOT NULL,
    serialized_task TEXT NOT NULL,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    retries INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    progress_base_points INTEGER NOT NULL DEFAULT 0,
    failure_description TEXT,
    runner_id TEXT,
    created_at INTEGER NOT NULL,
    scheduled_at INTEGER NOT NULL,
    queued_at INTEGER,
    started_at INTEGER,
    finished_at INTEGER,
    last_update_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_queue_items_status_queue ON queue_items (status, queue_name);
CREATE INDEX IF NOT EXISTS idx_queue_items_scheduled_at ON queue_items (status, scheduled_at);
"#;

/// SQLite队列存储
///
/// 时间戳以UTC微秒整数保存，条件写入通过带前置条件的单条 `UPDATE` 实现。
#[derive(Clone)]
pub struct SqliteQueueStorage {
    pool: SqlitePool,
}

impl SqliteQueueStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 连接数据库并初始化表结构
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connection_timeout: Duration,
    ) -> QueueResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| QueueError::config_error(format!("无效的SQLite连接串 {url}: {e}")))?
            .create_if_missing(true)
            .busy_timeout(connection_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connection_timeout)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        let storage = Self::new(pool);
        storage.initialize_schema().await?;
        info!(url = url, "SQLite队列存储已就绪");
        Ok(storage)
    }

    pub async fn initialize_schema(&self) -> QueueResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_item(row: &SqliteRow) -> QueueResult<QueueItem> {
        let status: String = row.try_get("status").map_err(map_sqlx_error)?;
        let payload: String = row.try_get("serialized_task").map_err(map_sqlx_error)?;

        Ok(QueueItem {
            id: Some(row.try_get("id").map_err(map_sqlx_error)?),
            queue_name: row.try_get("queue_name").map_err(map_sqlx_error)?,
            context: row.try_get("context").map_err(map_sqlx_error)?,
            task_type: row.try_get("task_type").map_err(map_sqlx_error)?,
            serialized_task: serde_json::from_str(&payload)?,
            status: QueueItemStatus::from_str(&status)?,
            priority: get_i64(row, "priority")? as i32,
            retries: to_u32(get_i64(row, "retries")?, "retries")?,
            max_attempts: to_u32(get_i64(row, "max_attempts")?, "max_attempts")?,
            progress_base_points: to_u32(
                get_i64(row, "progress_base_points")?,
                "progress_base_points",
            )?,
            failure_description: row
                .try_get("failure_description")
                .map_err(map_sqlx_error)?,
            runner_id: row.try_get("runner_id").map_err(map_sqlx_error)?,
            created_at: from_micros(get_i64(row, "created_at")?)?,
            scheduled_at: from_micros(get_i64(row, "scheduled_at")?)?,
            queued_at: get_optional_time(row, "queued_at")?,
            started_at: get_optional_time(row, "started_at")?,
            finished_at: get_optional_time(row, "finished_at")?,
            last_update_at: from_micros(get_i64(row, "last_update_at")?)?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &QueueItemFilter) {
        builder.push(" WHERE 1 = 1");
        if !filter.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut separated = builder.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        if let Some(queue_name) = &filter.queue_name {
            builder.push(" AND queue_name = ").push_bind(queue_name.clone());
        }
        if let Some(task_type) = &filter.task_type {
            builder.push(" AND task_type = ").push_bind(task_type.clone());
        }
        if let Some(context) = &filter.context {
            builder.push(" AND context = ").push_bind(context.clone());
        }
        if let Some(at) = filter.scheduled_before {
            builder
                .push(" AND scheduled_at <= ")
                .push_bind(at.timestamp_micros());
        }
        if let Some(at) = filter.last_update_before {
            builder
                .push(" AND last_update_at < ")
                .push_bind(at.timestamp_micros());
        }
        if let Some(at) = filter.finished_before {
            builder
                .push(" AND finished_at IS NOT NULL AND finished_at < ")
                .push_bind(at.timestamp_micros());
        }
    }

    async fn insert(&self, item: &QueueItem) -> QueueResult<QueueItem> {
        let result = sqlx::query(
            r#"
            INSERT INTO queue_items (queue_name, context, task_type, serialized_task, status,
                                     priority, retries, max_attempts, progress_base_points,
                                     failure_description, runner_id, created_at, scheduled_at,
                                     queued_at, started_at, finished_at, last_update_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.queue_name)
        .bind(&item.context)
        .bind(&item.task_type)
        .bind(serde_json::to_string(&item.serialized_task)?)
        .bind(item.status.as_str())
        .bind(i64::from(item.priority))
        .bind(i64::from(item.retries))
        .bind(i64::from(item.max_attempts))
        .bind(i64::from(item.progress_base_points))
        .bind(&item.failure_description)
        .bind(&item.runner_id)
        .bind(item.created_at.timestamp_micros())
        .bind(item.scheduled_at.timestamp_micros())
        .bind(item.queued_at.map(|t| t.timestamp_micros()))
        .bind(item.started_at.map(|t| t.timestamp_micros()))
        .bind(item.finished_at.map(|t| t.timestamp_micros()))
        .bind(item.last_update_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut created = item.clone();
        created.id = Some(result.last_insert_rowid());
        debug!(queue_item.id = ?created.id, "SQLite存储插入队列项");
        Ok(created)
    }

    async fn update(
        &self,
        id: i64,
        item: &QueueItem,
        conditions: &[Condition],
    ) -> QueueResult<QueueItem> {
        let payload = serde_json::to_string(&item.serialized_task)?;

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("UPDATE queue_items SET ");
        {
            let mut set = builder.separated(", ");
            set.push("queue_name = ").push_bind_unseparated(item.queue_name.clone());
            set.push("context = ").push_bind_unseparated(item.context.clone());
            set.push("task_type = ").push_bind_unseparated(item.task_type.clone());
            set.push("serialized_task = ").push_bind_unseparated(payload);
            set.push("status = ").push_bind_unseparated(item.status.as_str());
            set.push("priority = ").push_bind_unseparated(i64::from(item.priority));
            set.push("retries = ").push_bind_unseparated(i64::from(item.retries));
            set.push("max_attempts = ").push_bind_unseparated(i64::from(item.max_attempts));
            set.push("progress_base_points = ")
                .push_bind_unseparated(i64::from(item.progress_base_points));
            set.push("failure_description = ")
                .push_bind_unseparated(item.failure_description.clone());
            set.push("runner_id = ").push_bind_unseparated(item.runner_id.clone());
            set.push("created_at = ").push_bind_unseparated(item.created_at.timestamp_micros());
            set.push("scheduled_at = ").push_bind_unseparated(item.scheduled_at.timestamp_micros());
            set.push("queued_at = ")
                .push_bind_unseparated(item.queued_at.map(|t| t.timestamp_micros()));
            set.push("started_at = ")
                .push_bind_unseparated(item.started_at.map(|t| t.timestamp_micros()));
            set.push("finished_at = ")
                .push_bind_unseparated(item.finished_at.map(|t| t.timestamp_micros()));
            set.push("last_update_at = ")
                .push_bind_unseparated(item.last_update_at.timestamp_micros());
        }
        builder.push(" WHERE id = ").push_bind(id);
        for condition in conditions {
            match condition {
                Condition::Status(status) => {
                    builder.push(" AND status = ").push_bind(status.as_str());
                }
                Condition::LastUpdateAt(at) => {
                    builder
                        .push(" AND last_update_at = ")
                        .push_bind(at.timestamp_micros());
                }
                Condition::NoOtherRunningInQueue => {
                    builder
                        .push(
                            " AND NOT EXISTS (SELECT 1 FROM queue_items r \
                             WHERE r.status = 'running' AND r.queue_name = ",
                        )
                        .push_bind(item.queue_name.clone())
                        .push(" AND r.id <> ")
                        .push_bind(id)
                        .push(")");
                }
            }
        }

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(id).await? {
                Some(stored) => Err(QueueError::conflict(
                    Some(id),
                    format!("前置条件不成立，当前状态 {}", stored.status),
                )),
                None => Err(QueueError::item_not_found(id)),
            };
        }

        Ok(item.clone())
    }
}

#[async_trait]
impl QueueStorage for SqliteQueueStorage {
    #[instrument(skip(self))]
    async fn find_oldest_queued_per_queue(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM queue_items q
            WHERE q.status = 'queued'
              AND q.id = (
                  SELECT q2.id FROM queue_items q2
                  WHERE q2.queue_name = q.queue_name AND q2.status = 'queued'
                  ORDER BY q2.created_at ASC, q2.id ASC
                  LIMIT 1)
              AND NOT EXISTS (
                  SELECT 1 FROM queue_items r
                  WHERE r.queue_name = q.queue_name AND r.status = 'running')
            ORDER BY q.priority DESC, q.created_at ASC, q.id ASC
            LIMIT ?
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(Self::row_to_item).collect()
    }

    #[instrument(skip(self, item, conditions), fields(queue_item.id = ?item.id, status = %item.status))]
    async fn save_with_condition(
        &self,
        item: &QueueItem,
        conditions: &[Condition],
    ) -> QueueResult<QueueItem> {
        match item.id {
            None => self.insert(item).await,
            Some(id) => self.update(id, item, conditions).await,
        }
    }

    async fn delete_where(&self, filter: Option<&QueueItemFilter>) -> QueueResult<u64> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("DELETE FROM queue_items");
        if let Some(filter) = filter {
            Self::push_filter(&mut builder, filter);
        }
        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn find_by_id(&self, id: i64) -> QueueResult<Option<QueueItem>> {
        let sql = format!("SELECT {COLUMNS} FROM queue_items WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn find(&self, filter: &QueueItemFilter) -> QueueResult<Vec<QueueItem>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM queue_items"));
        Self::push_filter(&mut builder, filter);
        builder.push(" ORDER BY id ASC");
        if let Some(limit) = filter.limit {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(Self::row_to_item).collect()
    }

    async fn count(&self, filter: &QueueItemFilter) -> QueueResult<u64> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS total FROM queue_items");
        Self::push_filter(&mut builder, filter);

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let total = get_i64(&row, "total")?;
        Ok(u64::try_from(total).unwrap_or_default())
    }
}

fn get_i64(row: &SqliteRow, column: &str) -> QueueResult<i64> {
    row.try_get(column).map_err(map_sqlx_error)
}

fn get_optional_time(row: &SqliteRow, column: &str) -> QueueResult<Option<DateTime<Utc>>> {
    let value: Option<i64> = row.try_get(column).map_err(map_sqlx_error)?;
    value.map(from_micros).transpose()
}

fn to_u32(value: i64, column: &str) -> QueueResult<u32> {
    u32::try_from(value)
        .map_err(|_| QueueError::storage(format!("列 {column} 的值超出范围: {value}")))
}

fn from_micros(micros: i64) -> QueueResult<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| QueueError::storage(format!("无效的时间戳: {micros}")))
}
