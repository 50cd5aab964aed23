pub mod memory;
pub mod sqlite;

pub use memory::InMemoryQueueStorage;
pub use sqlite::SqliteQueueStorage;

use shipqueue_errors::QueueError;

/// 连接类错误视为存储暂不可用，其余按一般存储错误处理
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> QueueError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => QueueError::storage_unavailable(err.to_string()),
        sqlx::Error::Database(ref db) if db.message().contains("database is locked") => {
            QueueError::storage_unavailable(err.to_string())
        }
        other => QueueError::storage(other.to_string()),
    }
}
