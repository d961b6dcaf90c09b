pub mod task_manager;

pub use task_manager::{LogRecord, TaskLog, TaskManager, TaskPayload, TaskReport, TaskStatus};
