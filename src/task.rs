//! A subscription request: watch one `(database, table)` pair for a
//! subset of event types and forward matching events to a callback URL.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::events::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u32,
    pub name: String,
    /// Empty means "match any database".
    pub database: String,
    /// Empty means "match any table".
    pub table: String,
    pub event_types: HashSet<EventType>,
    pub callback_url: String,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(id: u32, name: impl Into<String>, database: impl Into<String>, table: impl Into<String>, callback_url: impl Into<String>) -> Self {
        Task {
            id,
            name: name.into(),
            database: database.into(),
            table: table.into(),
            event_types: HashSet::from([EventType::Insert, EventType::Update, EventType::Delete]),
            callback_url: callback_url.into(),
            status: TaskStatus::Active,
        }
    }

    pub fn instance_id(&self) -> String {
        format!("task-{}", self.id)
    }

    pub fn wants(&self, event_type: EventType) -> bool {
        self.event_types.contains(&event_type)
    }

    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_is_task_prefixed() {
        let task = Task::new(7, "t", "db", "tbl", "http://x");
        assert_eq!(task.instance_id(), "task-7");
    }

    #[test]
    fn wants_defaults_to_all_event_types() {
        let task = Task::new(1, "t", "db", "tbl", "http://x");
        assert!(task.wants(EventType::Insert));
        assert!(task.wants(EventType::Update));
        assert!(task.wants(EventType::Delete));
    }

    #[test]
    fn wants_respects_restricted_subset() {
        let mut task = Task::new(1, "t", "db", "tbl", "http://x");
        task.event_types = HashSet::from([EventType::Insert]);
        assert!(task.wants(EventType::Insert));
        assert!(!task.wants(EventType::Update));
    }
}
