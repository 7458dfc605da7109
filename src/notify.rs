use std::{collections::VecDeque, sync::Mutex};

use anyhow::{anyhow, Result};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Notification, NotificationKind};

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<()>;
}

/// Delivers a notification, logging instead of propagating any failure.
pub fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    let analysis_id = notification.analysis_id.clone();
    if let Err(err) = notifier.notify(notification) {
        warn!(job_id = %analysis_id, "Failed to deliver notification: {err:#}");
    }
}

pub fn success_notification(analysis_id: &str, file_path: &str) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        kind: NotificationKind::Success,
        analysis_id: analysis_id.to_string(),
        file_path: file_path.to_string(),
        title: "Analysis complete".to_string(),
        message: format!("Analysis of {file_path} finished"),
        created_at: Utc::now(),
    }
}

pub fn failure_notification(analysis_id: &str, file_path: &str, message: &str) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        kind: NotificationKind::Failure,
        analysis_id: analysis_id.to_string(),
        file_path: file_path.to_string(),
        title: "Analysis failed".to_string(),
        message: message.to_string(),
        created_at: Utc::now(),
    }
}

/// Bounded in-memory feed that UI collaborators poll. Oldest entries are
/// dropped once `capacity` is reached.
#[derive(Debug)]
pub struct NotificationFeed {
    capacity: usize,
    items: Mutex<VecDeque<Notification>>,
}

impl NotificationFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn list(&self) -> Vec<Notification> {
        self.items
            .lock()
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Notifier for NotificationFeed {
    fn notify(&self, notification: Notification) -> Result<()> {
        info!(
            job_id = %notification.analysis_id,
            kind = ?notification.kind,
            message = %notification.message,
            "{}",
            notification.title
        );

        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("notification feed lock poisoned"))?;
        items.push_back(notification);
        while items.len() > self.capacity {
            items.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _notification: Notification) -> Result<()> {
            Err(anyhow!("display unavailable"))
        }
    }

    #[test]
    fn feed_keeps_newest_entries() {
        let feed = NotificationFeed::new(2);
        for id in ["J1", "J2", "J3"] {
            feed.notify(success_notification(id, "a.edf")).expect("notify");
        }

        let ids: Vec<String> = feed.list().into_iter().map(|n| n.analysis_id).collect();
        assert_eq!(ids, vec!["J2".to_string(), "J3".to_string()]);
    }

    #[test]
    fn best_effort_swallows_failures() {
        notify_best_effort(&FailingNotifier, failure_notification("J1", "a.edf", "boom"));
    }

    #[test]
    fn failure_notification_carries_engine_message() {
        let notification = failure_notification("J9", "b.edf", "out of memory");
        assert_eq!(notification.kind, NotificationKind::Failure);
        assert_eq!(notification.message, "out of memory");
        assert_eq!(notification.file_path, "b.edf");
    }
}
