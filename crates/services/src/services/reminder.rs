use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use chrono::{Days, NaiveDate, NaiveDateTime};
use db::models::task::{Task, TaskStatus};
use serde::Serialize;
use ts_rs::TS;

use super::{
    clock::Clock,
    config::{NotificationConfig, ReminderConfig},
    notification::{Notification, Notifier},
};

const SECONDS_PER_HOUR: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    DueToday,
    DueTomorrow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub task_id: String,
    pub title: String,
    pub due_date: NaiveDate,
    pub kind: ReminderKind,
    /// Whole hours left, rounded up. Only set for [`ReminderKind::DueToday`].
    pub hours_remaining: Option<u32>,
}

impl Reminder {
    pub fn to_notification(&self, config: &ReminderConfig) -> Notification {
        let (title, description) = match (self.kind, self.hours_remaining) {
            (ReminderKind::DueToday, Some(hours)) => (
                "Task Due Today",
                format!(
                    "{} is due in {hours} {}",
                    self.title,
                    if hours == 1 { "hour" } else { "hours" }
                ),
            ),
            (ReminderKind::DueToday, None) => ("Task Due Today", self.title.clone()),
            (ReminderKind::DueTomorrow, _) => ("Task Due Tomorrow", self.title.clone()),
        };
        Notification::info(title, description).with_duration(config.toast_duration())
    }
}

/// Decides which tasks warrant a due-soon reminder at `now` (local wall
/// clock). Completed tasks never do. A task due tomorrow always does; a task
/// due today does once at most `look_ahead_hours` remain and the due moment
/// has not passed.
pub fn evaluate(tasks: &[Task], now: NaiveDateTime, config: &ReminderConfig) -> Vec<Reminder> {
    let today = now.date();
    let tomorrow = today.checked_add_days(Days::new(1));
    let look_ahead_secs = i64::from(config.look_ahead_hours) * SECONDS_PER_HOUR;

    tasks
        .iter()
        .filter(|task| task.status != TaskStatus::Completed)
        .filter_map(|task| {
            if task.due_date == today {
                let remaining = (task.due_at() - now).num_seconds();
                if !(0..=look_ahead_secs).contains(&remaining) {
                    return None;
                }
                let hours = (remaining + SECONDS_PER_HOUR - 1) / SECONDS_PER_HOUR;
                Some(Reminder {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    due_date: task.due_date,
                    kind: ReminderKind::DueToday,
                    hours_remaining: u32::try_from(hours).ok(),
                })
            } else if Some(task.due_date) == tomorrow {
                Some(Reminder {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    due_date: task.due_date,
                    kind: ReminderKind::DueTomorrow,
                    hours_remaining: None,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Remembers which (task, due date, kind) reminders were already shown.
#[derive(Debug, Default)]
pub struct ReminderTracker {
    seen: HashSet<(String, NaiveDate, ReminderKind)>,
}

impl ReminderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only reminders not seen before and marks them seen.
    pub fn retain_new(&mut self, reminders: Vec<Reminder>) -> Vec<Reminder> {
        reminders
            .into_iter()
            .filter(|reminder| {
                self.seen
                    .insert((reminder.task_id.clone(), reminder.due_date, reminder.kind))
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Runs [`evaluate`] against each projected snapshot and raises the
/// resulting reminders as notifications.
#[derive(Clone)]
pub struct ReminderService {
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    config: ReminderConfig,
    enabled: bool,
    tracker: Arc<Mutex<ReminderTracker>>,
}

impl ReminderService {
    pub fn new(
        clock: Arc<dyn Clock>,
        notifier: Notifier,
        config: ReminderConfig,
        notifications: &NotificationConfig,
    ) -> Self {
        Self {
            clock,
            notifier,
            config,
            enabled: notifications.enabled,
            tracker: Arc::new(Mutex::new(ReminderTracker::new())),
        }
    }

    /// Returns the reminders that were raised.
    pub fn on_snapshot(&self, tasks: &[Task]) -> Vec<Reminder> {
        if !self.enabled {
            return Vec::new();
        }
        let mut reminders = evaluate(tasks, self.clock.now_local(), &self.config);
        if self.config.dedupe {
            let mut tracker = self.tracker.lock().unwrap_or_else(|err| err.into_inner());
            reminders = tracker.retain_new(reminders);
        }
        for reminder in &reminders {
            tracing::debug!(
                task_id = reminder.task_id.as_str(),
                kind = ?reminder.kind,
                "raising reminder"
            );
            self.notifier.notify(reminder.to_notification(&self.config));
        }
        reminders
    }

    /// Forgets shown reminders, e.g. when the signed-in identity changes.
    pub fn reset(&self) {
        self.tracker
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{NaiveTime, Utc};
    use db::models::task::TaskPriority;

    use super::*;
    use crate::services::clock::FixedClock;

    fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
        date.and_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 10).unwrap()
    }

    fn task(id: &str, due_date: NaiveDate, due_time: Option<NaiveTime>) -> Task {
        Task {
            id: id.to_string(),
            title: format!("task {id}"),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date,
            start_time: None,
            due_time,
            assigned_to: "user".to_string(),
            created_by: "alice".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn due_today_only_inside_look_ahead_window() {
        let config = ReminderConfig::default();
        let tasks = vec![task("late", day(), NaiveTime::from_hms_opt(23, 0, 0))];

        let evening = evaluate(&tasks, at(day(), 22, 0), &config);
        assert_eq!(evening.len(), 1);
        assert_eq!(evening[0].kind, ReminderKind::DueToday);
        assert_eq!(evening[0].hours_remaining, Some(1));

        assert!(evaluate(&tasks, at(day(), 10, 0), &config).is_empty());
    }

    #[test]
    fn hours_round_up_and_past_due_is_skipped() {
        let config = ReminderConfig::default();
        let tasks = vec![task("t", day(), NaiveTime::from_hms_opt(17, 0, 0))];

        let reminders = evaluate(&tasks, at(day(), 15, 30), &config);
        assert_eq!(reminders[0].hours_remaining, Some(2));

        assert!(evaluate(&tasks, at(day(), 17, 1), &config).is_empty());
    }

    #[test]
    fn missing_due_time_means_end_of_day() {
        let config = ReminderConfig::default();
        let tasks = vec![task("t", day(), None)];

        assert!(evaluate(&tasks, at(day(), 12, 0), &config).is_empty());
        let reminders = evaluate(&tasks, at(day(), 22, 30), &config);
        assert_eq!(reminders[0].hours_remaining, Some(2));
    }

    #[test]
    fn due_tomorrow_regardless_of_hour() {
        let config = ReminderConfig::default();
        let tomorrow = day().succ_opt().unwrap();
        let tasks = vec![
            task("soon", tomorrow, NaiveTime::from_hms_opt(8, 0, 0)),
            task("later", tomorrow.succ_opt().unwrap(), None),
        ];

        for now in [at(day(), 0, 5), at(day(), 23, 55)] {
            let reminders = evaluate(&tasks, now, &config);
            assert_eq!(reminders.len(), 1);
            assert_eq!(reminders[0].task_id, "soon");
            assert_eq!(reminders[0].kind, ReminderKind::DueTomorrow);
        }
    }

    #[test]
    fn completed_tasks_are_ignored() {
        let config = ReminderConfig::default();
        let mut done = task("done", day().succ_opt().unwrap(), None);
        done.status = TaskStatus::Completed;
        assert!(evaluate(&[done], at(day(), 9, 0), &config).is_empty());
    }

    #[test]
    fn tracker_drops_repeats() {
        let mut tracker = ReminderTracker::new();
        let tasks = vec![task("t", day().succ_opt().unwrap(), None)];
        let config = ReminderConfig::default();

        let first = tracker.retain_new(evaluate(&tasks, at(day(), 9, 0), &config));
        let second = tracker.retain_new(evaluate(&tasks, at(day(), 9, 5), &config));
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn service_notifies_once_with_toast_duration() {
        let clock = Arc::new(FixedClock::new(at(day(), 9, 0)));
        let notifier = Notifier::new();
        let mut toasts = notifier.subscribe();
        let service = ReminderService::new(
            clock,
            notifier,
            ReminderConfig::default(),
            &NotificationConfig::default(),
        );
        let tasks = vec![task("t", day().succ_opt().unwrap(), None)];

        assert_eq!(service.on_snapshot(&tasks).len(), 1);
        assert!(service.on_snapshot(&tasks).is_empty());

        let toast = toasts.try_recv().unwrap();
        assert_eq!(toast.title, "Task Due Tomorrow");
        assert_eq!(toast.description, "task t");
        assert_eq!(toast.duration, Some(Duration::from_millis(5000)));
        assert!(toasts.try_recv().is_err());
    }

    #[test]
    fn disabled_notifications_raise_nothing() {
        let clock = Arc::new(FixedClock::new(at(day(), 9, 0)));
        let notifications = NotificationConfig {
            enabled: false,
            ..NotificationConfig::default()
        };
        let service = ReminderService::new(
            clock,
            Notifier::new(),
            ReminderConfig::default(),
            &notifications,
        );
        let tasks = vec![task("t", day().succ_opt().unwrap(), None)];
        assert!(service.on_snapshot(&tasks).is_empty());
    }
}
