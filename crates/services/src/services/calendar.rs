use std::sync::Arc;

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime};
use db::models::task::{Task, TaskStatus};
use serde::Serialize;
use tokio::sync::watch;
use ts_rs::TS;

use super::{
    clock::Clock,
    mutation::{MutationError, TaskMutations},
    projection::Board,
};

/// Tasks listed inline in a grid cell before collapsing into "+N more".
pub const TASKS_PER_DAY: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub in_month: bool,
    pub is_today: bool,
    pub is_selected: bool,
    pub tasks: Vec<Task>,
    pub overflow: usize,
}

/// Task is past its due moment and not completed.
pub fn is_overdue(task: &Task, now: NaiveDateTime) -> bool {
    task.status != TaskStatus::Completed && task.due_at() < now
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn last_of_month(first: NaiveDate) -> NaiveDate {
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(first)
}

/// Month grid state: which month is shown and which day is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarView {
    month: NaiveDate,
    selected: NaiveDate,
}

impl CalendarView {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            month: first_of_month(today),
            selected: today,
        }
    }

    /// First day of the shown month.
    pub fn month(&self) -> NaiveDate {
        self.month
    }

    pub fn selected(&self) -> NaiveDate {
        self.selected
    }

    pub fn title(&self) -> String {
        self.month.format("%B %Y").to_string()
    }

    pub fn select(&mut self, date: NaiveDate) {
        self.selected = date;
    }

    pub fn next_month(&mut self) {
        if let Some(next) = self.month.checked_add_months(Months::new(1)) {
            self.month = next;
        }
    }

    pub fn prev_month(&mut self) {
        if let Some(prev) = self.month.checked_sub_months(Months::new(1)) {
            self.month = prev;
        }
    }

    /// Sunday on or before the 1st through Saturday on or after the last day.
    pub fn grid_dates(&self) -> Vec<NaiveDate> {
        let first = self.month;
        let last = last_of_month(first);
        let lead = u64::from(first.weekday().num_days_from_sunday());
        let trail = u64::from(6 - last.weekday().num_days_from_sunday());
        let start = first.checked_sub_days(Days::new(lead)).unwrap_or(first);
        let end = last.checked_add_days(Days::new(trail)).unwrap_or(last);
        start.iter_days().take_while(|day| *day <= end).collect()
    }

    pub fn grid(&self, tasks: &[Task], today: NaiveDate) -> Vec<CalendarDay> {
        self.grid_dates()
            .into_iter()
            .map(|date| {
                let due: Vec<&Task> = tasks.iter().filter(|task| task.due_date == date).collect();
                CalendarDay {
                    date,
                    in_month: date.month() == self.month.month() && date.year() == self.month.year(),
                    is_today: date == today,
                    is_selected: date == self.selected,
                    overflow: due.len().saturating_sub(TASKS_PER_DAY),
                    tasks: due.into_iter().take(TASKS_PER_DAY).cloned().collect(),
                }
            })
            .collect()
    }

    pub fn selected_tasks<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks
            .iter()
            .filter(|task| task.due_date == self.selected)
            .collect()
    }
}

/// Calendar screen over the projected board. Deletes go through the
/// mutation pipeline like every other write.
pub struct Calendar {
    view: CalendarView,
    board: watch::Receiver<Board>,
    mutations: TaskMutations,
    clock: Arc<dyn Clock>,
}

impl Calendar {
    pub fn new(board: watch::Receiver<Board>, mutations: TaskMutations, clock: Arc<dyn Clock>) -> Self {
        let today = clock.now_local().date();
        Self {
            view: CalendarView::new(today),
            board,
            mutations,
            clock,
        }
    }

    pub fn view(&self) -> &CalendarView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut CalendarView {
        &mut self.view
    }

    fn tasks(&self) -> Vec<Task> {
        self.board.borrow().tasks().cloned().collect()
    }

    pub fn days(&self) -> Vec<CalendarDay> {
        self.view.grid(&self.tasks(), self.clock.now_local().date())
    }

    pub fn selected_day_tasks(&self) -> Vec<Task> {
        let tasks = self.tasks();
        self.view
            .selected_tasks(&tasks)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn is_overdue(&self, task: &Task) -> bool {
        is_overdue(task, self.clock.now_local())
    }

    pub async fn delete(&self, task_id: &str) -> Result<(), MutationError> {
        self.mutations.delete(task_id).await
    }
}
