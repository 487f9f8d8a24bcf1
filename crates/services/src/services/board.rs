use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use db::models::task::TaskStatus;
use serde::Serialize;
use tokio::sync::watch;
use ts_rs::TS;

use super::{
    clock::Clock,
    config::BoardConfig,
    mutation::{MutationError, TaskMutations},
    projection::Board,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pointer,
    Touch,
}

/// What a drag was released over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    Column(TaskStatus),
    /// Another card; the drop lands in that card's column.
    Card(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureState {
    Idle,
    Dragging {
        task_id: String,
        origin: TaskStatus,
        input: InputKind,
    },
}

/// "Set status of task T to column C", stamped when the gesture committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StatusIntent {
    pub task_id: String,
    pub status: TaskStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureOutcome {
    Commit(StatusIntent),
    /// Dropped back on the column it came from.
    Unchanged,
    Abort,
    /// The press never turned into a drag.
    Ignored,
}

#[derive(Debug, Clone)]
struct Press {
    task_id: String,
    origin: TaskStatus,
    input: InputKind,
    start: Point,
    at: Instant,
}

/// Interprets raw pointer and touch events as drags between the three
/// columns. A press only becomes a drag once it passes its activation
/// threshold; a committed drag yields exactly one [`StatusIntent`].
pub struct GestureEngine {
    config: BoardConfig,
    clock: Arc<dyn Clock>,
    state: GestureState,
    press: Option<Press>,
}

impl GestureEngine {
    pub fn new(config: BoardConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: GestureState::Idle,
            press: None,
        }
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, GestureState::Dragging { .. })
    }

    pub fn pointer_down(&mut self, task_id: &str, origin: TaskStatus, at: Point) {
        self.begin(task_id, origin, InputKind::Pointer, at, Instant::now());
    }

    /// Returns true when this move started the drag.
    pub fn pointer_move(&mut self, to: Point) -> bool {
        let Some(press) = &self.press else {
            return false;
        };
        if self.is_dragging() || press.input != InputKind::Pointer {
            return false;
        }
        if press.start.distance(to) >= self.config.pointer_activation_distance {
            self.activate();
            return true;
        }
        false
    }

    pub fn release(&mut self, target: Option<DropTarget>, board: &Board) -> GestureOutcome {
        let outcome = match self.take_drag() {
            None => GestureOutcome::Ignored,
            Some((task_id, origin)) => {
                let column = target.and_then(|target| match target {
                    DropTarget::Column(status) => Some(status),
                    DropTarget::Card(card_id) => board.column_of(&card_id),
                });
                match column {
                    None => GestureOutcome::Abort,
                    Some(column) if column == origin => GestureOutcome::Unchanged,
                    Some(column) => self.commit(task_id, column),
                }
            }
        };
        tracing::trace!(?outcome, "drag released");
        outcome
    }

    pub fn touch_start(&mut self, task_id: &str, origin: TaskStatus, at: Point, now: Instant) {
        self.begin(task_id, origin, InputKind::Touch, at, now);
    }

    /// Activates a held touch once the delay has passed. Returns true when
    /// this call started the drag.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(press) = &self.press else {
            return false;
        };
        if self.is_dragging() || press.input != InputKind::Touch {
            return false;
        }
        if now.saturating_duration_since(press.at) >= self.config.touch_activation_delay() {
            self.activate();
            return true;
        }
        false
    }

    pub fn touch_move(&mut self, _to: Point, now: Instant) -> bool {
        self.tick(now)
    }

    /// Ends a touch. Horizontal travel of at least the swipe threshold moves
    /// the task one column in that direction, right being forward.
    pub fn touch_end(&mut self, at: Point, now: Instant) -> GestureOutcome {
        self.tick(now);
        let start = match &self.press {
            Some(press) if press.input == InputKind::Touch => press.start,
            _ => {
                self.reset();
                return GestureOutcome::Ignored;
            }
        };
        let Some((task_id, origin)) = self.take_drag() else {
            return GestureOutcome::Ignored;
        };

        let dx = at.x - start.x;
        if dx.abs() < self.config.swipe_threshold {
            return GestureOutcome::Abort;
        }
        let target = if dx > 0.0 {
            origin.next()
        } else {
            origin.previous()
        };
        match target {
            Some(column) => self.commit(task_id, column),
            None => GestureOutcome::Abort,
        }
    }

    pub fn cancel(&mut self) -> GestureOutcome {
        match self.take_drag() {
            Some(_) => GestureOutcome::Abort,
            None => GestureOutcome::Ignored,
        }
    }

    fn begin(&mut self, task_id: &str, origin: TaskStatus, input: InputKind, start: Point, at: Instant) {
        self.state = GestureState::Idle;
        self.press = Some(Press {
            task_id: task_id.to_string(),
            origin,
            input,
            start,
            at,
        });
    }

    fn activate(&mut self) {
        if let Some(press) = &self.press {
            tracing::trace!(task_id = press.task_id.as_str(), input = ?press.input, "drag started");
            self.state = GestureState::Dragging {
                task_id: press.task_id.clone(),
                origin: press.origin,
                input: press.input,
            };
        }
    }

    fn take_drag(&mut self) -> Option<(String, TaskStatus)> {
        self.press = None;
        match std::mem::replace(&mut self.state, GestureState::Idle) {
            GestureState::Dragging {
                task_id, origin, ..
            } => Some((task_id, origin)),
            GestureState::Idle => None,
        }
    }

    fn reset(&mut self) {
        self.press = None;
        self.state = GestureState::Idle;
    }

    fn commit(&self, task_id: String, status: TaskStatus) -> GestureOutcome {
        GestureOutcome::Commit(StatusIntent {
            task_id,
            status,
            updated_at: self.clock.now_utc(),
        })
    }
}

/// Binds the gesture engine to the projected board and submits committed
/// intents. Duplicate drops are submitted as they come.
pub struct BoardController {
    engine: GestureEngine,
    board: watch::Receiver<Board>,
    mutations: TaskMutations,
}

impl BoardController {
    pub fn new(
        config: BoardConfig,
        clock: Arc<dyn Clock>,
        board: watch::Receiver<Board>,
        mutations: TaskMutations,
    ) -> Self {
        Self {
            engine: GestureEngine::new(config, clock),
            board,
            mutations,
        }
    }

    pub fn state(&self) -> &GestureState {
        self.engine.state()
    }

    pub fn board(&self) -> Board {
        self.board.borrow().clone()
    }

    /// Returns false when the task is not on the board.
    pub fn pointer_down(&mut self, task_id: &str, at: Point) -> bool {
        let Some(origin) = self.board.borrow().column_of(task_id) else {
            return false;
        };
        self.engine.pointer_down(task_id, origin, at);
        true
    }

    pub fn pointer_move(&mut self, to: Point) -> bool {
        self.engine.pointer_move(to)
    }

    pub async fn release(
        &mut self,
        target: Option<DropTarget>,
    ) -> Result<GestureOutcome, MutationError> {
        let board = self.board();
        let outcome = self.engine.release(target, &board);
        self.submit(outcome).await
    }

    pub fn touch_start(&mut self, task_id: &str, at: Point, now: Instant) -> bool {
        let Some(origin) = self.board.borrow().column_of(task_id) else {
            return false;
        };
        self.engine.touch_start(task_id, origin, at, now);
        true
    }

    pub fn touch_move(&mut self, to: Point, now: Instant) -> bool {
        self.engine.touch_move(to, now)
    }

    pub async fn touch_end(
        &mut self,
        at: Point,
        now: Instant,
    ) -> Result<GestureOutcome, MutationError> {
        let outcome = self.engine.touch_end(at, now);
        self.submit(outcome).await
    }

    pub fn cancel(&mut self) -> GestureOutcome {
        self.engine.cancel()
    }

    /// How long a touch has to be held; callers schedule a [`Self::tick`]
    /// after it.
    pub fn touch_activation_delay(&self) -> Duration {
        self.engine.config.touch_activation_delay()
    }

    pub fn tick(&mut self, now: Instant) -> bool {
        self.engine.tick(now)
    }

    async fn submit(&self, outcome: GestureOutcome) -> Result<GestureOutcome, MutationError> {
        if let GestureOutcome::Commit(intent) = &outcome {
            self.mutations.set_status(intent.clone()).await?;
        }
        Ok(outcome)
    }
}
