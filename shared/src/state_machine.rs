//! Delivery Task State Machine
//!
//! Defines the valid steps of a single delivery task. Every path ends in a
//! terminal state; a task never loops back once it has pushed files.
//!
//! ```text
//! Start -> CheckConnection -> { connected     -> PushFiles -> Notify -> Done
//!                               not connected -> Reconnect -> { ok   -> PushFiles ...
//!                                                                fail -> Aborted } }
//! ```

/// Steps of a delivery task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Start,
    CheckConnection,
    Reconnect,
    PushFiles,
    Notify,
    /// Completed all steps
    Done,
    /// Gave up before delivering
    Aborted,
}

impl TaskState {
    /// Terminal states accept no further events
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Aborted)
    }
}

/// Events that drive the task forward
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Task picked up for execution
    Begin,
    /// Device was in the connected set
    Connected,
    /// Device was absent from the connected set
    NotConnected,
    /// Connect attempt made the device reachable
    Reconnected,
    /// Connect attempt did not make the device reachable
    ReconnectFailed { reason: String },
    /// Push step finished (or was abandoned after per-file failures)
    FilesPushed { transferred: usize },
    /// Rescan broadcast attempted
    Notified,
    /// Unrecoverable error in the current step
    Failed { reason: String },
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(TaskState),
    /// Transition was invalid from current state
    Invalid { from: TaskState, event: TaskEvent },
    /// Task ended without delivering
    Aborted { reason: String },
}

/// The per-task state machine
#[derive(Debug)]
pub struct TaskStateMachine {
    current_state: TaskState,
    transitions: u32,
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStateMachine {
    /// Create a new state machine in Start state
    pub fn new() -> Self {
        Self {
            current_state: TaskState::Start,
            transitions: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> TaskState {
        self.current_state
    }

    /// Number of successful transitions so far
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: TaskEvent) -> TransitionResult {
        if self.current_state.is_terminal() {
            return TransitionResult::Invalid {
                from: self.current_state,
                event,
            };
        }

        match &event {
            TaskEvent::Failed { reason } => {
                return self.abort(format!("{} (in {:?})", reason, self.current_state));
            }
            TaskEvent::ReconnectFailed { reason } if self.current_state == TaskState::Reconnect => {
                return self.abort(format!("{} after connect attempt", reason));
            }
            _ => {}
        }

        match self.get_next_state(&event) {
            Some(state) => {
                self.current_state = state;
                self.transitions += 1;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: &TaskEvent) -> Option<TaskState> {
        use TaskEvent::*;
        use TaskState::*;

        match (self.current_state, event) {
            (Start, Begin) => Some(CheckConnection),

            (CheckConnection, Connected) => Some(PushFiles),
            (CheckConnection, NotConnected) => Some(Reconnect),

            (Reconnect, Reconnected) => Some(PushFiles),

            (PushFiles, FilesPushed { .. }) => Some(Notify),

            (Notify, Notified) => Some(Done),

            _ => None,
        }
    }

    fn abort(&mut self, reason: String) -> TransitionResult {
        self.current_state = TaskState::Aborted;
        self.transitions += 1;
        TransitionResult::Aborted { reason }
    }
}
