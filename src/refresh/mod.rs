//! Refresh orchestration: single-flight runs, scheduling and channel CRUD.

mod admin;
mod clock;
mod coordinator;
mod scheduler;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Coordinator, CoordinatorError, RefreshSettings, RunReport, RunTicket};
pub use scheduler::{is_due, Scheduler, TickOutcome};
pub use state::{Busy, LogEntry, RunScope, RunState, RunStatus};
