pub mod scheduler;
pub(crate) mod state;
pub mod task;

pub use scheduler::Scheduler;
pub use task::{ActionResult, ActionStatus, ExecContext, RunningTask};
