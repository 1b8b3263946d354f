// the core of the scheduler: admission into the pending queue, worker slot accounting,
// the dispatch/completion protocol and the lifecycle events around it
pub mod config;
pub mod error;
pub mod events;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod task;
pub mod worker;

pub use config::{Concurrency, SchedulerConfig};
pub use error::SchedulerError;
pub use events::{Event, EventKind};
pub use scheduler::{Scheduler, WeakScheduler};
pub use task::{Callable, Context, Task, TaskDescriptor};
pub use worker::{Completion, Invocation, Job, Method, TaskResult};
