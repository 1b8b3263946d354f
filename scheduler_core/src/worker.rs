use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use futures_lite::{future::Boxed, FutureExt};
use serde_json::Value;
use uuid::Uuid;

use crate::{error::SchedulerError, scheduler::Shared, task::Context};

/// What a task reports: result values on success, a payload on failure.
pub type TaskResult = Result<Vec<Value>, Value>;

/// Everything a callable receives when its task is dispatched.
pub struct Invocation {
    pub task_id: Uuid,
    pub context: Option<Arc<dyn Context>>,
    pub args: Vec<Value>,
    pub done: Completion,
}

impl Invocation {
    /// The task's context as its concrete type, if it is one.
    pub fn context_as<T: Context + 'static>(&self) -> Option<&T> {
        self.context.as_deref().and_then(|context| context.downcast_ref::<T>())
    }
}

/// A dispatch target.
///
/// The callable gets the task's arguments plus a [`Completion`]. It may report
/// through the completion (right away or later), or return a future whose output
/// is reported for it.
#[derive(Clone)]
pub struct Method(Arc<dyn Fn(Invocation) -> Option<Boxed<TaskResult>> + Send + Sync>);

impl Method {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Invocation) -> Option<Boxed<TaskResult>> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Continuation style: the callable must eventually call `done`.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Invocation) + Send + Sync + 'static,
    {
        Self::new(move |call| {
            f(call);
            None
        })
    }

    /// Future style: the returned future's output completes the task.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<Arc<dyn Context>>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self::new(move |call| Some(f(call.context, call.args).boxed()))
    }

    pub fn job(job: Arc<dyn Job>) -> Self {
        Self::future(move |context, args| {
            let job = Arc::clone(&job);
            async move { job.run(context, args).await }
        })
    }

    pub(crate) fn call(&self, invocation: Invocation) -> Option<Boxed<TaskResult>> {
        (self.0)(invocation)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method(..)")
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self, context: Option<Arc<dyn Context>>, args: Vec<Value>) -> TaskResult;
}

/// The completion continuation handed to every dispatched task.
///
/// Clones share one slot and only the first report counts. If every clone is
/// dropped without a report, the task fails with `SchedulerError::Abandoned`.
#[derive(Clone)]
pub struct Completion {
    slot: Arc<Slot>,
}

struct Slot {
    task_id: Uuid,
    reported: AtomicBool,
    scheduler: Arc<Shared>,
}

impl Completion {
    pub(crate) fn new(task_id: Uuid, scheduler: Arc<Shared>) -> Self {
        Self {
            slot: Arc::new(Slot {
                task_id,
                reported: AtomicBool::new(false),
                scheduler,
            }),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.slot.task_id
    }

    pub fn ok(&self, values: Vec<Value>) {
        self.report(Ok(values));
    }

    pub fn fail(&self, error: impl Into<Value>) {
        self.report(Err(SchedulerError::Task(error.into())));
    }

    pub fn finish(&self, result: TaskResult) {
        self.report(result.map_err(SchedulerError::Task));
    }

    pub(crate) fn report(&self, result: Result<Vec<Value>, SchedulerError>) {
        if self.slot.reported.swap(true, Ordering::AcqRel) {
            tracing::warn!(task_id = %self.slot.task_id, "completion reported more than once, ignoring");
            return;
        }
        self.slot.scheduler.complete(self.slot.task_id, result);
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if !*self.reported.get_mut() {
            self.scheduler.complete(self.task_id, Err(SchedulerError::Abandoned));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("task_id", &self.slot.task_id)
            .field("reported", &self.slot.reported.load(Ordering::Acquire))
            .finish()
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "task panicked".to_string()
}
