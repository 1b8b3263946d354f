use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use futures_lite::FutureExt;
use serde_json::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use uuid::Uuid;

use crate::{
    config::{Concurrency, SchedulerConfig},
    error::SchedulerError,
    events::{Event, EventKind, Listeners},
    queue::Position,
    state::{Binding, Dispatched, SchedulerState},
    task::{Callable, Context, Task},
    worker::{panic_message, Completion, Invocation},
};

/// Runs submitted tasks with at most `concurrency` of them in flight.
///
/// Cloning gives another handle to the same scheduler. Listeners are owned by
/// the scheduler, so a listener that needs the scheduler should capture a
/// [`WeakScheduler`] instead of a clone.
///
/// Dispatch always runs on the runtime the scheduler was built on, which must
/// be a current-thread runtime: pushes made in one synchronous stretch are all
/// queued before the first task is dispatched. Task bodies may still complete
/// from any thread.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

/// A handle that does not keep the scheduler alive.
#[derive(Clone)]
pub struct WeakScheduler {
    shared: Weak<Shared>,
}

impl WeakScheduler {
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.shared.upgrade().map(|shared| Scheduler { shared })
    }
}

pub(crate) struct Shared {
    state: Mutex<SchedulerState>,
    listeners: Listeners,
    runtime: Handle,
}

impl Scheduler {
    /// Builds a scheduler with a fixed limit on the current tokio runtime.
    pub fn new(limit: usize) -> Result<Self, SchedulerError> {
        Self::with_concurrency(Concurrency::Fixed(limit))
    }

    /// One worker slot per CPU.
    pub fn auto() -> Result<Self, SchedulerError> {
        Self::with_concurrency(Concurrency::Auto)
    }

    pub fn with_concurrency(concurrency: Concurrency) -> Result<Self, SchedulerError> {
        Self::with_parallelism(concurrency, num_cpus::get)
    }

    pub fn with_parallelism(
        concurrency: Concurrency,
        hint: impl FnOnce() -> usize,
    ) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|e| SchedulerError::Runtime(e.to_string()))?;
        Self::with_handle(concurrency, hint, runtime)
    }

    pub fn with_handle(
        concurrency: Concurrency,
        hint: impl FnOnce() -> usize,
        runtime: Handle,
    ) -> Result<Self, SchedulerError> {
        match runtime.runtime_flavor() {
            RuntimeFlavor::CurrentThread => {}
            flavor => {
                return Err(SchedulerError::Runtime(format!(
                    "scheduler needs a current-thread runtime, got {:?}",
                    flavor
                )))
            }
        }

        let limit = concurrency.resolve(hint)?;
        tracing::debug!(limit, "scheduler created");

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::new(limit)),
                listeners: Listeners::default(),
                runtime,
            }),
        })
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_concurrency(config.concurrency)
    }

    /// Sets the default context and callable for tasks queued from now on.
    pub fn bind(&self, context: Option<Arc<dyn Context>>, callable: impl Into<Callable>) -> &Self {
        self.shared.lock().bind(Binding {
            context,
            callable: Some(callable.into()),
        });
        self
    }

    /// Queues one task or a batch at the back.
    pub fn push(&self, tasks: impl Into<Vec<Task>>) -> &Self {
        self.enqueue(Position::Back, tasks.into())
    }

    /// Queues one task or a batch at the front. Each task of a batch goes to the
    /// front in turn, so the batch's last task is dispatched first.
    pub fn unshift(&self, tasks: impl Into<Vec<Task>>) -> &Self {
        self.enqueue(Position::Front, tasks.into())
    }

    /// Pending plus running tasks.
    pub fn length(&self) -> usize {
        self.shared.lock().length()
    }

    pub fn running(&self) -> usize {
        self.shared.lock().running()
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().pending()
    }

    pub fn concurrency(&self) -> usize {
        self.shared.lock().limit()
    }

    /// Discards every task that has not been dispatched yet. Running tasks are
    /// left alone and still report.
    pub fn abort(&self) -> usize {
        let (discarded, drained) = {
            let mut state = self.shared.lock();
            let discarded = state.abort();
            (discarded, state.settle())
        };

        if discarded > 0 {
            tracing::warn!(discarded, "aborted pending tasks");
        }
        if drained {
            self.shared.listeners.emit(&Event::Drain);
        }
        discarded
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> &Self
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        self.shared.listeners.add(kind, listener);
        self
    }

    pub fn on_task<F>(&self, listener: F) -> &Self
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.on(EventKind::Task, move |event| {
            if let Event::Task(task) = *event {
                listener(task)
            }
        })
    }

    pub fn on_done<F>(&self, listener: F) -> &Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.on(EventKind::Done, move |event| {
            if let Event::Done(values) = *event {
                listener(values)
            }
        })
    }

    pub fn on_error<F>(&self, listener: F) -> &Self
    where
        F: Fn(&SchedulerError) + Send + Sync + 'static,
    {
        self.on(EventKind::Error, move |event| {
            if let Event::Error(error) = *event {
                listener(error)
            }
        })
    }

    pub fn on_saturate<F>(&self, listener: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Saturate, move |_| listener())
    }

    pub fn on_empty<F>(&self, listener: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Empty, move |_| listener())
    }

    pub fn on_drain<F>(&self, listener: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Drain, move |_| listener())
    }

    pub fn remove_listeners(&self, kind: EventKind) -> &Self {
        self.shared.listeners.clear(kind);
        self
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.shared.listeners.count(kind)
    }

    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn enqueue(&self, position: Position, tasks: Vec<Task>) -> &Self {
        if tasks.is_empty() {
            return self;
        }

        for task in tasks {
            let task_id = task.id;
            let saturated = self.shared.lock().admit(task, position);
            tracing::debug!(task_id = %task_id, ?position, "task queued");

            if saturated {
                self.shared.listeners.emit(&Event::Saturate);
            }
        }

        // never dispatch inside the caller's frame
        self.shared.schedule_dispatch();
        self
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // runs `dispatch` on the scheduler's own thread once the caller yields
    fn schedule_dispatch(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        self.runtime.spawn(async move { shared.dispatch() });
    }

    /// Fills free worker slots from the front of the queue. While one pass is
    /// looping, other calls return immediately and the looping pass sees their
    /// changes on its next iteration.
    fn dispatch(self: &Arc<Self>) {
        if !self.lock().begin_dispatch() {
            return;
        }

        loop {
            let next = self.lock().next();
            let Some(Dispatched { task, emptied }) = next else {
                break;
            };

            if emptied {
                self.listeners.emit(&Event::Empty);
            }
            tracing::debug!(task_id = %task.id, "dispatching task");
            self.listeners.emit(&Event::Task(&task));
            self.invoke(task);
        }
    }

    fn invoke(self: &Arc<Self>, task: Task) {
        let completion = Completion::new(task.id, Arc::clone(self));
        let method = match task.resolve() {
            Ok(method) => method,
            Err(e) => {
                completion.report(Err(e));
                return;
            }
        };

        let invocation = Invocation {
            task_id: task.id,
            context: task.context,
            args: task.args,
            done: completion.clone(),
        };

        match panic::catch_unwind(AssertUnwindSafe(|| method.call(invocation))) {
            Ok(Some(future)) => {
                self.runtime.spawn(async move {
                    let result = match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(result) => result.map_err(SchedulerError::Task),
                        Err(payload) => Err(SchedulerError::Panicked(panic_message(payload))),
                    };
                    completion.report(result);
                });
            }
            // the callable owns its continuation now
            Ok(None) => {}
            Err(payload) => completion.report(Err(SchedulerError::Panicked(panic_message(payload)))),
        }
    }

    /// The completion protocol: free the slot, report, maybe drain, refill.
    pub(crate) fn complete(self: &Arc<Self>, task_id: Uuid, result: Result<Vec<Value>, SchedulerError>) {
        self.lock().complete();

        match &result {
            Ok(values) => {
                tracing::debug!(task_id = %task_id, values = values.len(), "task completed");
                self.listeners.emit(&Event::Done(values));
            }
            Err(e) => {
                tracing::debug!(task_id = %task_id, error = %e, "task failed");
                if self.listeners.emit(&Event::Error(e)) == 0 {
                    tracing::warn!(task_id = %task_id, error = %e, "task failed with no error listener attached");
                }
            }
        }

        let drained = self.lock().settle();
        if drained {
            tracing::debug!("scheduler drained");
            self.listeners.emit(&Event::Drain);
        }

        // completions may arrive on any thread
        self.schedule_dispatch();
    }
}
