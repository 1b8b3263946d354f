use std::sync::Arc;

use crate::{
    queue::{PendingQueue, Position},
    task::{Callable, Context, Task},
};

/// Default context and callable for tasks that are queued without one.
#[derive(Clone, Default)]
pub struct Binding {
    pub context: Option<Arc<dyn Context>>,
    pub callable: Option<Callable>,
}

/// A task just taken off the queue and counted as running.
pub struct Dispatched {
    pub task: Task,
    /// The queue became empty with this pop.
    pub emptied: bool,
}

/// Scheduler bookkeeping. Lives behind a single mutex; nothing in here runs
/// user code.
pub struct SchedulerState {
    limit: usize,
    pending: PendingQueue,
    workers: usize,
    binding: Binding,
    // a dispatch pass is looping
    dispatching: bool,
    // work was admitted since the last drain
    armed: bool,
}

impl SchedulerState {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            pending: PendingQueue::new(),
            workers: 0,
            binding: Binding::default(),
            dispatching: false,
            armed: false,
        }
    }

    pub fn bind(&mut self, binding: Binding) {
        self.binding = binding;
    }

    /// Queues a task, filling gaps from the binding. Returns `true` when the
    /// queue length has just reached the concurrency limit.
    pub fn admit(&mut self, mut task: Task, position: Position) -> bool {
        if task.context.is_none() {
            task.context = self.binding.context.clone();
        }
        if task.callable.is_none() {
            task.callable = self.binding.callable.clone();
        }

        self.pending.insert(task, position);
        self.armed = true;
        self.pending.len() == self.limit
    }

    /// Claims the dispatcher role. `false` means a pass is already looping and
    /// will pick up whatever changed.
    pub fn begin_dispatch(&mut self) -> bool {
        if self.dispatching {
            return false;
        }
        self.dispatching = true;
        true
    }

    /// Pops the next task if a worker slot is free. Returning `None` also ends
    /// the current dispatch pass.
    pub fn next(&mut self) -> Option<Dispatched> {
        if self.workers < self.limit {
            if let Some(task) = self.pending.pop_front() {
                self.workers += 1;
                return Some(Dispatched {
                    task,
                    emptied: self.pending.is_empty(),
                });
            }
        }
        self.dispatching = false;
        None
    }

    pub fn complete(&mut self) {
        debug_assert!(self.workers > 0, "completion without a dispatched task");
        self.workers = self.workers.saturating_sub(1);
    }

    /// `true` exactly once per cycle, when nothing is pending or running.
    pub fn settle(&mut self) -> bool {
        if self.armed && self.pending.is_empty() && self.workers == 0 {
            self.armed = false;
            return true;
        }
        false
    }

    pub fn abort(&mut self) -> usize {
        self.pending.clear()
    }

    pub fn length(&self) -> usize {
        self.pending.len() + self.workers
    }

    pub fn running(&self) -> usize {
        self.workers
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::worker::Method;

    fn create_task() -> Task {
        Task::named("run")
    }

    #[test]
    fn admit_fills_missing_fields_from_binding() {
        let mut state = SchedulerState::new(2);
        let context: Arc<dyn Context> = Arc::new(HashMap::<String, Method>::new());
        state.bind(Binding {
            context: Some(context),
            callable: Some(Callable::from("run")),
        });

        state.admit(Task::new(), Position::Back);
        state.admit(Task::named("other"), Position::Back);

        let first = state.next().expect("slot available").task;
        assert!(first.context.is_some());
        assert!(matches!(first.callable, Some(Callable::Name(ref n)) if n == "run"));

        let second = state.next().expect("slot available").task;
        assert!(matches!(second.callable, Some(Callable::Name(ref n)) if n == "other"));
    }

    #[test]
    fn saturation_reported_when_queue_reaches_limit() {
        let mut state = SchedulerState::new(2);
        assert!(!state.admit(create_task(), Position::Back));
        assert!(state.admit(create_task(), Position::Back));
        assert!(!state.admit(create_task(), Position::Back));
    }

    #[test]
    fn next_respects_the_limit() {
        let mut state = SchedulerState::new(2);
        for _ in 0..3 {
            state.admit(create_task(), Position::Back);
        }

        assert!(state.begin_dispatch());
        assert!(!state.begin_dispatch(), "second pass must not start while one is active");

        let first = state.next().unwrap();
        assert!(!first.emptied);
        let second = state.next().unwrap();
        assert!(!second.emptied);
        assert!(state.next().is_none());

        assert_eq!(state.running(), 2);
        assert_eq!(state.pending(), 1);
        assert_eq!(state.length(), 3);

        // the failed `next` ended the pass
        assert!(state.begin_dispatch());
        state.complete();
        let third = state.next().unwrap();
        assert!(third.emptied);
        assert_eq!(state.running(), 2);
    }

    #[test]
    fn settle_fires_once_per_cycle() {
        let mut state = SchedulerState::new(1);
        assert!(!state.settle(), "nothing was ever admitted");

        state.admit(create_task(), Position::Back);
        state.begin_dispatch();
        state.next().unwrap();
        assert!(!state.settle());

        state.complete();
        assert!(state.settle());
        assert!(!state.settle());
        assert_eq!(state.length(), 0);
    }

    #[test]
    #[should_panic(expected = "completion without a dispatched task")]
    #[cfg(debug_assertions)]
    fn completion_without_dispatch_is_caught() {
        let mut state = SchedulerState::new(1);
        state.admit(create_task(), Position::Back);
        state.complete();
    }

    #[test]
    fn abort_keeps_running_tasks_counted() {
        let mut state = SchedulerState::new(2);
        for _ in 0..5 {
            state.admit(create_task(), Position::Back);
        }
        state.begin_dispatch();
        state.next().unwrap();
        state.next().unwrap();

        assert_eq!(state.abort(), 3);
        assert_eq!(state.length(), 2);
        assert_eq!(state.running(), 2);
        assert!(!state.settle());
    }
}
