//! Lifecycle events and the listener table behind `Scheduler::on`.
//!
//! Listeners run synchronously, in registration order, on whichever thread
//! emits. A panicking listener is logged and skipped; the rest still run.

use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::SchedulerError, task::Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Task,
    Done,
    Error,
    Saturate,
    Empty,
    Drain,
}

#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// A task is about to be invoked.
    Task(&'a Task),
    Done(&'a [Value]),
    Error(&'a SchedulerError),
    /// The pending queue just reached the concurrency limit.
    Saturate,
    /// The pending queue just became empty; workers may still be running.
    Empty,
    /// Nothing pending, nothing running.
    Drain,
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Task(_) => EventKind::Task,
            Event::Done(_) => EventKind::Done,
            Event::Error(_) => EventKind::Error,
            Event::Saturate => EventKind::Saturate,
            Event::Empty => EventKind::Empty,
            Event::Drain => EventKind::Drain,
        }
    }
}

pub type Listener = Arc<dyn Fn(&Event<'_>) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    table: RwLock<HashMap<EventKind, Vec<Listener>>>,
}

impl Listeners {
    pub fn add<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.entry(kind).or_default().push(Arc::new(listener));
    }

    pub fn clear(&self, kind: EventKind) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.remove(&kind);
    }

    pub fn count(&self, kind: EventKind) -> usize {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.get(&kind).map_or(0, Vec::len)
    }

    /// Calls every listener for the event's kind. Returns how many were called.
    pub fn emit(&self, event: &Event<'_>) -> usize {
        // snapshot so listeners can subscribe or emit without deadlocking
        let listeners = {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            table.get(&event.kind()).cloned().unwrap_or_default()
        };

        for listener in &listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                tracing::error!(
                    event = ?event.kind(),
                    panic = %crate::worker::panic_message(payload),
                    "event listener panicked"
                );
            }
        }
        listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn listeners_run_in_registration_order() {
        let listeners = Listeners::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = seen.clone();
            listeners.add(EventKind::Drain, move |_| seen.lock().unwrap().push(i));
        }

        assert_eq!(listeners.emit(&Event::Drain), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(listeners.emit(&Event::Empty), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let listeners = Listeners::default();
        let seen = Arc::new(Mutex::new(0));

        listeners.add(EventKind::Saturate, |_| panic!("listener failure"));
        let counter = seen.clone();
        listeners.add(EventKind::Saturate, move |_| *counter.lock().unwrap() += 1);

        listeners.emit(&Event::Saturate);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn clear_removes_only_that_kind() {
        let listeners = Listeners::default();
        listeners.add(EventKind::Done, |_| {});
        listeners.add(EventKind::Error, |_| {});

        listeners.clear(EventKind::Done);
        assert_eq!(listeners.count(EventKind::Done), 0);
        assert_eq!(listeners.count(EventKind::Error), 1);
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_value(EventKind::Saturate).unwrap(), serde_json::json!("saturate"));
        assert_eq!(Event::Done(&[]).kind(), EventKind::Done);
    }
}
