use std::collections::VecDeque;

use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// `push`: behind everything already waiting.
    Back,
    /// `unshift`: ahead of everything already waiting.
    Front,
}

/// Tasks waiting for a worker slot. Insertion at either end, removal only
/// from the front.
#[derive(Debug, Default)]
pub struct PendingQueue {
    tasks: VecDeque<Task>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self { tasks: VecDeque::new() }
    }

    pub fn insert(&mut self, task: Task, position: Position) {
        match position {
            Position::Back => self.tasks.push_back(task),
            Position::Front => self.tasks.push_front(task),
        }
    }

    pub fn pop_front(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Drops every waiting task, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.tasks.len();
        self.tasks.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_task(name: &str) -> Task {
        Task::named(name)
    }

    fn drain_names(queue: &mut PendingQueue) -> Vec<String> {
        let mut names = vec![];
        while let Some(task) = queue.pop_front() {
            names.push(task.descriptor().method.unwrap_or_default());
        }
        names
    }

    #[test]
    fn back_inserts_are_fifo() {
        let mut queue = PendingQueue::new();
        queue.insert(create_task("a"), Position::Back);
        queue.insert(create_task("b"), Position::Back);
        queue.insert(create_task("c"), Position::Back);

        assert_eq!(queue.len(), 3);
        assert_eq!(drain_names(&mut queue), ["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn front_inserts_jump_the_line() {
        let mut queue = PendingQueue::new();
        queue.insert(create_task("a"), Position::Back);
        queue.insert(create_task("b"), Position::Back);
        queue.insert(create_task("c"), Position::Front);

        assert_eq!(drain_names(&mut queue), ["c", "a", "b"]);
    }

    #[test]
    fn same_task_twice_is_queued_twice() {
        let mut queue = PendingQueue::new();
        let task = create_task("dup");
        queue.insert(task.clone(), Position::Back);
        queue.insert(task.clone(), Position::Back);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front().map(|t| t.id), Some(task.id));
        assert_eq!(queue.pop_front().map(|t| t.id), Some(task.id));
    }

    #[test]
    fn clear_reports_discarded_count() {
        let mut queue = PendingQueue::new();
        for i in 0..4 {
            queue.insert(create_task(&format!("task{}", i)), Position::Back);
        }

        assert_eq!(queue.clear(), 4);
        assert!(queue.pop_front().is_none());
    }
}
