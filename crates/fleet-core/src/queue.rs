//! Priority queue of tasks awaiting assignment, with linear priority aging.
//!
//! Effective priority is `base + aging_per_hour * hours_waited`. Every queued
//! task ages at the same rate, so the relative order of two entries never
//! changes while they wait; the heap is keyed on `base - aging_per_hour *
//! created_at_hours`, which sorts identically to the effective priority at
//! any instant.

use crate::error::{FleetError, FleetResult};
use crate::models::TaskPriority;
use crate::ordering::FloatOrd;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

const SECS_PER_HOUR: f64 = 3600.0;

/// Effective priority of a task at `now`.
pub fn effective_priority(
    priority: TaskPriority,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    aging_per_hour: f64,
) -> f64 {
    let waited_h = ((now - created_at).num_milliseconds().max(0) as f64 / 1000.0) / SECS_PER_HOUR;
    priority.value() + aging_per_hour * waited_h
}

#[derive(Debug, Clone)]
struct QueueEntry {
    rank: FloatOrd,
    created_at: DateTime<Utc>,
    seq: u64,
    task_id: String,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher rank first, then older, then earlier insertion.
        self.rank
            .cmp(&other.rank)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
pub struct TaskQueue {
    heap: BinaryHeap<QueueEntry>,
    /// Live entry sequence per queued task; heap entries with another seq are stale
    live: HashMap<String, u64>,
    next_seq: u64,
    aging_per_hour: f64,
    limit: usize,
}

impl TaskQueue {
    pub fn new(aging_per_hour: f64, limit: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_seq: 0,
            aging_per_hour,
            limit,
        }
    }

    /// Queue a task. Returns `false` if it is already queued.
    pub fn push(
        &mut self,
        task_id: &str,
        priority: TaskPriority,
        created_at: DateTime<Utc>,
    ) -> FleetResult<bool> {
        if self.live.contains_key(task_id) {
            return Ok(false);
        }
        if self.live.len() >= self.limit {
            return Err(FleetError::Capacity(format!("task queue holds {} entries", self.limit)));
        }

        let created_h = created_at.timestamp_millis() as f64 / 1000.0 / SECS_PER_HOUR;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(task_id.to_string(), seq);
        self.heap.push(QueueEntry {
            rank: FloatOrd(priority.value() - self.aging_per_hour * created_h),
            created_at,
            seq,
            task_id: task_id.to_string(),
        });
        Ok(true)
    }

    /// Pop the task with the highest effective priority.
    pub fn pop(&mut self) -> Option<String> {
        while let Some(entry) = self.heap.pop() {
            if self.live.get(&entry.task_id) == Some(&entry.seq) {
                self.live.remove(&entry.task_id);
                return Some(entry.task_id);
            }
        }
        None
    }

    /// Drop a task from the queue. Returns whether it was queued.
    pub fn remove(&mut self, task_id: &str) -> bool {
        let removed = self.live.remove(task_id).is_some();
        if self.live.is_empty() {
            self.heap.clear();
        }
        removed
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.live.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn higher_priority_pops_first() {
        let now = Utc::now();
        let mut queue = TaskQueue::new(0.1, 10);
        queue.push("low", TaskPriority::Low, now).unwrap();
        queue.push("emergency", TaskPriority::Emergency, now).unwrap();
        queue.push("normal", TaskPriority::Normal, now).unwrap();

        assert_eq!(queue.pop().as_deref(), Some("emergency"));
        assert_eq!(queue.pop().as_deref(), Some("normal"));
        assert_eq!(queue.pop().as_deref(), Some("low"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn equal_priority_is_fifo_by_creation() {
        let now = Utc::now();
        let mut queue = TaskQueue::new(0.0, 10);
        queue.push("second", TaskPriority::Normal, now).unwrap();
        queue.push("first", TaskPriority::Normal, now - Duration::seconds(5)).unwrap();
        queue.push("third", TaskPriority::Normal, now).unwrap();

        assert_eq!(queue.pop().as_deref(), Some("first"));
        assert_eq!(queue.pop().as_deref(), Some("second"));
        assert_eq!(queue.pop().as_deref(), Some("third"));
    }

    #[test]
    fn aging_lets_old_tasks_overtake() {
        let now = Utc::now();
        let mut queue = TaskQueue::new(0.1, 10);
        // Eleven hours of waiting is worth more than one priority level.
        queue.push("old_low", TaskPriority::Low, now - Duration::hours(11)).unwrap();
        queue.push("new_normal", TaskPriority::Normal, now).unwrap();
        assert_eq!(queue.pop().as_deref(), Some("old_low"));

        let aged = effective_priority(TaskPriority::Low, now - Duration::hours(11), now, 0.1);
        assert!((aged - 3.1).abs() < 1e-9);
    }

    #[test]
    fn removed_and_requeued_entries_are_not_duplicated() {
        let now = Utc::now();
        let mut queue = TaskQueue::new(0.1, 10);
        assert!(queue.push("a", TaskPriority::Normal, now).unwrap());
        assert!(!queue.push("a", TaskPriority::Normal, now).unwrap());
        queue.push("b", TaskPriority::Low, now).unwrap();
        assert!(queue.remove("a"));
        queue.push("a", TaskPriority::Normal, now).unwrap();

        assert_eq!(queue.pop().as_deref(), Some("a"));
        assert_eq!(queue.pop().as_deref(), Some("b"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn push_respects_limit() {
        let now = Utc::now();
        let mut queue = TaskQueue::new(0.1, 1);
        queue.push("a", TaskPriority::Normal, now).unwrap();
        assert!(matches!(
            queue.push("b", TaskPriority::Normal, now),
            Err(FleetError::Capacity(_))
        ));
    }
}
