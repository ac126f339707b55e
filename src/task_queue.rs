//! Cooperative deferred-call queue.
//!
//! Tasks are plain values (usually an enum) tagged with a deadline. The owner
//! pulls due tasks with [`TaskQueue::pop_due`] or [`TaskQueue::dispatch`] and
//! gets back the next deadline, so it can sleep until then. Nothing here
//! depends on an executor or a timer driver: time is always passed in.

use embassy_time::{Duration, Instant};
use heapless::Vec;

/// How long [`TaskQueue::dispatch_forever`] sleeps when nothing is queued
pub const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Error returned when the queue has no room left. Gives the task back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull<T>(pub T);

/// Result of a dispatch round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    /// Number of tasks that were run
    pub ran: usize,
    /// Deadline of the earliest remaining task
    pub next_deadline: Option<Instant>,
    /// How long the caller may sleep (zero if a task is already due)
    pub sleep_duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct Entry<T> {
    due: Instant,
    seq: u32,
    task: T,
}

/// Bounded queue of deferred tasks, earliest deadline first.
///
/// Tasks sharing a deadline run in the order they were queued.
#[derive(Debug)]
pub struct TaskQueue<T, const N: usize> {
    entries: Vec<Entry<T>, N>,
    seq: u32,
}

impl<T, const N: usize> TaskQueue<T, N> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            seq: 0,
        }
    }

    /// Queue a task to run on the next dispatch
    pub fn call_now(&mut self, now: Instant, task: T) -> Result<(), QueueFull<T>> {
        self.call_at(now, task)
    }

    /// Queue a task to run once `delay` has elapsed after `now`
    pub fn call_after(&mut self, now: Instant, delay: Duration, task: T) -> Result<(), QueueFull<T>> {
        self.call_at(now + delay, task)
    }

    /// Queue a task to run at `due`
    pub fn call_at(&mut self, due: Instant, task: T) -> Result<(), QueueFull<T>> {
        let seq = self.seq;
        self.entries
            .push(Entry { due, seq, task })
            .map_err(|entry| QueueFull(entry.task))?;
        self.seq = self.seq.wrapping_add(1);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every queued task
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Deadline of the earliest queued task
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.due).min()
    }

    /// Remove and return the earliest task that is due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.due <= now)
            .min_by_key(|(_, entry)| (entry.due, entry.seq.wrapping_sub(self.seq)))
            .map(|(index, _)| index)?;

        // `remove` keeps the relative order of the remaining tasks
        Some(self.entries.remove(index).task)
    }

    /// Run every task that is due at `now`
    pub fn dispatch(&mut self, now: Instant, mut run: impl FnMut(T)) -> DispatchResult {
        let mut ran = 0;
        while let Some(task) = self.pop_due(now) {
            run(task);
            ran += 1;
        }
        self.timing(now, ran)
    }

    /// Timing information for the caller after a dispatch round
    pub fn timing(&self, now: Instant, ran: usize) -> DispatchResult {
        let next_deadline = self.next_deadline();
        DispatchResult {
            ran,
            next_deadline,
            sleep_duration: next_deadline.map(|due| due.saturating_duration_since(now)),
        }
    }

    /// Dispatch loop for a dedicated thread or task
    ///
    /// `clock` reads the current time and `sleep` blocks the caller; when the
    /// queue is empty it sleeps for [`IDLE_SLEEP`].
    pub fn dispatch_forever(
        &mut self,
        mut clock: impl FnMut() -> Instant,
        mut sleep: impl FnMut(Duration),
        mut run: impl FnMut(T),
    ) -> ! {
        loop {
            let result = self.dispatch(clock(), &mut run);
            sleep(result.sleep_duration.unwrap_or(IDLE_SLEEP));
        }
    }
}

impl<T, const N: usize> Default for TaskQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
