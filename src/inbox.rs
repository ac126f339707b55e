//! Command inbox shared between interrupt producers and the command task.
//!
//! The network receive callback and the MIDI interrupt post decoded commands;
//! the command task drains them in order. Built on `critical-section` and a
//! `heapless::Deque`, so posting is safe from any context.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;

/// Returned when the inbox is full. Gives the item back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected<T>(pub T);

/// Bounded FIFO of pending items
pub struct Inbox<T, const SIZE: usize> {
    queue: Mutex<RefCell<Deque<T, SIZE>>>,
}

impl<T, const SIZE: usize> Inbox<T, SIZE> {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Posting handle for a producer context
    pub const fn poster(&self) -> Poster<'_, T, SIZE> {
        Poster { inbox: self }
    }

    /// Append an item, or give it back if the inbox is full
    pub fn post(&self, item: T) -> Result<(), Rejected<T>> {
        critical_section::with(|cs| {
            self.queue
                .borrow(cs)
                .borrow_mut()
                .push_back(item)
                .map_err(Rejected)
        })
    }

    /// Take the oldest item
    pub fn take(&self) -> Option<T> {
        critical_section::with(|cs| self.queue.borrow(cs).borrow_mut().pop_front())
    }

    /// Number of items waiting
    pub fn pending(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow(cs).borrow().len())
    }

    /// Drop everything that is waiting
    pub fn clear(&self) {
        critical_section::with(|cs| self.queue.borrow(cs).borrow_mut().clear());
    }
}

impl<T, const SIZE: usize> Default for Inbox<T, SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap handle that can only post into an [`Inbox`]
#[derive(Clone, Copy)]
pub struct Poster<'a, T, const SIZE: usize> {
    inbox: &'a Inbox<T, SIZE>,
}

impl<T, const SIZE: usize> Poster<'_, T, SIZE> {
    pub fn post(&self, item: T) -> Result<(), Rejected<T>> {
        self.inbox.post(item)
    }
}
