//! Fixed-Capacity FIFO Window

use std::collections::VecDeque;

use crate::WindowError;

/// Default window capacity (readings per node)
pub const DEFAULT_CAPACITY: usize = 10;

/// Bounded FIFO buffer; the oldest entry is evicted once capacity is reached
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    data: VecDeque<T>,
    capacity: usize,
    total_written: usize,
}

impl<T> SlidingWindow<T> {
    /// Create a window holding at most `capacity` entries
    pub fn new(capacity: usize) -> Result<Self, WindowError> {
        if capacity == 0 {
            return Err(WindowError::ZeroCapacity);
        }
        Ok(Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
            total_written: 0,
        })
    }

    /// Push an entry, returning the evicted one if the window was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.data.len() >= self.capacity {
            self.data.pop_front()
        } else {
            None
        };
        self.data.push_back(item);
        self.total_written += 1;
        evicted
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries from oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.data.iter()
    }

    /// Total entries ever pushed (for statistics)
    pub fn total_written(&self) -> usize {
        self.total_written
    }
}
