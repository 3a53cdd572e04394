use std::collections::VecDeque;

use crate::arena::Arena;
use crate::core::{Priority, PrioritySet};
use crate::frame::PendingFrame;

#[derive(Default)]
struct PriorityArray<T>([T; Priority::LEVEL_COUNT]);

impl<T> core::ops::Index<Priority> for PriorityArray<T> {
    type Output = T;

    fn index(&self, index: Priority) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}

impl<T> core::ops::IndexMut<Priority> for PriorityArray<T> {
    fn index_mut(&mut self, index: Priority) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

/// Bounded frame queue for [`TxEngine`](crate::engine::TxEngine) implementations
///
/// The head is the frame with the highest priority. Frames of equal priority leave in deadline
/// order, and frames with equal keys leave in insertion order.
pub struct TxQueue {
    levels: PriorityArray<VecDeque<PendingFrame>>,
    non_empty: PrioritySet,
    len: usize,
    capacity: usize,
}

impl TxQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            levels: Default::default(),
            non_empty: PrioritySet::NONE,
            len: 0,
            capacity,
        }
    }

    /// Gives the frame back if the queue is full.
    pub fn push(&mut self, frame: PendingFrame) -> Result<(), PendingFrame> {
        if self.len >= self.capacity {
            return Err(frame);
        }
        let level = &mut self.levels[frame.priority];
        let position = level.partition_point(|queued| queued.deadline <= frame.deadline);
        self.non_empty.insert(frame.priority);
        level.insert(position, frame);
        self.len += 1;
        Ok(())
    }

    pub fn peek(&self) -> Option<&PendingFrame> {
        let priority = self.non_empty.first()?;
        self.levels[priority].front()
    }

    pub fn pop(&mut self) -> Option<PendingFrame> {
        let priority = self.non_empty.first()?;
        let level = &mut self.levels[priority];
        let frame = level.pop_front();
        if level.is_empty() {
            self.non_empty.remove(priority);
        }
        if frame.is_some() {
            self.len -= 1;
        }
        frame
    }

    /// Keeps only the frames `f` returns true for, freeing the payload of the others.
    ///
    /// Engines use it to roll back a partially enqueued transfer.
    pub fn retain(&mut self, arena: &mut Arena, mut f: impl FnMut(&PendingFrame) -> bool) {
        for priority in self.non_empty {
            let level = &mut self.levels[priority];
            let mut index = 0;
            while index < level.len() {
                if f(&level[index]) {
                    index += 1;
                } else if let Some(frame) = level.remove(index) {
                    arena.free(frame.payload);
                    self.len -= 1;
                }
            }
            if level.is_empty() {
                self.non_empty.remove(priority);
            }
        }
    }

    /// Drops every frame, freeing their payload.
    pub fn clear(&mut self, arena: &mut Arena) {
        while let Some(frame) = self.pop() {
            arena.free(frame.payload);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
