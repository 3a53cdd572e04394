//! Protocol engine interface
//!
//! The engine fragments outbound transfers into frames and reassembles inbound ones. The bridge
//! calls it with the bridge mutex held, so implementations must not block or perform I/O.
//! Payload memory comes from the arena passed in by the bridge.

use crate::arena::{Arena, OutOfMemory};
use crate::core::Mtu;
use crate::frame::{CompletedTransfer, Deadline, GenericFrame, PendingFrame, TransferMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineError {
    /// The transfer parameters are not valid for the engine, e.g., a missing destination
    InvalidArgument,
    OutOfMemory,
    /// The engine queue reached its capacity
    QueueFull,
}

impl From<OutOfMemory> for EngineError {
    fn from(_: OutOfMemory) -> Self {
        EngineError::OutOfMemory
    }
}

impl core::fmt::Display for EngineError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EngineError::InvalidArgument => f.write_str("invalid transfer argument"),
            EngineError::OutOfMemory => f.write_str("out of memory"),
            EngineError::QueueFull => f.write_str("queue is full"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Outbound half of the protocol engine
pub trait TxEngine {
    /// Fragments the transfer and enqueues its frames. Returns the number of frames enqueued.
    ///
    /// On error, no frame of the transfer is left in the queue and all its memory is freed.
    fn push(
        &mut self,
        arena: &mut Arena,
        meta: &TransferMeta,
        deadline: Deadline,
        payload: &[u8],
        mtu: Mtu,
    ) -> Result<usize, EngineError>;

    /// Next frame to transmit
    fn peek(&self) -> Option<&PendingFrame>;

    /// Removes the frame returned by [`TxEngine::peek`]. The caller owns its payload afterwards.
    fn pop(&mut self) -> Option<PendingFrame>;
}

/// Result of feeding a frame to the reassembler
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Accepted {
    /// Not addressed to this node, not subscribed, or malformed
    Rejected,
    /// Stored as part of a transfer still in progress
    Consumed,
    Complete(CompletedTransfer),
}

/// Inbound half of the protocol engine
pub trait RxEngine {
    fn accept(&mut self, arena: &mut Arena, frame: &GenericFrame) -> Accepted;
}

impl<T: TxEngine + ?Sized> TxEngine for &mut T {
    fn push(
        &mut self,
        arena: &mut Arena,
        meta: &TransferMeta,
        deadline: Deadline,
        payload: &[u8],
        mtu: Mtu,
    ) -> Result<usize, EngineError> {
        (**self).push(arena, meta, deadline, payload, mtu)
    }

    fn peek(&self) -> Option<&PendingFrame> {
        (**self).peek()
    }

    fn pop(&mut self) -> Option<PendingFrame> {
        (**self).pop()
    }
}

impl<T: RxEngine + ?Sized> RxEngine for &mut T {
    fn accept(&mut self, arena: &mut Arena, frame: &GenericFrame) -> Accepted {
        (**self).accept(arena, frame)
    }
}
