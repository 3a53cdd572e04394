//! Frame and transfer representations used between the bridge and the protocol engine

use crate::arena::Block;
use crate::core::{NodeId, PortId, Priority, TransferId, TransferKind};
use crate::time::Instant;

pub use canbridge_driver::frame::{HardwareFrame, LengthCode, MAX_DATA_LENGTH};

pub type Payload = heapless::Vec<u8, MAX_DATA_LENGTH>;

/// Protocol-side frame
///
/// The identifier is a plain 29-bit value. Format flags exist on the hardware side only.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GenericFrame {
    pub can_id: u32,
    pub payload: Payload,
    /// Reception time, or the transmission deadline on the way out
    pub timestamp: Option<Instant>,
}

impl GenericFrame {
    /// Returns `None` if the payload exceeds the hardware maximum.
    pub fn new(can_id: u32, payload: &[u8], timestamp: Option<Instant>) -> Option<Self> {
        Some(Self {
            can_id,
            payload: Payload::from_slice(payload).ok()?,
            timestamp,
        })
    }

    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }
}

/// Transmission deadline of a queued frame
///
/// `Immediate` orders before every timed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Deadline {
    Immediate,
    At(Instant),
}

impl Deadline {
    /// A frame is due once its deadline is strictly in the past.
    pub fn is_due(self, now: Instant) -> bool {
        match self {
            Deadline::Immediate => true,
            Deadline::At(deadline) => deadline < now,
        }
    }

    pub fn instant(self) -> Option<Instant> {
        match self {
            Deadline::Immediate => None,
            Deadline::At(deadline) => Some(deadline),
        }
    }
}

/// Frame waiting in the egress queue
///
/// The payload lives in the bridge arena. It is freed after the bus write attempt.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingFrame {
    pub can_id: u32,
    pub priority: Priority,
    pub deadline: Deadline,
    pub payload: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferMeta {
    pub kind: TransferKind,
    pub port: PortId,
    /// `None` for anonymous transfers
    pub source: Option<NodeId>,
    /// `None` for broadcast messages
    pub destination: Option<NodeId>,
    pub transfer_id: TransferId,
    pub priority: Priority,
    pub timestamp: Option<Instant>,
}

/// Reassembled inbound transfer. The payload must be returned to the arena it came from.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CompletedTransfer {
    pub meta: TransferMeta,
    pub payload: Block,
}
