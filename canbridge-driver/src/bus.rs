//! Bus transport interface
//!
//! A bus driver opens a named interface and splits it into a receiving and a transmitting half,
//! so that the ingress and egress paths can run on different threads without sharing a handle.

use crate::frame::HardwareFrame;
use crate::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The interface name does not resolve
    NoSuchInterface,
    /// The interface went down or was removed
    Down,
    /// The controller refused the frame, e.g., its transmit buffer is full
    Rejected,
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BusError::NoSuchInterface => f.write_str("no such interface"),
            BusError::Down => f.write_str("interface is down"),
            BusError::Rejected => f.write_str("frame rejected by the controller"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BusError {}

/// Receiving half of a bus
pub trait BusRx {
    /// Blocks until a frame arrives or `timeout` expires.
    ///
    /// Returns `Ok(None)` on timeout. An error means the interface can not be read anymore.
    fn read(&mut self, timeout: Duration) -> Result<Option<HardwareFrame>, BusError>;
}

/// Transmitting half of a bus
pub trait BusTx {
    /// Hands the frame to the controller. Should not block for longer than a single
    /// frame submission.
    fn write(&mut self, frame: &HardwareFrame) -> Result<(), BusError>;
}

/// Bus connection
pub trait Bus: Sized {
    type Rx: BusRx + Send;
    type Tx: BusTx + Send;

    fn open(interface: &str) -> Result<Self, BusError>;

    fn split(self) -> (Self::Rx, Self::Tx);
}

impl<T: BusTx + ?Sized> BusTx for &mut T {
    fn write(&mut self, frame: &HardwareFrame) -> Result<(), BusError> {
        (**self).write(frame)
    }
}

impl<T: BusRx + ?Sized> BusRx for &mut T {
    fn read(&mut self, timeout: Duration) -> Result<Option<HardwareFrame>, BusError> {
        (**self).read(timeout)
    }
}
