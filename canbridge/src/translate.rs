//! Conversion between protocol-side and hardware frames

use embedded_can::{ExtendedId, Id, StandardId};

use crate::core::Mtu;
use crate::frame::{GenericFrame, HardwareFrame, LengthCode, Payload};
use crate::time::Instant;
use canbridge_driver::frame::{CAN_EFF_MASK, CAN_SFF_MASK, MAX_DATA_LENGTH};

/// Inbound frame carries more data than the configured transport accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameTooLarge {
    pub can_id: u32,
    pub length_code: u8,
    pub capacity: usize,
}

impl core::fmt::Display for FrameTooLarge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "frame 0x{:08x} with length code {} exceeds {} bytes",
            self.can_id, self.length_code, self.capacity
        )
    }
}

impl std::error::Error for FrameTooLarge {}

/// Builds the bus frame.
///
/// The length code is rounded up to the next representable length, so the payload is zero-padded
/// and never truncated. Identifiers that do not fit the standard format use the extended one.
pub fn to_hardware(frame: GenericFrame) -> HardwareFrame {
    let can_id = frame.can_id & CAN_EFF_MASK;
    let id = if can_id <= CAN_SFF_MASK {
        Id::Standard(unwrap!(StandardId::new(can_id as u16)))
    } else {
        Id::Extended(unwrap!(ExtendedId::new(can_id)))
    };
    // Payload capacity matches the data area, so the frame always fits
    unwrap!(HardwareFrame::new(id, &frame.payload))
}

/// Builds the protocol frame, attaching the reception timestamp.
pub fn from_hardware(
    frame: &HardwareFrame,
    mtu: Mtu,
    timestamp: Option<Instant>,
) -> Result<GenericFrame, FrameTooLarge> {
    let too_large = FrameTooLarge {
        can_id: frame.can_id(),
        length_code: frame.length_code(),
        capacity: mtu.bytes(),
    };
    let length = LengthCode::new(frame.length_code())
        .ok_or(too_large)?
        .length();
    if length > mtu.bytes() || length > MAX_DATA_LENGTH {
        return Err(too_large);
    }

    let payload = Payload::from_slice(&frame.raw_data()[..length]).map_err(|_| too_large)?;
    Ok(GenericFrame {
        can_id: frame.identifier(),
        payload,
        timestamp,
    })
}
