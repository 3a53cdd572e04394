//! Hardware bus frame
//!
//! The layout mirrors the Linux `canfd_frame`: a 32-bit identifier word carrying the
//! extended-format flag in its most significant bit, a data length code, and a 64-byte data area.

use embedded_can::{ExtendedId, Id, StandardId};

/// Extended frame format flag of the identifier word
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Valid bits of a standard (11-bit) identifier
pub const CAN_SFF_MASK: u32 = 0x0000_07ff;
/// Valid bits of an extended (29-bit) identifier
pub const CAN_EFF_MASK: u32 = 0x1fff_ffff;

/// Data area capacity of a hardware frame
pub const MAX_DATA_LENGTH: usize = 64;

/// Exact byte count of every data length code
///
/// Codes above 8 stand for coarsely quantized lengths. The table is part of the bus format and
/// must stay bit-exact.
pub const CODE_TO_LENGTH: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Smallest data length code able to carry the given byte count
#[rustfmt::skip]
pub const LENGTH_TO_CODE: [u8; MAX_DATA_LENGTH + 1] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8,                              // 0-8
    9, 9, 9, 9,                                             // 9-12
    10, 10, 10, 10,                                         // 13-16
    11, 11, 11, 11,                                         // 17-20
    12, 12, 12, 12,                                         // 21-24
    13, 13, 13, 13, 13, 13, 13, 13,                         // 25-32
    14, 14, 14, 14, 14, 14, 14, 14, 14, 14, 14, 14, 14, 14, 14, 14, // 33-48
    15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, // 49-64
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidLengthCode(pub u8);

/// Data length code (DLC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LengthCode(u8);

impl LengthCode {
    pub const MAX: LengthCode = LengthCode(15);

    pub const fn new(code: u8) -> Option<Self> {
        if code <= Self::MAX.0 {
            Some(Self(code))
        } else {
            None
        }
    }

    /// Rounds the byte count up to the nearest representable length.
    ///
    /// Returns `None` for lengths beyond the data area capacity.
    pub const fn for_length(length: usize) -> Option<Self> {
        if length <= MAX_DATA_LENGTH {
            Some(Self(LENGTH_TO_CODE[length]))
        } else {
            None
        }
    }

    pub const fn length(self) -> usize {
        CODE_TO_LENGTH[self.0 as usize] as usize
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<LengthCode> for u8 {
    fn from(value: LengthCode) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for LengthCode {
    type Error = InvalidLengthCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidLengthCode(value))
    }
}

/// Frame as seen by the bus driver
///
/// The length code is kept raw, as read from the wire. Use [`HardwareFrame::length`] to check it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HardwareFrame {
    can_id: u32,
    length_code: u8,
    data: [u8; MAX_DATA_LENGTH],
}

impl HardwareFrame {
    /// Wraps the raw words a bus driver produced.
    pub const fn from_raw(can_id: u32, length_code: u8, data: [u8; MAX_DATA_LENGTH]) -> Self {
        Self {
            can_id,
            length_code,
            data,
        }
    }

    /// Builds a data frame. `payload` is zero-padded up to the length the code implies.
    pub fn new(id: Id, payload: &[u8]) -> Option<Self> {
        let code = LengthCode::for_length(payload.len())?;
        let mut data = [0; MAX_DATA_LENGTH];
        data[..payload.len()].copy_from_slice(payload);
        let can_id = match id {
            Id::Standard(id) => u32::from(id.as_raw()),
            Id::Extended(id) => id.as_raw() | CAN_EFF_FLAG,
        };
        Some(Self::from_raw(can_id, code.into_u8(), data))
    }

    /// Identifier word including the format flag
    pub const fn can_id(&self) -> u32 {
        self.can_id
    }

    pub const fn is_extended(&self) -> bool {
        self.can_id & CAN_EFF_FLAG != 0
    }

    /// Identifier without the format flag
    pub const fn identifier(&self) -> u32 {
        if self.is_extended() {
            self.can_id & CAN_EFF_MASK
        } else {
            self.can_id & CAN_SFF_MASK
        }
    }

    pub const fn length_code(&self) -> u8 {
        self.length_code
    }

    /// Byte count implied by the length code
    pub fn length(&self) -> Result<usize, InvalidLengthCode> {
        LengthCode::try_from(self.length_code).map(LengthCode::length)
    }

    /// Whole data area, padding included
    pub const fn raw_data(&self) -> &[u8; MAX_DATA_LENGTH] {
        &self.data
    }
}

impl embedded_can::Frame for HardwareFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        HardwareFrame::new(id.into(), data)
    }

    /// Remote frames are not used by the protocol
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        HardwareFrame::is_extended(self)
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        if self.is_extended() {
            Id::Extended(unwrap!(ExtendedId::new(self.identifier())))
        } else {
            Id::Standard(unwrap!(StandardId::new(self.identifier() as u16)))
        }
    }

    fn dlc(&self) -> usize {
        self.length_code.into()
    }

    fn data(&self) -> &[u8] {
        let length = self.length().unwrap_or(MAX_DATA_LENGTH);
        &self.data[..length]
    }
}
