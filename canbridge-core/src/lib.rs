//! Protocol scalar types
//!
//! Identifiers and enumerations shared by the bus driver interface and the bridge.
//! Users should not depend on this crate directly. Use the `canbridge::core` reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Transfer priority
///
/// The numeric code matches the 3-bit priority field of the CAN identifier, so a lower code
/// wins arbitration and is ordered first: `Exceptional < Immediate < .. < Optional`.
/// Queues that sort by "ascending priority rank" therefore sort by this `Ord`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    /// Reserved for total system failure handling. Not accounted for in bus load budgets.
    Exceptional = 0,
    Immediate = 1,
    Fast = 2,
    /// Commands that must get through even when nominal traffic misbehaves.
    High = 3,
    /// Default for regular traffic, heartbeats included.
    Nominal = 4,
    Low = 5,
    Slow = 6,
    /// Diagnostics. May never be sent on a loaded bus.
    Optional = 7,
}

impl Priority {
    pub const MIN: Priority = Priority::Exceptional;
    pub const MAX: Priority = Priority::Optional;
    pub const LEVEL_COUNT: usize = Self::MAX.into_u8() as usize + 1;

    pub const fn try_from_u8(code: u8) -> Option<Priority> {
        if code <= Self::MAX.into_u8() {
            Some(Priority::from_u8_truncating(code))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(code: u8) -> Priority {
        match code & 0x7 {
            0 => Priority::Exceptional,
            1 => Priority::Immediate,
            2 => Priority::Fast,
            3 => Priority::High,
            4 => Priority::Nominal,
            5 => Priority::Low,
            6 => Priority::Slow,
            _ => Priority::Optional,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Nominal
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.into_u8()
    }
}

impl From<Priority> for usize {
    fn from(value: Priority) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// A set of priority levels
///
/// Bit `n` stands for the priority with code `n`, so `first()` yields the most urgent member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PrioritySet(u8);

impl PrioritySet {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(u8::MAX);

    pub const fn new_eq(priority: Priority) -> Self {
        Self(1u8 << priority.into_u8())
    }

    pub const fn contains(&self, priority: Priority) -> bool {
        (self.0 >> priority.into_u8()) & 0x1 != 0
    }

    pub const fn insert(&mut self, priority: Priority) {
        self.0 |= Self::new_eq(priority).0
    }

    pub const fn remove(&mut self, priority: Priority) {
        self.0 &= !Self::new_eq(priority).0
    }

    /// Most urgent member
    pub const fn first(&self) -> Option<Priority> {
        Priority::try_from_u8(self.0.trailing_zeros() as u8)
    }

    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == Self::NONE.0
    }
}

impl core::ops::BitOr<PrioritySet> for PrioritySet {
    type Output = Self;
    fn bitor(self, rhs: PrioritySet) -> Self::Output {
        PrioritySet(self.0 | rhs.0)
    }
}

impl core::ops::BitAnd<PrioritySet> for PrioritySet {
    type Output = Self;
    fn bitand(self, rhs: PrioritySet) -> Self::Output {
        PrioritySet(self.0 & rhs.0)
    }
}

impl core::iter::IntoIterator for PrioritySet {
    type Item = Priority;
    type IntoIter = PrioritySetIter;
    fn into_iter(self) -> Self::IntoIter {
        PrioritySetIter { residual: self }
    }
}

pub struct PrioritySetIter {
    residual: PrioritySet,
}

impl core::iter::Iterator for PrioritySetIter {
    type Item = Priority;
    fn next(&mut self) -> Option<Self::Item> {
        let first = self.residual.first();
        if let Some(priority) = first {
            self.residual.remove(priority);
        }
        first
    }
}

/// Node address, 7 bit
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u8);

impl NodeId {
    const MAX_VALUE: u8 = 0x7f;
    pub const MAX: NodeId = NodeId(Self::MAX_VALUE);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Message subject, 13 bit
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubjectId(u16);

impl SubjectId {
    const MAX_VALUE: u16 = 0x1fff;
    pub const MAX: SubjectId = SubjectId(Self::MAX_VALUE);

    pub const fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn from_u16_truncating(value: u16) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<SubjectId> for u16 {
    fn from(value: SubjectId) -> Self {
        value.into_u16()
    }
}

impl TryFrom<u16> for SubjectId {
    type Error = InvalidValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Service identifier, 9 bit
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceId(u16);

impl ServiceId {
    const MAX_VALUE: u16 = 0x1ff;
    pub const MAX: ServiceId = ServiceId(Self::MAX_VALUE);

    pub const fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn from_u16_truncating(value: u16) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<ServiceId> for u16 {
    fn from(value: ServiceId) -> Self {
        value.into_u16()
    }
}

impl TryFrom<u16> for ServiceId {
    type Error = InvalidValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Port a transfer is addressed to
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortId {
    Subject(SubjectId),
    Service(ServiceId),
}

impl PortId {
    pub const fn into_u16(self) -> u16 {
        match self {
            PortId::Subject(subject) => subject.into_u16(),
            PortId::Service(service) => service.into_u16(),
        }
    }
}

impl From<SubjectId> for PortId {
    fn from(value: SubjectId) -> Self {
        PortId::Subject(value)
    }
}

impl From<ServiceId> for PortId {
    fn from(value: ServiceId) -> Self {
        PortId::Service(value)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferKind {
    Message,
    Request,
    Response,
}

/// Transfer sequence number, 5 bit, wrapping
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferId(u8);

impl TransferId {
    const MAX_VALUE: u8 = 0x1f;
    pub const MAX: TransferId = TransferId(Self::MAX_VALUE);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self((self.0 + 1) & Self::MAX_VALUE)
    }
}

impl From<TransferId> for u8 {
    fn from(value: TransferId) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for TransferId {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// A transport-layer maximum transmission unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mtu {
    Classic,
    #[default]
    Fd,
}

impl Mtu {
    pub const fn bytes(self) -> usize {
        match self {
            Mtu::Classic => 8,
            Mtu::Fd => 64,
        }
    }
}

impl From<Mtu> for usize {
    fn from(value: Mtu) -> Self {
        value.bytes()
    }
}

impl TryFrom<usize> for Mtu {
    type Error = InvalidValue;
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            8 => Ok(Mtu::Classic),
            64 => Ok(Mtu::Fd),
            _ => Err(InvalidValue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_matches_code() {
        assert!(Priority::Exceptional < Priority::Nominal);
        assert!(Priority::Nominal < Priority::Optional);
        for code in 0..8u8 {
            assert_eq!(Priority::try_from_u8(code).map(u8::from), Some(code));
        }
        assert!(Priority::try_from(8).is_err());
    }

    #[test]
    fn test_priority_set() {
        let mut set = PrioritySet::NONE;
        set.insert(Priority::Low);
        set.insert(Priority::Fast);
        assert_eq!(set.first(), Some(Priority::Fast));
        assert_eq!(set.len(), 2);

        set.remove(Priority::Fast);
        assert_eq!(set.first(), Some(Priority::Low));
        set.remove(Priority::Low);
        assert!(set.is_empty());
        assert_eq!(set.first(), None);
    }

    #[test]
    fn test_priority_set_iter() {
        let set = PrioritySet::new_eq(Priority::Slow) | PrioritySet::new_eq(Priority::High);
        let mut iter = set.into_iter();
        assert_eq!(iter.next(), Some(Priority::High));
        assert_eq!(iter.next(), Some(Priority::Slow));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_transfer_id_wraps() {
        assert_eq!(TransferId::MAX.next(), TransferId::default());
        assert_eq!(TransferId::from_u8_truncating(33).into_u8(), 1);
        assert!(TransferId::new(32).is_none());
    }

    #[test]
    fn test_id_ranges() {
        assert!(NodeId::new(127).is_some());
        assert!(NodeId::new(128).is_none());
        assert!(SubjectId::new(8191).is_some());
        assert!(SubjectId::new(8192).is_none());
        assert!(ServiceId::new(511).is_some());
        assert!(ServiceId::new(512).is_none());
    }

    #[test]
    fn test_mtu() {
        assert_eq!(usize::from(Mtu::Classic), 8);
        assert_eq!(Mtu::try_from(64).ok(), Some(Mtu::Fd));
        assert!(Mtu::try_from(12).is_err());
    }
}
