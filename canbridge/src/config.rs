//! Bridge configuration

use crate::core::{Mtu, NodeId};
use crate::frame::Deadline;
use crate::time::{Duration, Instant};

/// How a producer computes the transmission deadline of a new transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeadlinePolicy {
    /// Transmit on the next drain
    #[default]
    FireAndForget,
    /// Hold the frames back until the budget elapses
    Budget(Duration),
}

impl DeadlinePolicy {
    pub fn deadline(self, now: Instant) -> Deadline {
        match self {
            DeadlinePolicy::FireAndForget => Deadline::Immediate,
            DeadlinePolicy::Budget(budget) => Deadline::At(now + budget),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    EmptyInterface,
    ZeroArenaSize,
    ZeroBlockSize,
    /// One frame payload must fit a single block
    BlockSmallerThanFrame,
    ArenaSmallerThanBlock,
    /// The arena has more blocks than it can index
    ArenaTooLarge,
    ZeroPollInterval,
    ZeroRxTimeout,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            ConfigError::EmptyInterface => "interface name is empty",
            ConfigError::ZeroArenaSize => "arena size is zero",
            ConfigError::ZeroBlockSize => "block size is zero",
            ConfigError::BlockSmallerThanFrame => "block size is smaller than the MTU",
            ConfigError::ArenaSmallerThanBlock => "arena size is smaller than the block size",
            ConfigError::ArenaTooLarge => "arena has too many blocks",
            ConfigError::ZeroPollInterval => "poll interval is zero",
            ConfigError::ZeroRxTimeout => "receive timeout is zero",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// Bus interface name
    pub interface: String,
    /// Arena capacity in bytes, shared by outbound frames and inbound transfers
    pub arena_size: usize,
    pub block_size: usize,
    /// Local node identifier, used as the source of published transfers
    pub node_id: NodeId,
    pub mtu: Mtu,
    /// Drain period of the transmit runner
    pub poll_interval: Duration,
    /// Bus read timeout. Bounds the reaction time of the receive runner to cancellation.
    pub rx_timeout: Duration,
    pub deadline_policy: DeadlinePolicy,
    /// The transmit runner gives up after this many write failures in a row. Zero never gives up.
    pub max_consecutive_write_errors: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: String::from("vcan0"),
            arena_size: 4096,
            block_size: 64,
            node_id: NodeId::from_u8_truncating(96),
            mtu: Mtu::Fd,
            poll_interval: Duration::from_millis(5),
            rx_timeout: Duration::from_millis(100),
            deadline_policy: DeadlinePolicy::FireAndForget,
            max_consecutive_write_errors: 16,
        }
    }
}

impl Config {
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    pub fn with_arena(mut self, arena_size: usize, block_size: usize) -> Self {
        self.arena_size = arena_size;
        self.block_size = block_size;
        self
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = node_id;
        self
    }

    pub fn with_mtu(mut self, mtu: Mtu) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_rx_timeout(mut self, rx_timeout: Duration) -> Self {
        self.rx_timeout = rx_timeout;
        self
    }

    pub fn with_deadline_policy(mut self, policy: DeadlinePolicy) -> Self {
        self.deadline_policy = policy;
        self
    }

    pub fn with_max_consecutive_write_errors(mut self, count: u32) -> Self {
        self.max_consecutive_write_errors = count;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interface.is_empty() {
            return Err(ConfigError::EmptyInterface);
        }
        if self.arena_size == 0 {
            return Err(ConfigError::ZeroArenaSize);
        }
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.block_size < self.mtu.bytes() {
            return Err(ConfigError::BlockSmallerThanFrame);
        }
        if self.arena_size < self.block_size {
            return Err(ConfigError::ArenaSmallerThanBlock);
        }
        if self.poll_interval == Duration::from_ticks(0) {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.rx_timeout == Duration::from_ticks(0) {
            return Err(ConfigError::ZeroRxTimeout);
        }
        Ok(())
    }
}
