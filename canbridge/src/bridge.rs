//! Bridge context
//!
//! A bridge owns the arena and the protocol engine of one bus connection. Producers, the transmit
//! runner and the receive runner share it by reference, typically from different threads. Engine
//! and arena accesses are serialized by a single blocking mutex. Bus I/O and message decoding
//! happen outside of it.

use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::arena::{Arena, ArenaError, ArenaStats};
use crate::bus::{Bus, BusError, BusRx, BusTx};
use crate::codec::Codec;
use crate::config::{Config, ConfigError};
use crate::egress::{MessageSource, PublishRunner, Publisher, TxRunner};
use crate::engine::{RxEngine, TxEngine};
use crate::ingress::{Consumer, Ingress, RxRunner};
use crate::stats::BridgeStats;

/// Cooperative stop request shared between the runners and their owner
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub(crate) struct Shared<TX, RX> {
    pub arena: Arena,
    pub tx: TX,
    pub rx: RX,
}

pub struct Bridge<M: RawMutex, TX, RX> {
    config: Config,
    shared: Mutex<M, RefCell<Shared<TX, RX>>>,
    stats: BridgeStats,
}

impl From<ArenaError> for ConfigError {
    fn from(value: ArenaError) -> Self {
        match value {
            ArenaError::ZeroBlockSize => ConfigError::ZeroBlockSize,
            ArenaError::TooSmall => ConfigError::ArenaSmallerThanBlock,
            ArenaError::TooLarge => ConfigError::ArenaTooLarge,
        }
    }
}

impl<M: RawMutex, TX, RX> Bridge<M, TX, RX> {
    /// Validates the configuration and reserves the arena.
    pub fn new(config: Config, tx: TX, rx: RX) -> Result<Self, ConfigError> {
        config.validate()?;
        let arena = Arena::new(config.arena_size, config.block_size)?;
        debug!(
            "bridge on {} with {} byte arena in {} byte blocks",
            config.interface.as_str(),
            arena.capacity(),
            arena.block_size()
        );
        Ok(Self {
            config,
            shared: Mutex::new(RefCell::new(Shared { arena, tx, rx })),
            stats: Default::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.lock(|shared| shared.arena.stats())
    }

    /// Opens the configured interface.
    pub fn open_bus<B: Bus>(&self) -> Result<(B::Rx, B::Tx), BusError> {
        let bus = B::open(&self.config.interface).inspect_err(|err| {
            error!(
                "failed to open {}: {}",
                self.config.interface.as_str(),
                err
            )
        })?;
        info!("opened {}", self.config.interface.as_str());
        Ok(bus.split())
    }

    /// Must not be called recursively from within `f`.
    pub(crate) fn lock<T>(&self, f: impl FnOnce(&mut Shared<TX, RX>) -> T) -> T {
        self.shared.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

impl<M: RawMutex, TX: TxEngine, RX> Bridge<M, TX, RX> {
    /// Whether the engine has no frame left to transmit
    pub fn is_tx_idle(&self) -> bool {
        self.lock(|shared| shared.tx.peek().is_none())
    }

    pub fn tx_runner<B: BusTx>(
        &self,
        bus: B,
        cancel: CancellationToken,
    ) -> TxRunner<'_, M, TX, RX, B> {
        TxRunner::new(self, bus, cancel)
    }

    /// Publishes a message from `source` every `period`. Panics if `period` is zero.
    pub fn publish_runner<C, S>(
        &self,
        publisher: Publisher<C>,
        source: S,
        period: crate::time::Duration,
        cancel: CancellationToken,
    ) -> PublishRunner<'_, M, TX, RX, C, S>
    where
        C: Codec,
        S: MessageSource<C::Message>,
    {
        PublishRunner::new(self, publisher, source, period, cancel)
    }
}

impl<M: RawMutex, TX, RX: RxEngine> Bridge<M, TX, RX> {
    pub fn ingress<C, K>(&self, codec: C, consumer: K) -> Ingress<'_, M, TX, RX, C, K>
    where
        C: Codec,
        K: Consumer<C::Message>,
    {
        Ingress::new(self, codec, consumer)
    }

    pub fn rx_runner<C, K, B>(
        &self,
        bus: B,
        codec: C,
        consumer: K,
        cancel: CancellationToken,
    ) -> RxRunner<'_, M, TX, RX, C, K, B>
    where
        C: Codec,
        K: Consumer<C::Message>,
        B: BusRx,
    {
        RxRunner::new(self.ingress(codec, consumer), bus, cancel)
    }
}

pub(crate) fn std_duration(duration: crate::time::Duration) -> std::time::Duration {
    std::time::Duration::from_micros(duration.as_micros())
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = Config::default().with_arena(0, 64);
        assert!(matches!(
            Bridge::<NoopRawMutex, (), ()>::new(config, (), ()),
            Err(ConfigError::ZeroArenaSize)
        ));
    }

    #[test]
    fn test_new_reserves_arena() {
        let config = Config::default().with_arena(1000, 64);
        let bridge = Bridge::<NoopRawMutex, (), ()>::new(config, (), ()).unwrap();
        let stats = bridge.arena_stats();
        assert_eq!(stats.capacity, 960);
        assert_eq!(stats.allocated, 0);
    }
}
