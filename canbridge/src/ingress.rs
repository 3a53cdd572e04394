//! Inbound path
//!
//! Bus frames are translated and fed to the reassembler under the bridge mutex. A completed
//! transfer is copied out and its memory released before the lock is dropped, so the payload is
//! freed exactly once whatever the decoder does. Decoding and delivery run without the lock.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::bridge::{Bridge, CancellationToken};
use crate::bus::{BusError, BusRx};
use crate::codec::Codec;
use crate::engine::{Accepted, RxEngine};
use crate::frame::{HardwareFrame, TransferMeta};
use crate::time::Instant;
use crate::translate::from_hardware;

/// Inbound path state, published through [`BridgeStats::ingress_state`]
///
/// [`BridgeStats::ingress_state`]: crate::BridgeStats::ingress_state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IngressState {
    /// Waiting for the next frame
    #[default]
    Waiting,
    /// Handling an arrived frame, including decoding and delivery of the transfer it completes
    Dispatching,
}

/// Outcome of a single inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// Dropped for exceeding the MTU
    Oversize,
    Rejected,
    Consumed,
    Delivered,
    /// The transfer completed, but its payload did not decode
    DecodeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxError {
    /// The bus can not be read anymore
    ReadFailed { source: BusError, at: Instant },
}

impl core::fmt::Display for RxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RxError::ReadFailed { source, at } => {
                write!(f, "bus read failed at {} us: {}", at.as_micros(), source)
            }
        }
    }
}

impl std::error::Error for RxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RxError::ReadFailed { source, .. } => Some(source),
        }
    }
}

/// Receiver of decoded messages
pub trait Consumer<T> {
    fn consume(&mut self, meta: TransferMeta, message: T);
}

impl<T, F: FnMut(TransferMeta, T)> Consumer<T> for F {
    fn consume(&mut self, meta: TransferMeta, message: T) {
        self(meta, message)
    }
}

pub struct Ingress<'a, M: RawMutex, TX, RX, C, K> {
    bridge: &'a Bridge<M, TX, RX>,
    codec: C,
    consumer: K,
    scratch: Vec<u8>,
}

impl<'a, M, TX, RX, C, K> Ingress<'a, M, TX, RX, C, K>
where
    M: RawMutex,
    RX: RxEngine,
    C: Codec,
    K: Consumer<C::Message>,
{
    pub fn new(bridge: &'a Bridge<M, TX, RX>, codec: C, consumer: K) -> Self {
        Self {
            bridge,
            codec,
            consumer,
            scratch: Vec::with_capacity(C::EXTENT),
        }
    }

    /// Processes one bus frame received at `now`.
    ///
    /// The ingress state reads `Dispatching` from arrival until the returned outcome is known.
    pub fn on_frame(&mut self, frame: &HardwareFrame, now: Instant) -> Dispatch {
        let stats = self.bridge.stats();
        stats.set_ingress_state(IngressState::Dispatching);
        let dispatch = self.dispatch(frame, now);
        stats.set_ingress_state(IngressState::Waiting);
        dispatch
    }

    fn dispatch(&mut self, frame: &HardwareFrame, now: Instant) -> Dispatch {
        let stats = self.bridge.stats();
        stats.frame_received();

        let frame = match from_hardware(frame, self.bridge.config().mtu, Some(now)) {
            Ok(frame) => frame,
            Err(err) => {
                stats.oversize_frame();
                debug!(
                    "dropped frame 0x{:08x} with length code {}",
                    err.can_id, err.length_code
                );
                return Dispatch::Oversize;
            }
        };

        let scratch = &mut self.scratch;
        let accepted = self.bridge.lock(|shared| {
            match shared.rx.accept(&mut shared.arena, &frame) {
                Accepted::Rejected => Err(Dispatch::Rejected),
                Accepted::Consumed => Err(Dispatch::Consumed),
                Accepted::Complete(transfer) => {
                    scratch.clear();
                    scratch.extend(shared.arena.chunks(&transfer.payload).flatten());
                    shared.arena.free(transfer.payload);
                    Ok(transfer.meta)
                }
            }
        });

        let meta = match accepted {
            Ok(meta) => meta,
            Err(dispatch) => {
                if dispatch == Dispatch::Rejected {
                    stats.frame_rejected();
                } else {
                    stats.frame_consumed();
                }
                return dispatch;
            }
        };
        stats.transfer_completed();

        match self.codec.deserialize(&self.scratch) {
            Ok(message) => {
                self.consumer.consume(meta, message);
                Dispatch::Delivered
            }
            Err(err) => {
                stats.decode_error();
                warn!(
                    "transfer {} from port {} with {} bytes failed to decode: {}",
                    meta.transfer_id.into_u8(),
                    meta.port.into_u16(),
                    self.scratch.len(),
                    err
                );
                Dispatch::DecodeFailed
            }
        }
    }
}

/// Reads the bus and dispatches frames until cancelled or the bus fails
pub struct RxRunner<'a, M: RawMutex, TX, RX, C, K, B> {
    ingress: Ingress<'a, M, TX, RX, C, K>,
    bus: B,
    cancel: CancellationToken,
}

impl<'a, M, TX, RX, C, K, B> RxRunner<'a, M, TX, RX, C, K, B>
where
    M: RawMutex,
    RX: RxEngine,
    C: Codec,
    K: Consumer<C::Message>,
    B: BusRx,
{
    pub fn new(ingress: Ingress<'a, M, TX, RX, C, K>, bus: B, cancel: CancellationToken) -> Self {
        Self {
            ingress,
            bus,
            cancel,
        }
    }

    /// Cancellation is noticed within one read timeout. A bus read error ends the loop.
    pub fn run(&mut self) -> Result<(), RxError> {
        let config = self.ingress.bridge.config();
        let timeout = config.rx_timeout;

        info!("receive runner started on {}", config.interface.as_str());
        while !self.cancel.is_cancelled() {
            match self.bus.read(timeout) {
                Ok(Some(frame)) => {
                    self.ingress.on_frame(&frame, Instant::now());
                }
                Ok(None) => {}
                Err(source) => {
                    let at = Instant::now();
                    error!("bus read failed: {}", source);
                    return Err(RxError::ReadFailed { source, at });
                }
            }
        }
        info!("receive runner stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::codec::CodecError;
    use crate::config::Config;
    use crate::core::{Priority, SubjectId, TransferId, TransferKind};
    use crate::frame::{CompletedTransfer, GenericFrame, MAX_DATA_LENGTH};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::collections::VecDeque;

    enum Script {
        Reject,
        Consume,
        Complete,
    }

    /// Reassembler that replays scripted outcomes. `Complete` carries the frame payload.
    struct Replay(VecDeque<Script>);

    impl RxEngine for Replay {
        fn accept(&mut self, arena: &mut Arena, frame: &GenericFrame) -> Accepted {
            match self.0.pop_front() {
                Some(Script::Consume) => Accepted::Consumed,
                Some(Script::Complete) => match arena.store(&frame.payload) {
                    Ok(payload) => Accepted::Complete(CompletedTransfer {
                        meta: TransferMeta {
                            kind: TransferKind::Message,
                            port: SubjectId::new(7509).unwrap().into(),
                            source: None,
                            destination: None,
                            transfer_id: TransferId::default(),
                            priority: Priority::Nominal,
                            timestamp: frame.timestamp,
                        },
                        payload,
                    }),
                    Err(_) => Accepted::Rejected,
                },
                Some(Script::Reject) | None => Accepted::Rejected,
            }
        }
    }

    /// First byte is the message, a zero byte is malformed
    struct ByteCodec;

    impl Codec for ByteCodec {
        type Message = u8;
        const EXTENT: usize = 1;

        fn serialize(&self, message: &u8, buffer: &mut [u8]) -> Result<usize, CodecError> {
            let slot = buffer.first_mut().ok_or(CodecError::BufferTooSmall)?;
            *slot = *message;
            Ok(1)
        }

        fn deserialize(&self, bytes: &[u8]) -> Result<u8, CodecError> {
            match bytes.first() {
                Some(0) | None => Err(CodecError::Malformed),
                Some(&value) => Ok(value),
            }
        }
    }

    fn bridge(script: Vec<Script>) -> Bridge<NoopRawMutex, (), Replay> {
        let config = Config::default().with_arena(256, 64);
        Bridge::new(config, (), Replay(script.into())).unwrap()
    }

    fn frame(payload: &[u8]) -> HardwareFrame {
        HardwareFrame::from_raw(0x107d_552a | (1 << 31), payload.len() as u8, {
            let mut data = [0; MAX_DATA_LENGTH];
            data[..payload.len()].copy_from_slice(payload);
            data
        })
    }

    #[test]
    fn test_multi_frame_transfer_delivered_once() {
        let bridge = bridge(vec![Script::Consume, Script::Consume, Script::Complete]);
        let mut delivered = Vec::new();
        let mut ingress = bridge.ingress(ByteCodec, |meta: TransferMeta, message: u8| {
            delivered.push((meta.timestamp, message))
        });

        let now = Instant::from_millis(3);
        assert_eq!(ingress.on_frame(&frame(&[1]), now), Dispatch::Consumed);
        assert_eq!(ingress.on_frame(&frame(&[2]), now), Dispatch::Consumed);
        assert_eq!(ingress.on_frame(&frame(&[3]), now), Dispatch::Delivered);
        assert_eq!(bridge.stats().ingress_state(), IngressState::Waiting);
        drop(ingress);

        assert_eq!(delivered, [(Some(now), 3)]);
        assert_eq!(bridge.arena_stats().allocated, 0);
        let stats = bridge.stats().snapshot();
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.consumed_frames, 2);
        assert_eq!(stats.transfers_completed, 1);
    }

    #[test]
    fn test_decode_failure_frees_and_continues() {
        let bridge = bridge(vec![Script::Complete, Script::Complete]);
        let mut delivered = Vec::new();
        let mut ingress = bridge.ingress(ByteCodec, |_: TransferMeta, message: u8| {
            delivered.push(message)
        });

        let now = Instant::from_millis(1);
        assert_eq!(ingress.on_frame(&frame(&[0]), now), Dispatch::DecodeFailed);
        assert_eq!(bridge.arena_stats().allocated, 0);
        assert_eq!(ingress.on_frame(&frame(&[5]), now), Dispatch::Delivered);
        drop(ingress);

        assert_eq!(delivered, [5]);
        assert_eq!(bridge.stats().snapshot().decode_errors, 1);
    }

    #[test]
    fn test_consumer_sees_dispatching() {
        let bridge = bridge(vec![Script::Complete]);
        let mut seen = Vec::new();
        assert_eq!(bridge.stats().ingress_state(), IngressState::Waiting);
        let mut ingress = bridge.ingress(ByteCodec, |_: TransferMeta, _: u8| {
            seen.push(bridge.stats().ingress_state())
        });
        assert_eq!(
            ingress.on_frame(&frame(&[9]), Instant::from_millis(1)),
            Dispatch::Delivered
        );
        drop(ingress);

        assert_eq!(seen, [IngressState::Dispatching]);
        assert_eq!(bridge.stats().ingress_state(), IngressState::Waiting);
    }

    #[test]
    fn test_rejected_frame() {
        let bridge = bridge(vec![Script::Reject]);
        let mut delivered = 0;
        let mut ingress = bridge.ingress(ByteCodec, |_: TransferMeta, _: u8| delivered += 1);
        assert_eq!(
            ingress.on_frame(&frame(&[1]), Instant::from_millis(1)),
            Dispatch::Rejected
        );
        drop(ingress);
        assert_eq!(delivered, 0);
        assert_eq!(bridge.stats().snapshot().rejected_frames, 1);
    }

    #[test]
    fn test_oversize_frame_dropped() {
        let config = Config::default()
            .with_arena(256, 64)
            .with_mtu(crate::core::Mtu::Classic);
        let bridge =
            Bridge::<NoopRawMutex, (), Replay>::new(config, (), Replay(VecDeque::new())).unwrap();
        let mut ingress = bridge.ingress(ByteCodec, |_: TransferMeta, _: u8| {});
        let frame = HardwareFrame::from_raw(0x10, 9, [1; MAX_DATA_LENGTH]);
        assert_eq!(
            ingress.on_frame(&frame, Instant::from_millis(1)),
            Dispatch::Oversize
        );
        assert_eq!(bridge.stats().snapshot().oversize_frames, 1);
    }
}
