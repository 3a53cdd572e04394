//! Outbound path
//!
//! Producers enqueue transfers through the engine. The drain pops due frames one at a time and
//! writes them to the bus with the bridge mutex released, so a slow bus never blocks producers
//! or the receive path.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::bridge::{Bridge, CancellationToken, Shared, std_duration};
use crate::bus::{BusError, BusTx};
use crate::codec::{Codec, CodecError};
use crate::core::{PortId, Priority, SubjectId, TransferId, TransferKind};
use crate::engine::{EngineError, TxEngine};
use crate::frame::{Deadline, GenericFrame, MAX_DATA_LENGTH, Payload, PendingFrame, TransferMeta};
use crate::time::{Duration, Instant};
use crate::translate::to_hardware;

mod queue;

pub use queue::TxQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxError {
    /// The engine refused the transfer. Nothing was enqueued.
    QueueRejected {
        port: PortId,
        transfer_id: TransferId,
        reason: EngineError,
        at: Instant,
    },
    Serialize(CodecError),
    /// The bus refused the frame. The frame is dropped.
    WriteFailed {
        can_id: u32,
        deadline: Deadline,
        source: BusError,
        at: Instant,
    },
    /// The engine produced a frame beyond the hardware capacity. The frame is dropped.
    FrameTooLarge { can_id: u32, length: usize },
}

impl core::fmt::Display for TxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TxError::QueueRejected {
                port,
                transfer_id,
                reason,
                at,
            } => write!(
                f,
                "transfer {} to port {} rejected at {} us: {}",
                transfer_id.into_u8(),
                port.into_u16(),
                at.as_micros(),
                reason
            ),
            TxError::Serialize(err) => write!(f, "serialization failed: {err}"),
            TxError::WriteFailed {
                can_id, source, at, ..
            } => write!(
                f,
                "write of frame 0x{can_id:08x} failed at {} us: {source}",
                at.as_micros()
            ),
            TxError::FrameTooLarge { can_id, length } => {
                write!(f, "frame 0x{can_id:08x} with {length} bytes exceeds the data area")
            }
        }
    }
}

impl std::error::Error for TxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TxError::QueueRejected { reason, .. } => Some(reason),
            TxError::Serialize(err) => Some(err),
            TxError::WriteFailed { source, .. } => Some(source),
            TxError::FrameTooLarge { .. } => None,
        }
    }
}

/// Message producer state
///
/// Holds the codec and the transfer-id counter of one subject. The transfer id advances only when
/// a transfer is accepted.
pub struct Publisher<C: Codec> {
    codec: C,
    subject: SubjectId,
    priority: Priority,
    transfer_id: TransferId,
    scratch: Vec<u8>,
}

impl<C: Codec> Publisher<C> {
    pub fn new(codec: C, subject: SubjectId, priority: Priority) -> Self {
        Self {
            codec,
            subject,
            priority,
            transfer_id: TransferId::default(),
            scratch: vec![0; C::EXTENT],
        }
    }

    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Transfer id of the next publication
    pub fn transfer_id(&self) -> TransferId {
        self.transfer_id
    }
}

impl<M: RawMutex, TX: TxEngine, RX> Bridge<M, TX, RX> {
    /// Hands the transfer to the engine at `now`. Returns the number of frames enqueued.
    ///
    /// A rejection leaves the queue untouched. Retrying, waiting, or dropping the transfer is up
    /// to the caller.
    pub fn enqueue(
        &self,
        meta: &TransferMeta,
        deadline: Deadline,
        payload: &[u8],
        now: Instant,
    ) -> Result<usize, TxError> {
        let mtu = self.config().mtu;
        let result =
            self.lock(|shared| shared.tx.push(&mut shared.arena, meta, deadline, payload, mtu));
        match result {
            Ok(count) => {
                trace!(
                    "enqueued transfer {} to port {} as {} frames",
                    meta.transfer_id.into_u8(),
                    meta.port.into_u16(),
                    count
                );
                Ok(count)
            }
            Err(reason) => {
                self.stats().enqueue_rejected();
                warn!(
                    "transfer {} to port {} rejected: {}",
                    meta.transfer_id.into_u8(),
                    meta.port.into_u16(),
                    reason
                );
                Err(TxError::QueueRejected {
                    port: meta.port,
                    transfer_id: meta.transfer_id,
                    reason,
                    at: now,
                })
            }
        }
    }

    /// Serializes and enqueues a message. Returns the transfer id used.
    pub fn publish<C: Codec>(
        &self,
        publisher: &mut Publisher<C>,
        message: &C::Message,
        now: Instant,
    ) -> Result<TransferId, TxError> {
        let size = publisher
            .codec
            .serialize(message, &mut publisher.scratch)
            .map_err(TxError::Serialize)?;

        let transfer_id = publisher.transfer_id;
        let meta = TransferMeta {
            kind: TransferKind::Message,
            port: publisher.subject.into(),
            source: Some(self.config().node_id),
            destination: None,
            transfer_id,
            priority: publisher.priority,
            timestamp: Some(now),
        };
        let deadline = self.config().deadline_policy.deadline(now);
        self.enqueue(&meta, deadline, &publisher.scratch[..size], now)?;

        publisher.transfer_id = transfer_id.next();
        Ok(transfer_id)
    }

    /// Writes every frame due at `now` to the bus. Returns the number of frames written.
    ///
    /// The first write failure stops the drain. The failed frame is dropped, the frames behind it
    /// stay queued for the next call.
    pub fn drain_ready<B: BusTx + ?Sized>(
        &self,
        bus: &mut B,
        now: Instant,
    ) -> Result<usize, TxError> {
        let mut sent = 0;
        loop {
            let Some((pending, frame)) = self.lock(|shared| pop_due(shared, now))? else {
                return Ok(sent);
            };

            let can_id = pending.can_id;
            let deadline = pending.deadline;
            trace!("frame 0x{:08x} {:?}", can_id, &frame.payload[..]);
            let result = bus.write(&to_hardware(frame));
            self.lock(|shared| shared.arena.free(pending.payload));

            match result {
                Ok(()) => {
                    self.stats().frame_sent();
                    sent += 1;
                }
                Err(source) => {
                    self.stats().write_error();
                    warn!("write of frame 0x{:08x} failed: {}", can_id, source);
                    return Err(TxError::WriteFailed {
                        can_id,
                        deadline,
                        source,
                        at: now,
                    });
                }
            }
        }
    }
}

fn pop_due<TX: TxEngine, RX>(
    shared: &mut Shared<TX, RX>,
    now: Instant,
) -> Result<Option<(PendingFrame, GenericFrame)>, TxError> {
    match shared.tx.peek() {
        Some(head) if head.deadline.is_due(now) => {}
        _ => return Ok(None),
    }
    let Some(pending) = shared.tx.pop() else {
        return Ok(None);
    };

    let length = pending.payload.len();
    if length > MAX_DATA_LENGTH {
        let can_id = pending.can_id;
        error!("dropping frame 0x{:08x} with {} bytes", can_id, length);
        shared.arena.free(pending.payload);
        return Err(TxError::FrameTooLarge { can_id, length });
    }

    let mut data = [0; MAX_DATA_LENGTH];
    let length = shared.arena.load(&pending.payload, &mut data);
    let frame = GenericFrame {
        can_id: pending.can_id,
        payload: unwrap!(Payload::from_slice(&data[..length])),
        timestamp: pending.deadline.instant(),
    };
    Ok(Some((pending, frame)))
}

/// Drains the egress queue periodically
pub struct TxRunner<'a, M: RawMutex, TX, RX, B> {
    bridge: &'a Bridge<M, TX, RX>,
    bus: B,
    cancel: CancellationToken,
}

impl<'a, M: RawMutex, TX: TxEngine, RX, B: BusTx> TxRunner<'a, M, TX, RX, B> {
    pub fn new(bridge: &'a Bridge<M, TX, RX>, bus: B, cancel: CancellationToken) -> Self {
        Self {
            bridge,
            bus,
            cancel,
        }
    }

    /// Runs until cancelled and the queue is empty.
    ///
    /// Write failures are logged and counted. The runner gives up and returns the last failure
    /// once `max_consecutive_write_errors` writes failed in a row.
    pub fn run(&mut self) -> Result<(), TxError> {
        let config = self.bridge.config();
        let limit = config.max_consecutive_write_errors;
        let period = std_duration(config.poll_interval);
        let mut failures = 0;

        info!("transmit runner started on {}", config.interface.as_str());
        loop {
            match self.bridge.drain_ready(&mut self.bus, Instant::now()) {
                Ok(_) => failures = 0,
                Err(err @ TxError::WriteFailed { .. }) => {
                    failures += 1;
                    if limit != 0 && failures >= limit {
                        error!(
                            "transmit runner gave up after {} consecutive write errors",
                            failures
                        );
                        return Err(err);
                    }
                }
                Err(_) => {}
            }

            if self.cancel.is_cancelled() && self.bridge.is_tx_idle() {
                info!("transmit runner stopped");
                return Ok(());
            }
            std::thread::sleep(period);
        }
    }
}

/// Message source of a periodic publisher, called with the publication time
pub trait MessageSource<T> {
    fn next_message(&mut self, now: Instant) -> T;
}

impl<T, F: FnMut(Instant) -> T> MessageSource<T> for F {
    fn next_message(&mut self, now: Instant) -> T {
        self(now)
    }
}

/// Publishes a message every period until cancelled
///
/// Periods missed because the runner was late are skipped, not caught up.
pub struct PublishRunner<'a, M: RawMutex, TX, RX, C: Codec, S> {
    bridge: &'a Bridge<M, TX, RX>,
    publisher: Publisher<C>,
    source: S,
    period: Duration,
    next: Option<Instant>,
    cancel: CancellationToken,
}

impl<'a, M, TX, RX, C, S> PublishRunner<'a, M, TX, RX, C, S>
where
    M: RawMutex,
    TX: TxEngine,
    C: Codec,
    S: MessageSource<C::Message>,
{
    /// Panics if `period` is zero.
    pub fn new(
        bridge: &'a Bridge<M, TX, RX>,
        publisher: Publisher<C>,
        source: S,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        assert!(period.as_ticks() > 0, "publication period is zero");
        Self {
            bridge,
            publisher,
            source,
            period,
            next: None,
            cancel,
        }
    }

    pub fn publisher(&self) -> &Publisher<C> {
        &self.publisher
    }

    /// When the next publication is due. `None` until the first poll, which publishes at once.
    pub fn next_due(&self) -> Option<Instant> {
        self.next
    }

    /// Publishes if a period elapsed at `now`. Returns the transfer id used, if any.
    pub fn poll(&mut self, now: Instant) -> Result<Option<TransferId>, TxError> {
        let due = *self.next.get_or_insert(now);
        if now < due {
            return Ok(None);
        }
        let mut next = due + self.period;
        if next <= now {
            next = now + self.period;
        }
        self.next = Some(next);

        let message = self.source.next_message(now);
        self.bridge
            .publish(&mut self.publisher, &message, now)
            .map(Some)
    }

    /// Runs until cancelled. Cancellation is noticed within one poll interval.
    ///
    /// A rejected publication is counted and its period skipped. A serialization failure ends
    /// the runner.
    pub fn run(&mut self) -> Result<(), TxError> {
        let slice = self.bridge.config().poll_interval;

        info!(
            "publisher on port {} started with a {} ms period",
            self.publisher.subject.into_u16(),
            self.period.as_millis()
        );
        while !self.cancel.is_cancelled() {
            let now = Instant::now();
            match self.poll(now) {
                Ok(_) | Err(TxError::QueueRejected { .. }) => {}
                Err(err) => {
                    error!("publisher stopped: {}", err);
                    return Err(err);
                }
            }
            let wait = self
                .next
                .map_or(slice, |next| next.saturating_duration_since(now).min(slice));
            std::thread::sleep(std_duration(wait));
        }
        info!("publisher stopped");
        Ok(())
    }
}
