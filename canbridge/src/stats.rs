//! Bridge counters and the ingress state gauge
//!
//! Counters are updated outside the bridge mutex and read without synchronization against each
//! other, so a snapshot taken while the runners are active is not necessarily consistent.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::ingress::IngressState;

#[derive(Debug, Default)]
pub struct BridgeStats {
    frames_sent: AtomicU64,
    write_errors: AtomicU64,
    enqueue_rejections: AtomicU64,
    frames_received: AtomicU64,
    oversize_frames: AtomicU64,
    rejected_frames: AtomicU64,
    consumed_frames: AtomicU64,
    transfers_completed: AtomicU64,
    decode_errors: AtomicU64,
    dispatching: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub write_errors: u64,
    pub enqueue_rejections: u64,
    pub frames_received: u64,
    /// Inbound frames dropped for exceeding the MTU
    pub oversize_frames: u64,
    pub rejected_frames: u64,
    pub consumed_frames: u64,
    pub transfers_completed: u64,
    pub decode_errors: u64,
    pub ingress_state: IngressState,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl BridgeStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_sent: load(&self.frames_sent),
            write_errors: load(&self.write_errors),
            enqueue_rejections: load(&self.enqueue_rejections),
            frames_received: load(&self.frames_received),
            oversize_frames: load(&self.oversize_frames),
            rejected_frames: load(&self.rejected_frames),
            consumed_frames: load(&self.consumed_frames),
            transfers_completed: load(&self.transfers_completed),
            decode_errors: load(&self.decode_errors),
            ingress_state: self.ingress_state(),
        }
    }

    pub fn ingress_state(&self) -> IngressState {
        if self.dispatching.load(Ordering::Acquire) {
            IngressState::Dispatching
        } else {
            IngressState::Waiting
        }
    }

    pub(crate) fn set_ingress_state(&self, state: IngressState) {
        let dispatching = state == IngressState::Dispatching;
        self.dispatching.store(dispatching, Ordering::Release);
    }

    pub(crate) fn frame_sent(&self) {
        bump(&self.frames_sent);
    }

    pub(crate) fn write_error(&self) {
        bump(&self.write_errors);
    }

    pub(crate) fn enqueue_rejected(&self) {
        bump(&self.enqueue_rejections);
    }

    pub(crate) fn frame_received(&self) {
        bump(&self.frames_received);
    }

    pub(crate) fn oversize_frame(&self) {
        bump(&self.oversize_frames);
    }

    pub(crate) fn frame_rejected(&self) {
        bump(&self.rejected_frames);
    }

    pub(crate) fn frame_consumed(&self) {
        bump(&self.consumed_frames);
    }

    pub(crate) fn transfer_completed(&self) {
        bump(&self.transfers_completed);
    }

    pub(crate) fn decode_error(&self) {
        bump(&self.decode_errors);
    }
}
