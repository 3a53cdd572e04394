//! # canbridge
//!
//! This library connects a priority-ordered transfer protocol (e.g., Cyphal/CAN \[1\]) to a raw
//! CAN bus. It schedules the frames of outbound transfers by priority and transmission deadline,
//! and hands inbound frames to a reassembler, delivering the decoded messages to a consumer.
//!
//! The transfer engine (fragmentation and reassembly) and the message codec are external and are
//! plugged in through the [`engine`] and [`codec`] traits. Bus drivers implement the
//! [`bus`] traits; an in-process [`virtual_bus`] is provided.
//!
//! ## Architecture
//!
//! ```text
//!  Producer ──publish/enqueue──┐
//!                              ▼
//!                  ┌──────────────────────┐
//!                  │        Bridge        │
//!                  │ ┌──────────────────┐ │
//!  TxRunner ◄─pop──┤ │ Mutex<           │ ├──accept──◄ RxRunner
//!      │           │ │  Arena,          │ │               ▲
//!      │           │ │  TxEngine,       │ │               │
//!      │           │ │  RxEngine>       │ │               │
//!      │           │ └──────────────────┘ │               │
//!      │           └──────────────────────┘               │
//!      ▼                                                  │
//!   BusTx ──────────────────── CAN ─────────────────── BusRx
//! ```
//! Components:
//! * _Bridge_ is the context of one bus connection. It owns the arena and both engine halves
//!   behind a single blocking mutex, the configuration, and the counters.
//! * _Arena_ is a bounded block allocator. It holds the payload of queued frames and of
//!   transfers under reassembly. Allocation failure is a recoverable error.
//! * _TxRunner_ periodically drains the frames whose deadline passed and writes them to the bus.
//! * _PublishRunner_ is a producer that publishes a message every period, e.g., a heartbeat.
//! * _RxRunner_ reads the bus, feeds the reassembler, decodes completed transfers, and calls
//!   the consumer.
//!
//! ## Concurrency model
//!
//! Producers, the transmit runner and the receive runner share the bridge by reference and may
//! run on separate threads. Every engine and arena access happens under the bridge mutex, which
//! is never held across bus I/O, message (de)serialization, or consumer calls. Use
//! `CriticalSectionRawMutex` for multi-threaded setups, or `NoopRawMutex` when everything runs on
//! one thread.
//!
//! Runners stop cooperatively through a [`CancellationToken`]. The transmit runner flushes the
//! queue before stopping. The receive runner notices cancellation within one read timeout.
//!
//! ## Errors
//!
//! No error aborts the process. Allocation failures, oversized and rejected frames, and decode
//! failures are logged, counted in [`BridgeStats`], and skipped. Transmission failures drop the
//! affected frame and are returned to the caller. A failing bus read ends the receive runner.
//!
//! ## Logging
//!
//! Logging goes through the `log` crate (feature `log`, default) or `defmt` (feature `defmt`).
//!
//! # References:
//!
//! * \[1\] Cyphal Specification v1.0
//!   <https://opencyphal.org/specification/Cyphal_Specification.pdf>

pub use canbridge_core as core;
pub use canbridge_driver::{bus, time, virtual_bus};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod arena;
mod bridge;
pub mod codec;
pub mod config;
pub mod egress;
pub mod engine;
pub mod frame;
pub mod ingress;
mod stats;
pub mod translate;

pub use bridge::{Bridge, CancellationToken};
pub use config::{Config, DeadlinePolicy};
pub use stats::{BridgeStats, StatsSnapshot};
