//! canbridge driver interface
//!
//! The crate provides the interface between a CAN bus driver and the canbridge stack:
//! * `frame` holds the hardware frame representation and the data length code tables
//! * `bus` defines the transport a driver implements
//! * `virtual_bus` is an in-process `vcan`-like driver (requires `std`)
//!
//! Limited scope facilitates compatibility across versions. Driver crates should depend on this
//! crate. Bridge users should depend on the `canbridge` crate instead.
//!
//! A driver splits a bus connection into a receiving and a transmitting half. The receiving half
//! blocks with a timeout, so that a reader thread can notice cancellation without the driver
//! having to support asynchronous close. Writes should not block longer than a single frame
//! submission.
#![cfg_attr(not(feature = "std"), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod bus;
pub mod frame;
#[cfg(feature = "std")]
pub mod virtual_bus;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}
