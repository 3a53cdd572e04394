//! In-process virtual CAN interfaces
//!
//! Behaves like a Linux `vcan` device: every endpoint opened on an interface receives the frames
//! written by the other endpoints of the same interface. An endpoint does not receive its own
//! frames. Interfaces must be added before they can be opened.
//!
//! Each endpoint buffers up to [`INBOX_CAPACITY`] unread frames. Frames arriving at a full inbox
//! are dropped and counted, see [`dropped_frames`].
//!
//! ```
//! use canbridge_driver::bus::{Bus, BusRx, BusTx};
//! use canbridge_driver::frame::HardwareFrame;
//! use canbridge_driver::time::Duration;
//! use canbridge_driver::virtual_bus::{self, VirtualCan};
//! use embedded_can::{Id, StandardId};
//!
//! virtual_bus::add_interface("vcan-doc");
//! let (_, mut tx) = VirtualCan::open("vcan-doc").unwrap().split();
//! let (mut rx, _) = VirtualCan::open("vcan-doc").unwrap().split();
//!
//! let frame = HardwareFrame::new(Id::Standard(StandardId::new(0x10).unwrap()), &[1, 2]).unwrap();
//! tx.write(&frame).unwrap();
//! assert_eq!(rx.read(Duration::from_millis(10)).unwrap(), Some(frame));
//! ```

use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};

use crate::bus::{Bus, BusError, BusRx, BusTx};
use crate::frame::HardwareFrame;
use crate::time::Duration;

/// Unread frames an endpoint holds before further frames are dropped
pub const INBOX_CAPACITY: usize = 256;

struct Member {
    id: u32,
    inbox: SyncSender<HardwareFrame>,
}

struct Interface {
    name: String,
    up: bool,
    next_member: u32,
    failing_writes: usize,
    dropped_frames: u64,
    members: Vec<Member>,
}

static INTERFACES: Mutex<CriticalSectionRawMutex, RefCell<Vec<Interface>>> =
    Mutex::new(RefCell::new(Vec::new()));

fn with_interface<T>(
    name: &str,
    f: impl FnOnce(&mut Interface) -> Result<T, BusError>,
) -> Result<T, BusError> {
    INTERFACES.lock(|cell| {
        let mut interfaces = cell.borrow_mut();
        let interface = interfaces
            .iter_mut()
            .find(|interface| interface.name == name)
            .ok_or(BusError::NoSuchInterface)?;
        f(interface)
    })
}

/// Adds an interface and brings it up. Bringing an existing interface back up keeps its members.
pub fn add_interface(name: &str) {
    INTERFACES.lock(|cell| {
        let mut interfaces = cell.borrow_mut();
        if let Some(interface) = interfaces.iter_mut().find(|interface| interface.name == name) {
            interface.up = true;
        } else {
            interfaces.push(Interface {
                name: name.to_string(),
                up: true,
                next_member: 0,
                failing_writes: 0,
                dropped_frames: 0,
                members: Vec::new(),
            });
        }
    });
    debug!("virtual interface {} is up", name);
}

/// Takes the interface down.
///
/// Blocked readers wake up with `BusError::Down`. Writers fail with the same error.
pub fn set_down(name: &str) -> Result<(), BusError> {
    with_interface(name, |interface| {
        interface.up = false;
        // Dropping the senders disconnects every reader
        interface.members.clear();
        Ok(())
    })?;
    debug!("virtual interface {} is down", name);
    Ok(())
}

/// Makes the next `count` writes on the interface fail with `BusError::Rejected`.
pub fn fail_next_writes(name: &str, count: usize) -> Result<(), BusError> {
    with_interface(name, |interface| {
        interface.failing_writes = count;
        Ok(())
    })
}

/// Number of frames dropped so far because a receiving endpoint had a full inbox
pub fn dropped_frames(name: &str) -> Result<u64, BusError> {
    with_interface(name, |interface| Ok(interface.dropped_frames))
}

/// Endpoint on a virtual interface
pub struct VirtualCan {
    rx: VirtualCanRx,
    tx: VirtualCanTx,
}

impl Bus for VirtualCan {
    type Rx = VirtualCanRx;
    type Tx = VirtualCanTx;

    fn open(interface: &str) -> Result<Self, BusError> {
        let (sender, receiver) = mpsc::sync_channel(INBOX_CAPACITY);
        let member = with_interface(interface, |iface| {
            if !iface.up {
                return Err(BusError::Down);
            }
            let id = iface.next_member;
            iface.next_member = iface.next_member.wrapping_add(1);
            iface.members.push(Member { id, inbox: sender });
            Ok(id)
        })?;

        Ok(Self {
            rx: VirtualCanRx {
                interface: interface.to_string(),
                member,
                inbox: receiver,
            },
            tx: VirtualCanTx {
                interface: interface.to_string(),
                member,
            },
        })
    }

    fn split(self) -> (VirtualCanRx, VirtualCanTx) {
        (self.rx, self.tx)
    }
}

pub struct VirtualCanRx {
    interface: String,
    member: u32,
    inbox: Receiver<HardwareFrame>,
}

impl BusRx for VirtualCanRx {
    fn read(&mut self, timeout: Duration) -> Result<Option<HardwareFrame>, BusError> {
        let timeout = std::time::Duration::from_micros(timeout.as_micros());
        match self.inbox.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Down),
        }
    }
}

impl Drop for VirtualCanRx {
    fn drop(&mut self) {
        let member = self.member;
        let _ = with_interface(&self.interface, |interface| {
            interface.members.retain(|m| m.id != member);
            Ok(())
        });
    }
}

pub struct VirtualCanTx {
    interface: String,
    member: u32,
}

impl BusTx for VirtualCanTx {
    fn write(&mut self, frame: &HardwareFrame) -> Result<(), BusError> {
        let member = self.member;
        with_interface(&self.interface, |interface| {
            if !interface.up {
                return Err(BusError::Down);
            }
            if interface.failing_writes > 0 {
                interface.failing_writes -= 1;
                return Err(BusError::Rejected);
            }
            let mut dropped = 0;
            for peer in interface.members.iter().filter(|m| m.id != member) {
                match peer.inbox.try_send(*frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => dropped += 1,
                    // Pruned on the receiver's own drop
                    Err(TrySendError::Disconnected(_)) => {}
                }
            }
            interface.dropped_frames += dropped;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::{ExtendedId, Id};

    fn frame(id: u32, payload: &[u8]) -> HardwareFrame {
        HardwareFrame::new(Id::Extended(ExtendedId::new(id).unwrap()), payload).unwrap()
    }

    #[test]
    fn test_open_unknown_interface() {
        assert!(matches!(
            VirtualCan::open("vcan-test-unknown"),
            Err(BusError::NoSuchInterface)
        ));
    }

    #[test]
    fn test_no_self_loop_back() {
        add_interface("vcan-test-loop");
        let (mut rx_a, mut tx_a) = VirtualCan::open("vcan-test-loop").unwrap().split();
        let (mut rx_b, _tx_b) = VirtualCan::open("vcan-test-loop").unwrap().split();

        tx_a.write(&frame(0x42, &[7])).unwrap();
        assert_eq!(
            rx_b.read(Duration::from_millis(50)).unwrap(),
            Some(frame(0x42, &[7]))
        );
        assert_eq!(rx_a.read(Duration::from_millis(1)).unwrap(), None);
    }

    #[test]
    fn test_full_inbox_drops_frames() {
        add_interface("vcan-test-full");
        let (mut rx, _) = VirtualCan::open("vcan-test-full").unwrap().split();
        let (_rx, mut tx) = VirtualCan::open("vcan-test-full").unwrap().split();

        for index in 0..INBOX_CAPACITY + 3 {
            tx.write(&frame(index as u32, &[])).unwrap();
        }
        assert_eq!(dropped_frames("vcan-test-full"), Ok(3));

        for index in 0..INBOX_CAPACITY {
            let received = rx.read(Duration::from_millis(10)).unwrap().unwrap();
            assert_eq!(received, frame(index as u32, &[]));
        }
        assert_eq!(rx.read(Duration::from_millis(1)).unwrap(), None);
    }

    #[test]
    fn test_write_fault_injection() {
        add_interface("vcan-test-fault");
        let (_rx, mut tx) = VirtualCan::open("vcan-test-fault").unwrap().split();
        fail_next_writes("vcan-test-fault", 1).unwrap();
        assert_eq!(tx.write(&frame(1, &[])), Err(BusError::Rejected));
        assert_eq!(tx.write(&frame(1, &[])), Ok(()));
    }

    #[test]
    fn test_interface_down_wakes_reader() {
        add_interface("vcan-test-down");
        let (mut rx, mut tx) = VirtualCan::open("vcan-test-down").unwrap().split();

        let reader = std::thread::spawn(move || rx.read(Duration::from_secs(5)));
        std::thread::sleep(std::time::Duration::from_millis(20));
        set_down("vcan-test-down").unwrap();

        assert_eq!(reader.join().unwrap(), Err(BusError::Down));
        assert_eq!(tx.write(&frame(1, &[])), Err(BusError::Down));
        assert!(matches!(
            VirtualCan::open("vcan-test-down"),
            Err(BusError::Down)
        ));
    }
}
