//! Heartbeat publisher on the in-process virtual bus.
//!
//! Node 96 publishes a heartbeat every second. A second endpoint on the same interface prints
//! the frames in candump format.

#[path = "../tests/common/mod.rs"]
mod common;

use std::thread;

use canbridge::bus::{Bus, BusRx};
use canbridge::core::{NodeId, Priority};
use canbridge::egress::Publisher;
use canbridge::frame::HardwareFrame;
use canbridge::time::{Duration, Instant};
use canbridge::virtual_bus::{self, VirtualCan};
use canbridge::{Bridge, CancellationToken, Config};
use common::{HEARTBEAT_SUBJECT, Heartbeat, HeartbeatCodec, MessageTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

const INTERFACE: &str = "vcan0";
const NODE_ID: NodeId = NodeId::new(96).unwrap();
const PERIOD: Duration = Duration::from_secs(1);
const RUN_TIME: std::time::Duration = std::time::Duration::from_secs(5);

fn main() {
    virtual_bus::add_interface(INTERFACE);
    let config = Config::default()
        .with_interface(INTERFACE)
        .with_node_id(NODE_ID);
    let bridge = Bridge::<CriticalSectionRawMutex, _, ()>::new(config, MessageTx::new(16), ())
        .unwrap();
    let (_, tx) = bridge.open_bus::<VirtualCan>().unwrap();
    let (mut monitor, _) = VirtualCan::open(INTERFACE).unwrap().split();

    let cancel = CancellationToken::new();
    let start = Instant::now();
    let publisher = Publisher::new(HeartbeatCodec, HEARTBEAT_SUBJECT, Priority::Nominal);
    let heartbeat = move |now: Instant| Heartbeat {
        uptime: u32::try_from((now - start).as_secs()).unwrap_or(u32::MAX),
        health: 0,
        mode: 0,
        vendor_specific_status_code: 0,
    };

    thread::scope(|s| {
        s.spawn(|| bridge.tx_runner(tx, cancel.clone()).run().unwrap());
        s.spawn(|| {
            bridge
                .publish_runner(publisher, heartbeat, PERIOD, cancel.clone())
                .run()
                .unwrap()
        });
        s.spawn(|| {
            while !cancel.is_cancelled() {
                if let Some(frame) = monitor.read(Duration::from_millis(100)).unwrap() {
                    println!("{}", candump(&frame));
                }
            }
        });

        thread::sleep(RUN_TIME);
        cancel.cancel();
    });

    let stats = bridge.stats().snapshot();
    println!("sent {} frames", stats.frames_sent);
}

fn candump(frame: &HardwareFrame) -> String {
    let length = frame.length().unwrap_or(0);
    let data: Vec<String> = frame.raw_data()[..length]
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect();
    format!(
        "  {INTERFACE}  {:08X}   [{:02}]  {}",
        frame.identifier(),
        length,
        data.join(" ")
    )
}
