//! Heartbeat subscriber on the in-process virtual bus.
//!
//! Node 97 subscribes to heartbeats and prints them. Node 96 publishes one every second from
//! the same process.

#[path = "../tests/common/mod.rs"]
mod common;

use std::thread;

use canbridge::core::{NodeId, Priority};
use canbridge::egress::Publisher;
use canbridge::frame::TransferMeta;
use canbridge::time::{Duration, Instant};
use canbridge::virtual_bus::{self, VirtualCan};
use canbridge::{Bridge, CancellationToken, Config};
use common::{HEARTBEAT_SUBJECT, Heartbeat, HeartbeatCodec, MessageRx, MessageTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

const INTERFACE: &str = "vcan0";
const PUBLISHER_ID: NodeId = NodeId::new(96).unwrap();
const SUBSCRIBER_ID: NodeId = NodeId::new(97).unwrap();
const PERIOD: Duration = Duration::from_secs(1);
const RUN_TIME: std::time::Duration = std::time::Duration::from_secs(5);

fn main() {
    virtual_bus::add_interface(INTERFACE);

    let config = Config::default()
        .with_interface(INTERFACE)
        .with_node_id(SUBSCRIBER_ID);
    let subscriber = Bridge::<CriticalSectionRawMutex, (), _>::new(
        config,
        (),
        MessageRx::new(&[HEARTBEAT_SUBJECT]),
    )
    .unwrap();
    let (rx, _) = subscriber.open_bus::<VirtualCan>().unwrap();

    let config = Config::default()
        .with_interface(INTERFACE)
        .with_node_id(PUBLISHER_ID);
    let publisher = Bridge::<CriticalSectionRawMutex, _, ()>::new(config, MessageTx::new(16), ())
        .unwrap();
    let (_, tx) = publisher.open_bus::<VirtualCan>().unwrap();

    let cancel = CancellationToken::new();
    let start = Instant::now();
    let heartbeat = move |now: Instant| Heartbeat {
        uptime: u32::try_from((now - start).as_secs()).unwrap_or(u32::MAX),
        health: 0,
        mode: 0,
        vendor_specific_status_code: 0,
    };
    let print = |meta: TransferMeta, message: Heartbeat| {
        let source = meta.source.map_or(-1, |id| i32::from(id.into_u8()));
        println!(
            "heartbeat from node {source}: uptime {} s, health {}, mode {}, transfer {}",
            message.uptime,
            message.health,
            message.mode,
            meta.transfer_id.into_u8()
        );
    };

    thread::scope(|s| {
        s.spawn(|| {
            subscriber
                .rx_runner(rx, HeartbeatCodec, print, cancel.clone())
                .run()
                .unwrap()
        });
        s.spawn(|| publisher.tx_runner(tx, cancel.clone()).run().unwrap());
        s.spawn(|| {
            let sender = Publisher::new(HeartbeatCodec, HEARTBEAT_SUBJECT, Priority::Nominal);
            publisher
                .publish_runner(sender, heartbeat, PERIOD, cancel.clone())
                .run()
                .unwrap()
        });

        thread::sleep(RUN_TIME);
        cancel.cancel();
    });

    let stats = subscriber.stats().snapshot();
    println!(
        "received {} transfers, {} decode errors",
        stats.transfers_completed, stats.decode_errors
    );
}
