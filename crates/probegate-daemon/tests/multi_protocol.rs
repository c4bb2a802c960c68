//! Port sharing and boundary enforcement: one listener serving the framed
//! TCP protocol and WebSocket upgrades side by side, closing everything
//! else, and dropping traffic outside the permission lists.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use probegate_core::address::{platform, probe};
use probegate_core::{encode_frame, Envelope, EventKind};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use common::{spawn_gateway, wait_for_counter, TcpProbe, WsProbe};

#[tokio::test]
async fn framed_and_websocket_probes_share_one_port() {
    let gateway = spawn_gateway().await;

    let _tcp_probe = TcpProbe::connect(gateway.addr, "framed-probe").await;
    let mut ws_probe = WsProbe::connect(gateway.addr).await;
    ws_probe.send(common::handshake("ws-probe")).await;

    wait_for_counter(&gateway.fleet_counter(), 2).await;

    let entries = gateway.active_probes().entries().await.unwrap();
    let mut ids: Vec<_> = entries.into_iter().map(|(id, _)| id).collect();
    ids.sort();
    assert_eq!(ids, vec!["framed-probe", "ws-probe"]);
}

#[tokio::test]
async fn unrecognized_traffic_is_closed() {
    let gateway = spawn_gateway().await;

    let mut conn = TcpStream::connect(gateway.addr).await.unwrap();
    // Neither a handshake frame nor an HTTP upgrade.
    let garbage = vec![0xAB_u8; 8192];
    let _ = conn.write_all(&garbage).await;
    let _ = conn.flush().await;

    let mut buffer = [0u8; 1];
    let read = conn.read(&mut buffer).await.unwrap_or(0);
    assert_eq!(read, 0, "unclaimed connections must be closed");
    assert_eq!(gateway.fleet_counter().get().await.unwrap(), 0);
}

#[tokio::test]
async fn inbound_publish_outside_the_permitted_list_is_dropped() {
    let gateway = spawn_gateway().await;
    let mut spy = gateway.bridge.bus().consumer("internal.platform.secrets");

    let mut conn = TcpProbe::connect(gateway.addr, "sneaky-probe").await;
    wait_for_counter(&gateway.fleet_counter(), 1).await;

    conn.send(Envelope::publish(
        "internal.platform.secrets",
        json!({"dump": true}),
    ))
    .await;
    // The connection stays usable after the rejected event.
    conn.send(Envelope::new(EventKind::Ping, "")).await;
    assert_eq!(conn.recv().await.kind, EventKind::Pong);

    tokio::select! {
        message = spy.recv() => panic!("denied publish leaked: {message:?}"),
        () = tokio::time::sleep(Duration::from_millis(100)) => {},
    }
}

#[tokio::test]
async fn outbound_delivery_outside_the_permitted_list_is_suppressed() {
    let gateway = spawn_gateway().await;

    let mut conn = WsProbe::connect(gateway.addr).await;
    conn.send(common::handshake("out-probe")).await;
    wait_for_counter(&gateway.fleet_counter(), 1).await;

    conn.send(Envelope::register(probe::LIVE_INSTRUMENT_REMOTE))
        .await;
    wait_for_counter(&gateway.remote_counter(probe::LIVE_INSTRUMENT_REMOTE), 1).await;

    // A message published on a permitted registration flows through; the
    // probe never sees anything for other addresses.
    gateway.bridge.bus().publish(
        probe::LIVE_INSTRUMENT_REMOTE,
        BTreeMap::new(),
        json!({"command": "add"}),
    );
    let delivery = conn.recv().await;
    assert_eq!(delivery.kind, EventKind::Message);
    assert_eq!(delivery.address, probe::LIVE_INSTRUMENT_REMOTE);
}

#[tokio::test]
async fn partial_handshake_frame_is_eventually_claimed() {
    let gateway = spawn_gateway().await;

    let frame = encode_frame(&common::handshake("slow-probe")).unwrap();
    let (head, tail) = frame.split_at(10);

    let mut conn = TcpStream::connect(gateway.addr).await.unwrap();
    conn.write_all(head).await.unwrap();
    conn.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    conn.write_all(tail).await.unwrap();
    conn.flush().await.unwrap();

    wait_for_counter(&gateway.fleet_counter(), 1).await;
}

#[tokio::test]
async fn websocket_upgrade_on_wrong_path_never_connects_a_probe() {
    let gateway = spawn_gateway().await;

    // The request line does not match the bridge path; the sniffers never
    // claim it and the listener closes the connection.
    let mut conn = TcpStream::connect(gateway.addr).await.unwrap();
    conn.write_all(b"GET /wrong/path HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\r\n")
        .await
        .unwrap();
    conn.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(gateway.fleet_counter().get().await.unwrap(), 0);
}

#[tokio::test]
async fn send_events_reach_exactly_one_consumer() {
    let gateway = spawn_gateway().await;
    let mut first = gateway
        .bridge
        .bus()
        .consumer(platform::PROBE_CONNECTED);

    let mut conn = TcpProbe::connect(gateway.addr, "send-probe").await;
    wait_for_counter(&gateway.fleet_counter(), 1).await;

    conn.send(Envelope::send(
        probegate_core::address::processor::LIVE_INSTRUMENT_APPLIED,
        json!({"instrumentId": "i-1"}),
    ))
    .await;

    // Still connected; the first consumer saw only the handshake publish.
    let message = first.recv().await.unwrap();
    assert_eq!(message.address, platform::PROBE_CONNECTED);
}
