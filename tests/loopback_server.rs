use std::time::Duration;

use serde::Serialize;
use telemetry_ws::core::WsFrame;
use telemetry_ws::peer::accept_feed;
use telemetry_ws::{Channel, ClientConfig, ConnectionState, TelemetryClient, TelemetryEvent};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

#[derive(Serialize)]
struct Ack {
    action: &'static str,
    seq: u32,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_reads_frames_and_writes_commands_over_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (command_tx, command_rx) = oneshot::channel::<WsFrame>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut peer = accept_feed(stream).await.expect("handshake");
        peer.send_json(r#"{"mine_id":"PIT-7","kpis":{"total_throughput":850}}"#)
            .await
            .expect("send frame");
        if let Some(Ok(frame)) = peer.next().await {
            let _ = command_tx.send(frame);
        }
        peer.close(1000, "done").await.expect("close");
    });

    let config = ClientConfig::new(format!("ws://{addr}"))
        .with_reconnect_delay(Duration::from_millis(50))
        .with_max_reconnect_attempts(1);
    let client = TelemetryClient::new(config).expect("client");

    let (tx, mut snapshots) = mpsc::unbounded_channel();
    let _snapshots = client
        .subscribe(Channel::Snapshot, move |event: &TelemetryEvent| {
            let _ = tx.send(event.clone());
            Ok(())
        })
        .await
        .expect("subscribe");
    let (tx, mut disconnects) = mpsc::unbounded_channel();
    let _disconnects = client
        .subscribe(Channel::Disconnected, move |event: &TelemetryEvent| {
            let _ = tx.send(event.clone());
            Ok(())
        })
        .await
        .expect("subscribe");

    client.connect().await.expect("connect");

    let event = tokio::time::timeout(Duration::from_secs(5), snapshots.recv())
        .await
        .expect("snapshot in time")
        .expect("channel open");
    let snapshot = event.snapshot().expect("snapshot event");
    assert_eq!(snapshot.mine_id.as_deref(), Some("PIT-7"));
    assert_eq!(snapshot.kpi("total_throughput"), Some(850.0));
    assert_eq!(client.state().await.expect("state"), ConnectionState::Connected);

    client
        .send(&Ack {
            action: "ack",
            seq: 1,
        })
        .await
        .expect("send");
    let command = tokio::time::timeout(Duration::from_secs(5), command_rx)
        .await
        .expect("command in time")
        .expect("server saw command");
    assert_eq!(command, WsFrame::text(r#"{"action":"ack","seq":1}"#));

    // Server closes; with a budget of one attempt the client ends up Failed.
    let event = tokio::time::timeout(Duration::from_secs(5), disconnects.recv())
        .await
        .expect("disconnect in time")
        .expect("channel open");
    assert!(matches!(event, TelemetryEvent::Disconnected { .. }));

    server.await.expect("server task");
    client.shutdown().await.expect("shutdown");
}
