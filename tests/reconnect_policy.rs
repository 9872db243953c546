use std::time::Duration;

use telemetry_ws::testing::{ConnectPlan, MockServer, MockTransport};
use telemetry_ws::{
    Channel, ClientConfig, ConnectionState, DisconnectReason, ErrorKind,
    ExponentialBackoffReconnect, FixedDelayReconnect, ReconnectStrategy, TelemetryClient,
    TelemetryError, TelemetryEvent,
};
use tokio::sync::mpsc;

type MockClient = TelemetryClient<MockTransport, FixedDelayReconnect>;

const DELAY: Duration = Duration::from_millis(3000);

fn mock_client(max_attempts: u32, default_plan: ConnectPlan) -> (MockClient, MockServer) {
    let config = ClientConfig::new("ws://mock")
        .with_reconnect_delay(DELAY)
        .with_max_reconnect_attempts(max_attempts);
    let (transport, server) = MockTransport::with_default(default_plan);
    let reconnect = FixedDelayReconnect::from_config(&config);
    let client = TelemetryClient::with_transport(config, transport, reconnect).expect("client");
    (client, server)
}

async fn record(client: &MockClient, channel: Channel) -> mpsc::UnboundedReceiver<TelemetryEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _subscription = client
        .subscribe(channel, move |event: &TelemetryEvent| {
            let _ = tx.send(event.clone());
            Ok(())
        })
        .await
        .expect("subscribe");
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TelemetryEvent>) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn states(events: &[TelemetryEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|event| match event {
            TelemetryEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

async fn wait_for_state<R: ReconnectStrategy>(
    client: &TelemetryClient<MockTransport, R>,
    want: ConnectionState,
) {
    for _ in 0..400 {
        if client.state().await.expect("state") == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {want}");
}

#[tokio::test(start_paused = true)]
async fn refused_connects_exhaust_after_max_attempts() {
    let (client, server) = mock_client(5, ConnectPlan::Refuse);
    let mut state_rx = record(&client, Channel::State).await;
    let mut error_rx = record(&client, Channel::Error).await;
    let mut disconnected_rx = record(&client, Channel::Disconnected).await;

    client.connect().await.expect("connect");
    wait_for_state(&client, ConnectionState::Failed).await;

    use ConnectionState::*;
    assert_eq!(
        states(&drain(&mut state_rx)),
        vec![
            Connecting, Reconnecting, Connecting, Reconnecting, Connecting, Reconnecting,
            Connecting, Reconnecting, Connecting, Failed,
        ]
    );
    assert_eq!(server.connect_attempts(), 5);

    let errors = drain(&mut error_rx);
    let kinds: Vec<ErrorKind> = errors
        .iter()
        .filter_map(|event| event.error().map(|err| err.kind()))
        .collect();
    assert_eq!(kinds.iter().filter(|k| **k == ErrorKind::Transport).count(), 5);
    assert_eq!(kinds.iter().filter(|k| **k == ErrorKind::Exhausted).count(), 1);
    assert_eq!(kinds.last(), Some(&ErrorKind::Exhausted));

    // A never-opened connection has nothing to report as disconnected.
    assert!(drain(&mut disconnected_rx).is_empty());

    // Failed is terminal: no further attempts without a fresh connect().
    tokio::time::sleep(DELAY * 4).await;
    assert_eq!(server.connect_attempts(), 5);
    assert!(drain(&mut error_rx).is_empty());

    client.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn reconnect_waits_at_least_the_configured_delay() {
    let (client, server) = mock_client(3, ConnectPlan::Refuse);

    client.connect().await.expect("connect");
    wait_for_state(&client, ConnectionState::Failed).await;

    let times = server.attempt_times();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(
            pair[1].duration_since(pair[0]) >= DELAY,
            "attempts {:?} apart",
            pair[1].duration_since(pair[0])
        );
    }

    let stats = client.stats().await.expect("stats");
    assert_eq!(stats.state, ConnectionState::Failed);
    assert_eq!(stats.connect_failures, 3);
    assert_eq!(stats.reconnects, 2);

    client.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_reconnecting_cancels_the_timer() {
    let (client, server) = mock_client(5, ConnectPlan::Refuse);
    let mut disconnected_rx = record(&client, Channel::Disconnected).await;

    client.connect().await.expect("connect");
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    let attempts = server.connect_attempts();

    client.disconnect().await.expect("disconnect");
    assert_eq!(client.state().await.expect("state"), ConnectionState::Disconnected);

    tokio::time::sleep(DELAY * 3).await;
    assert_eq!(server.connect_attempts(), attempts);
    assert_eq!(client.state().await.expect("state"), ConnectionState::Disconnected);

    let events = drain(&mut disconnected_rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        TelemetryEvent::Disconnected {
            reason: DisconnectReason::Requested
        }
    ));

    // Already disconnected: nothing more is emitted.
    client.disconnect().await.expect("disconnect again");
    assert!(drain(&mut disconnected_rx).is_empty());

    client.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn connect_is_idempotent_while_connecting_or_connected() {
    let (client, mut server) = mock_client(5, ConnectPlan::Accept);
    server.script([ConnectPlan::Hang]);

    client.connect().await.expect("connect");
    client.connect().await.expect("connect while connecting");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(server.connect_attempts(), 1);
    assert_eq!(client.state().await.expect("state"), ConnectionState::Connecting);

    client.disconnect().await.expect("disconnect");
    client.connect().await.expect("connect");
    let _connection = server
        .next_connection_timeout(Duration::from_secs(1))
        .await
        .expect("accepted");
    wait_for_state(&client, ConnectionState::Connected).await;

    client.connect().await.expect("connect while connected");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(server.connect_attempts(), 2);
    assert_eq!(client.state().await.expect("state"), ConnectionState::Connected);

    client.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn lost_connection_reports_disconnect_and_reconnects() {
    let (client, mut server) = mock_client(5, ConnectPlan::Accept);
    let mut connected_rx = record(&client, Channel::Connected).await;
    let mut disconnected_rx = record(&client, Channel::Disconnected).await;

    client.connect().await.expect("connect");
    let mut first = server
        .next_connection_timeout(Duration::from_secs(1))
        .await
        .expect("first connection");
    wait_for_state(&client, ConnectionState::Connected).await;

    first.drop_socket();
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    let events = drain(&mut disconnected_rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        TelemetryEvent::Disconnected { reason } => assert!(!reason.is_requested(), "{reason}"),
        other => panic!("unexpected event {other:?}"),
    }

    let _second = server
        .next_connection_timeout(DELAY * 2)
        .await
        .expect("second connection");
    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(drain(&mut connected_rx).len(), 2);

    let times = server.attempt_times();
    assert!(times[1].duration_since(times[0]) >= DELAY);

    let stats = client.stats().await.expect("stats");
    assert_eq!(stats.connects, 2);
    assert_eq!(stats.reconnects, 1);

    client.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn close_frame_and_read_errors_count_as_unexpected_closure() {
    let (client, mut server) = mock_client(5, ConnectPlan::Accept);
    let mut disconnected_rx = record(&client, Channel::Disconnected).await;

    client.connect().await.expect("connect");
    let first = server
        .next_connection_timeout(Duration::from_secs(1))
        .await
        .expect("first connection");
    wait_for_state(&client, ConnectionState::Connected).await;
    first.close(1001, "going away").expect("close");
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    let second = server
        .next_connection_timeout(DELAY * 2)
        .await
        .expect("second connection");
    wait_for_state(&client, ConnectionState::Connected).await;
    second.fail("connection reset by peer").expect("fail");
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    let reasons: Vec<DisconnectReason> = drain(&mut disconnected_rx)
        .into_iter()
        .filter_map(|event| match event {
            TelemetryEvent::Disconnected { reason } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons.len(), 2);
    assert!(matches!(
        &reasons[0],
        DisconnectReason::RemoteClosed { detail } if detail.contains("1001")
    ));
    assert!(matches!(
        &reasons[1],
        DisconnectReason::TransportFailure { error } if error.contains("reset")
    ));

    client.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn connect_after_failed_starts_a_fresh_budget() {
    let (client, mut server) = mock_client(2, ConnectPlan::Accept);
    server.script([ConnectPlan::Refuse, ConnectPlan::Refuse]);

    client.connect().await.expect("connect");
    wait_for_state(&client, ConnectionState::Failed).await;
    assert_eq!(server.connect_attempts(), 2);

    client.connect().await.expect("reconnect");
    let _connection = server
        .next_connection_timeout(Duration::from_secs(1))
        .await
        .expect("accepted");
    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(server.connect_attempts(), 3);

    client.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn counter_resets_after_a_successful_open() {
    let (client, mut server) = mock_client(2, ConnectPlan::Accept);
    server.script([ConnectPlan::Refuse]);

    client.connect().await.expect("connect");
    let mut connection = server
        .next_connection_timeout(DELAY * 2)
        .await
        .expect("second attempt accepted");
    wait_for_state(&client, ConnectionState::Connected).await;

    // Two more refusals after a loss: the budget of 2 applies again from zero.
    server.script([ConnectPlan::Refuse, ConnectPlan::Refuse]);
    connection.drop_socket();
    wait_for_state(&client, ConnectionState::Failed).await;
    assert_eq!(server.connect_attempts(), 4);

    client.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn config_limits_override_a_mismatched_strategy() {
    let delay = Duration::from_millis(100);
    let config = ClientConfig::new("ws://mock")
        .with_reconnect_delay(delay)
        .with_max_reconnect_attempts(2);
    let (transport, server) = MockTransport::refusing();
    // Defaults to 3000 ms and 5 attempts.
    let client =
        TelemetryClient::with_transport(config, transport, FixedDelayReconnect::default())
            .expect("client");
    let mut error_rx = record(&client, Channel::Error).await;

    client.connect().await.expect("connect");
    wait_for_state(&client, ConnectionState::Failed).await;

    let times = server.attempt_times();
    assert_eq!(times.len(), 2);
    let gap = times[1].duration_since(times[0]);
    assert!(gap >= delay && gap < DELAY, "attempts {gap:?} apart");

    let exhausted: Vec<TelemetryError> = drain(&mut error_rx)
        .iter()
        .filter_map(|event| event.error().cloned())
        .filter(|err| err.kind() == ErrorKind::Exhausted)
        .collect();
    assert_eq!(exhausted.len(), 1);
    assert!(matches!(
        exhausted[0],
        TelemetryError::ReconnectExhausted {
            attempts: 2,
            budget: 2
        }
    ));

    client.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn backoff_strategy_still_ends_in_failed() {
    let config = ClientConfig::new("ws://mock").with_max_reconnect_attempts(5);
    let (transport, server) = MockTransport::refusing();
    let backoff =
        ExponentialBackoffReconnect::new(Duration::from_millis(10), Duration::from_millis(10), 2.0);
    let client = TelemetryClient::with_transport(config, transport, backoff).expect("client");

    client.connect().await.expect("connect");
    wait_for_state(&client, ConnectionState::Failed).await;
    assert_eq!(server.connect_attempts(), 5);

    tokio::time::sleep(DELAY * 4).await;
    assert_eq!(server.connect_attempts(), 5);
    assert_eq!(client.state().await.expect("state"), ConnectionState::Failed);

    client.shutdown().await.expect("shutdown");
}
