//! Subscription hub: typed fan-out of client lifecycle events.
//!
//! The hub is owned by the connection actor, so registration, publish and the late-join
//! snapshot slot are all mutated from a single context and need no locking. Listener failures
//! (an `Err` return or a panic) are isolated per listener and reported on the `Error` channel.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::core::{ConnectionState, DisconnectReason, TelemetryError};
use crate::telemetry::TelemetrySnapshot;

pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type ListenerResult = Result<(), ListenerError>;

/// A registered event handler.
pub type Listener = Box<dyn FnMut(&TelemetryEvent) -> ListenerResult + Send + 'static>;

static NEXT_HUB_ID: AtomicU64 = AtomicU64::new(1);

/// Named event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Connected,
    Disconnected,
    Snapshot,
    Error,
    /// Every `ConnectionState` transition.
    State,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Connected => "connected",
            Channel::Disconnected => "disconnected",
            Channel::Snapshot => "snapshot",
            Channel::Error => "error",
            Channel::State => "state",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to listeners.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    Connected {
        generation: u64,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    Snapshot(Arc<TelemetrySnapshot>),
    Error(TelemetryError),
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl TelemetryEvent {
    pub fn channel(&self) -> Channel {
        match self {
            TelemetryEvent::Connected { .. } => Channel::Connected,
            TelemetryEvent::Disconnected { .. } => Channel::Disconnected,
            TelemetryEvent::Snapshot(_) => Channel::Snapshot,
            TelemetryEvent::Error(_) => Channel::Error,
            TelemetryEvent::StateChanged { .. } => Channel::State,
        }
    }

    pub fn snapshot(&self) -> Option<&Arc<TelemetrySnapshot>> {
        match self {
            TelemetryEvent::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TelemetryError> {
        match self {
            TelemetryEvent::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Handle for one registration. Only useful for `unsubscribe`.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a dropped Subscription can no longer be unsubscribed"]
pub struct Subscription {
    hub: u64,
    id: u64,
    channel: Channel,
}

impl Subscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Copy of the handle for forwarding to the hub's owner.
    pub(crate) fn duplicate(&self) -> Subscription {
        Subscription {
            hub: self.hub,
            id: self.id,
            channel: self.channel,
        }
    }
}

struct Registration {
    id: u64,
    channel: Channel,
    listener: Listener,
}

pub struct SubscriptionHub {
    hub_id: u64,
    next_id: u64,
    registrations: Vec<Registration>,
    latest_snapshot: Option<Arc<TelemetrySnapshot>>,
    listener_failures: u64,
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHub")
            .field("hub_id", &self.hub_id)
            .field("registrations", &self.registrations.len())
            .field("has_snapshot", &self.latest_snapshot.is_some())
            .field("listener_failures", &self.listener_failures)
            .finish()
    }
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self {
            hub_id: NEXT_HUB_ID.fetch_add(1, Ordering::Relaxed),
            next_id: 1,
            registrations: Vec::new(),
            latest_snapshot: None,
            listener_failures: 0,
        }
    }

    /// Register `listener` on `channel`.
    ///
    /// A new `Snapshot` listener immediately receives the most recent snapshot, if any.
    pub fn subscribe<F>(&mut self, channel: Channel, listener: F) -> Subscription
    where
        F: FnMut(&TelemetryEvent) -> ListenerResult + Send + 'static,
    {
        self.subscribe_boxed(channel, Box::new(listener))
    }

    pub fn subscribe_boxed(&mut self, channel: Channel, listener: Listener) -> Subscription {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.registrations.push(Registration {
            id,
            channel,
            listener,
        });

        if channel == Channel::Snapshot {
            if let Some(snapshot) = self.latest_snapshot.clone() {
                let event = TelemetryEvent::Snapshot(snapshot);
                let failure = self
                    .registrations
                    .last_mut()
                    .and_then(|registration| invoke(&mut registration.listener, &event).err());
                if let Some(message) = failure {
                    self.report_failures(
                        channel,
                        vec![TelemetryError::ListenerFailed {
                            channel: channel.as_str(),
                            message,
                        }],
                    );
                }
            }
        }

        Subscription {
            hub: self.hub_id,
            id,
            channel,
        }
    }

    /// Remove exactly one registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> bool {
        if subscription.hub != self.hub_id {
            return false;
        }
        match self
            .registrations
            .iter()
            .position(|registration| registration.id == subscription.id)
        {
            Some(index) => {
                self.registrations.remove(index);
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every listener on its channel, in registration order.
    ///
    /// Returns the number of listeners that handled the event successfully.
    pub fn publish(&mut self, event: TelemetryEvent) -> usize {
        if let TelemetryEvent::Snapshot(snapshot) = &event {
            self.latest_snapshot = Some(Arc::clone(snapshot));
        }

        let channel = event.channel();
        let (delivered, failures) = self.deliver(channel, &event);
        self.report_failures(channel, failures);
        delivered
    }

    pub fn latest_snapshot(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.latest_snapshot.clone()
    }

    pub fn listener_failures(&self) -> u64 {
        self.listener_failures
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.registrations
            .iter()
            .filter(|registration| registration.channel == channel)
            .count()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Drop every registration and the cached snapshot.
    pub fn clear(&mut self) {
        self.registrations.clear();
        self.latest_snapshot = None;
    }

    fn deliver(&mut self, channel: Channel, event: &TelemetryEvent) -> (usize, Vec<TelemetryError>) {
        let mut delivered = 0;
        let mut failures = Vec::new();
        for registration in self
            .registrations
            .iter_mut()
            .filter(|registration| registration.channel == channel)
        {
            match invoke(&mut registration.listener, event) {
                Ok(()) => delivered += 1,
                Err(message) => failures.push(TelemetryError::ListenerFailed {
                    channel: channel.as_str(),
                    message,
                }),
            }
        }
        (delivered, failures)
    }

    fn report_failures(&mut self, channel: Channel, failures: Vec<TelemetryError>) {
        for failure in failures {
            self.listener_failures = self.listener_failures.saturating_add(1);
            warn!(channel = %channel, error = %failure, "telemetry listener failed");

            // Failures of error listeners are logged only, never re-published.
            if channel == Channel::Error {
                continue;
            }
            let event = TelemetryEvent::Error(failure);
            let (_, nested) = self.deliver(Channel::Error, &event);
            for nested_failure in nested {
                self.listener_failures = self.listener_failures.saturating_add(1);
                warn!(
                    channel = %Channel::Error,
                    error = %nested_failure,
                    "error listener failed while reporting a listener failure"
                );
            }
        }
    }
}

fn invoke(listener: &mut Listener, event: &TelemetryEvent) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn snapshot_with_kpi(name: &str, value: f64) -> Arc<TelemetrySnapshot> {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.kpis.insert(name.to_string(), value);
        Arc::new(snapshot)
    }

    fn recorder() -> (
        Arc<Mutex<Vec<String>>>,
        impl Fn(&'static str) -> Box<dyn FnMut(&TelemetryEvent) -> ListenerResult + Send>,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |name: &'static str| {
                let log = Arc::clone(&log);
                Box::new(move |event: &TelemetryEvent| {
                    log.lock()
                        .unwrap()
                        .push(format!("{name}:{}", event.channel()));
                    Ok(())
                }) as Box<dyn FnMut(&TelemetryEvent) -> ListenerResult + Send>
            }
        };
        (log, make)
    }

    #[test]
    fn publish_runs_listeners_in_registration_order() {
        let mut hub = SubscriptionHub::new();
        let (log, make) = recorder();
        let _a = hub.subscribe(Channel::Connected, make("a"));
        let _b = hub.subscribe(Channel::Disconnected, make("b"));
        let _c = hub.subscribe(Channel::Connected, make("c"));

        let delivered = hub.publish(TelemetryEvent::Connected { generation: 1 });
        assert_eq!(delivered, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:connected".to_string(), "c:connected".to_string()]
        );
    }

    #[test]
    fn same_listener_twice_is_two_registrations() {
        let mut hub = SubscriptionHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = {
            let calls = Arc::clone(&calls);
            move |_: &TelemetryEvent| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };
        let first = hub.subscribe(Channel::Connected, listener.clone());
        let _second = hub.subscribe(Channel::Connected, listener);
        assert_ne!(first, _second);

        hub.publish(TelemetryEvent::Connected { generation: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(hub.unsubscribe(&first));
        hub.publish(TelemetryEvent::Connected { generation: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribe_twice_is_a_noop() {
        let mut hub = SubscriptionHub::new();
        let (log, make) = recorder();
        let sub = hub.subscribe(Channel::Error, make("a"));
        assert!(hub.unsubscribe(&sub));
        assert!(!hub.unsubscribe(&sub));
        assert!(hub.is_empty());

        hub.publish(TelemetryEvent::Error(TelemetryError::NotConnected));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn subscriptions_are_bound_to_their_hub() {
        let mut first = SubscriptionHub::new();
        let mut second = SubscriptionHub::new();
        let (_log, make) = recorder();
        let sub = first.subscribe(Channel::State, make("a"));
        let _other = second.subscribe(Channel::State, make("b"));

        assert!(!second.unsubscribe(&sub));
        assert_eq!(second.len(), 1);
        assert!(first.unsubscribe(&sub));
    }

    #[test]
    fn late_snapshot_subscriber_gets_latest_only() {
        let mut hub = SubscriptionHub::new();
        hub.publish(TelemetryEvent::Snapshot(snapshot_with_kpi("total_throughput", 1.0)));
        hub.publish(TelemetryEvent::Snapshot(snapshot_with_kpi("total_throughput", 850.0)));
        hub.publish(TelemetryEvent::Connected { generation: 3 });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = hub.subscribe(Channel::Snapshot, {
            let seen = Arc::clone(&seen);
            move |event: &TelemetryEvent| {
                if let Some(snapshot) = event.snapshot() {
                    seen.lock().unwrap().push(snapshot.kpi("total_throughput"));
                }
                Ok(())
            }
        });
        assert_eq!(*seen.lock().unwrap(), vec![Some(850.0)]);

        // Other channels get no replay.
        let (log, make) = recorder();
        let _conn = hub.subscribe(Channel::Connected, make("late"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_listener_does_not_block_others_and_is_reported() {
        let mut hub = SubscriptionHub::new();
        let (log, make) = recorder();
        let errors = Arc::new(Mutex::new(Vec::new()));

        let _bad = hub.subscribe(Channel::Snapshot, |_: &TelemetryEvent| {
            Err::<(), ListenerError>("render failed".into())
        });
        let _panicky = hub.subscribe(Channel::Snapshot, |_: &TelemetryEvent| -> ListenerResult {
            panic!("listener exploded")
        });
        let _good = hub.subscribe(Channel::Snapshot, make("good"));
        let _errors = hub.subscribe(Channel::Error, {
            let errors = Arc::clone(&errors);
            move |event: &TelemetryEvent| {
                if let Some(err) = event.error() {
                    errors.lock().unwrap().push(err.to_string());
                }
                Ok(())
            }
        });

        let delivered = hub.publish(TelemetryEvent::Snapshot(snapshot_with_kpi("x", 1.0)));
        assert_eq!(delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["good:snapshot".to_string()]);
        assert_eq!(hub.listener_failures(), 2);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("render failed"), "{errors:?}");
        assert!(errors[1].contains("listener exploded"), "{errors:?}");
    }

    #[test]
    fn failing_error_listener_is_not_republished() {
        let mut hub = SubscriptionHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let _bad = hub.subscribe(Channel::Error, {
            let calls = Arc::clone(&calls);
            move |_: &TelemetryEvent| -> ListenerResult {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope".into())
            }
        });

        hub.publish(TelemetryEvent::Error(TelemetryError::NotConnected));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hub.listener_failures(), 1);
    }

    #[test]
    fn clear_drops_registrations_and_cache() {
        let mut hub = SubscriptionHub::new();
        let (_log, make) = recorder();
        let _a = hub.subscribe(Channel::Snapshot, make("a"));
        hub.publish(TelemetryEvent::Snapshot(snapshot_with_kpi("x", 2.0)));
        assert!(hub.latest_snapshot().is_some());
        assert_eq!(hub.subscriber_count(Channel::Snapshot), 1);

        hub.clear();
        assert!(hub.is_empty());
        assert!(hub.latest_snapshot().is_none());
    }
}
