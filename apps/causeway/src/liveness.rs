use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::connection::ConnectionTable;
use crate::relay::Relay;

/// Periodic heartbeat sweep over every open transport.
///
/// Each sweep clears the transport's alive flag and sends a protocol-level
/// ping; the pong sets the flag again. A transport whose flag is still
/// clear at the next sweep missed a full period and is forcibly closed
/// through the same cleanup path as a graceful disconnect, so detection
/// latency is bounded at roughly twice the period.
pub struct LivenessMonitor {
    connections: Arc<ConnectionTable>,
    relay: Arc<Relay>,
    period: Duration,
}

impl LivenessMonitor {
    pub fn new(connections: Arc<ConnectionTable>, relay: Arc<Relay>, period: Duration) -> Self {
        Self {
            connections,
            relay,
            period,
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.period);
        // The first tick completes immediately; consume it so fresh
        // connections get a full period before their first probe.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.sweep_once();
        }
    }

    /// One sweep, split out so tests can drive it without a timer.
    pub fn sweep_once(&self) {
        for handle in self.connections.handles() {
            if handle.take_alive() {
                debug!(transport = %handle.transport_id(), "probing transport");
                handle.probe();
            } else {
                warn!(transport = %handle.transport_id(), "transport missed heartbeat, closing");
                self.connections.remove(handle.transport_id());
                self.relay.handle_disconnect(&handle);
                handle.force_close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{test_handle, OutboundFrame};
    use crate::registry::Registry;
    use crate::sessions::SessionTable;
    use causeway_signal::Envelope;

    fn monitor() -> (LivenessMonitor, Arc<ConnectionTable>, Arc<Registry>) {
        let connections = Arc::new(ConnectionTable::new());
        let registry = Arc::new(Registry::new());
        let sessions = Arc::new(SessionTable::new(registry.clone()));
        let relay = Arc::new(Relay::new(registry.clone(), sessions));
        (
            LivenessMonitor::new(connections.clone(), relay, Duration::from_millis(50)),
            connections,
            registry,
        )
    }

    #[test_watchdog::timeout]
    fn silent_transport_is_closed_on_the_second_sweep() {
        let (monitor, connections, registry) = monitor();
        let (handle, mut rx) = test_handle();
        connections.insert(handle.clone());
        registry.register("abc", handle.clone());

        // First sweep: flag cleared, probe sent, still considered live.
        monitor.sweep_once();
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Ping);
        assert_eq!(connections.len(), 1);

        // No pong arrives. Second sweep forces the close and runs the same
        // cleanup as a graceful disconnect.
        monitor.sweep_once();
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Close);
        assert!(connections.is_empty());
        assert!(registry.lookup("abc").is_none());
    }

    #[test_watchdog::timeout]
    fn ponging_transport_survives_repeated_sweeps() {
        let (monitor, connections, _registry) = monitor();
        let (handle, mut rx) = test_handle();
        connections.insert(handle.clone());

        for _ in 0..3 {
            monitor.sweep_once();
            assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Ping);
            handle.mark_alive();
        }
        assert_eq!(connections.len(), 1);
    }

    #[test_watchdog::timeout]
    fn forced_close_terminates_sessions_referencing_the_transport() {
        let connections = Arc::new(ConnectionTable::new());
        let registry = Arc::new(Registry::new());
        let sessions = Arc::new(SessionTable::new(registry.clone()));
        let relay = Arc::new(Relay::new(registry.clone(), sessions.clone()));
        let monitor =
            LivenessMonitor::new(connections.clone(), relay.clone(), Duration::from_millis(50));

        let (responder, _responder_rx) = test_handle();
        connections.insert(responder.clone());
        registry.register("abc", responder.clone());

        let (requester, mut requester_rx) = test_handle();
        connections.insert(requester.clone());
        requester.mark_alive();
        relay.handle_message(
            &requester,
            Envelope::CallRequest {
                target_id: "abc".to_string(),
                session_id: None,
                caller_name: None,
            },
        );
        let _ = requester_rx.try_recv(); // call:waiting

        // Responder never pongs across two sweeps; requester stays alive.
        monitor.sweep_once();
        requester.mark_alive();
        monitor.sweep_once();

        assert!(registry.lookup("abc").is_none());
        assert!(sessions.is_empty());
        let frames: Vec<_> = std::iter::from_fn(|| requester_rx.try_recv().ok()).collect();
        assert!(frames.iter().any(|frame| matches!(
            frame,
            OutboundFrame::Envelope(Envelope::CallTerminated { .. })
        )));
    }
}
