//! Bridges platform connectivity signals into the dispatcher.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::application::DispatcherHandle;
use crate::domain::network::NetworkCapabilities;

/// Forwards connectivity and airplane mode changes to a dispatcher.
///
/// The current value of each source is forwarded on start. Forwarding stops
/// when both sources are closed or the dispatcher stops.
#[derive(Debug)]
pub struct NetworkMonitor {
    network: watch::Receiver<Option<NetworkCapabilities>>,
    airplane_mode: watch::Receiver<bool>,
}

impl NetworkMonitor {
    /// Creates a monitor over the given sources.
    #[must_use]
    pub const fn new(
        network: watch::Receiver<Option<NetworkCapabilities>>,
        airplane_mode: watch::Receiver<bool>,
    ) -> Self {
        Self {
            network,
            airplane_mode,
        }
    }

    /// Starts forwarding on a new task.
    pub fn spawn(self, dispatcher: DispatcherHandle) -> JoinHandle<()> {
        tokio::spawn(self.run(dispatcher))
    }

    /// Forwards changes until the sources close or the dispatcher stops.
    pub async fn run(mut self, dispatcher: DispatcherHandle) {
        dispatcher.dispatch_network_state_change(*self.network.borrow_and_update());
        dispatcher.dispatch_airplane_mode_change(*self.airplane_mode.borrow_and_update());

        let mut network_open = true;
        let mut airplane_open = true;
        while (network_open || airplane_open) && !dispatcher.is_shut_down() {
            tokio::select! {
                () = dispatcher.closed() => break,
                changed = self.network.changed(), if network_open => {
                    if changed.is_ok() {
                        let capabilities = *self.network.borrow_and_update();
                        debug!(?capabilities, "network changed");
                        dispatcher.dispatch_network_state_change(capabilities);
                    } else {
                        network_open = false;
                    }
                }
                changed = self.airplane_mode.changed(), if airplane_open => {
                    if changed.is_ok() {
                        let airplane_mode = *self.airplane_mode.borrow_and_update();
                        debug!(airplane_mode, "airplane mode changed");
                        dispatcher.dispatch_airplane_mode_change(airplane_mode);
                    } else {
                        airplane_open = false;
                    }
                }
            }
        }
        debug!("network monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::services::dispatcher::DispatcherMessage;
    use crate::domain::network::Transport;

    fn sources() -> (
        watch::Sender<Option<NetworkCapabilities>>,
        watch::Sender<bool>,
        NetworkMonitor,
    ) {
        let (network_tx, network_rx) = watch::channel(None);
        let (airplane_tx, airplane_rx) = watch::channel(false);
        (network_tx, airplane_tx, NetworkMonitor::new(network_rx, airplane_rx))
    }

    #[tokio::test]
    async fn test_forwards_initial_state_and_changes() {
        let (network_tx, airplane_tx, monitor) = sources();
        let (handle, mut rx) = DispatcherHandle::channel();
        let task = monitor.spawn(handle);

        assert!(matches!(rx.recv().await, Some(DispatcherMessage::NetworkChanged(None))));
        assert!(matches!(
            rx.recv().await,
            Some(DispatcherMessage::AirplaneModeChanged(false))
        ));

        let wifi = NetworkCapabilities::connected(Transport::WIFI);
        network_tx.send(Some(wifi)).unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(DispatcherMessage::NetworkChanged(Some(caps))) if caps == wifi
        ));

        airplane_tx.send(true).unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(DispatcherMessage::AirplaneModeChanged(true))
        ));

        drop(network_tx);
        drop(airplane_tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_dispatcher_closes() {
        let (_network_tx, _airplane_tx, monitor) = sources();
        let (handle, rx) = DispatcherHandle::channel();
        let task = monitor.spawn(handle);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stops_after_shutdown() {
        let (network_tx, _airplane_tx, monitor) = sources();
        let (handle, mut rx) = DispatcherHandle::channel();
        let task = monitor.spawn(handle.clone());
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        handle.shutdown();
        network_tx
            .send(Some(NetworkCapabilities::connected(Transport::CELLULAR)))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(rx.recv().await, Some(DispatcherMessage::Shutdown)));
    }
}
