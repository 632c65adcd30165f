//! Per-adapter connection session.
//!
//! A session owns the bus connection, one reconnect task per device
//! address, and a connected gate per address which read operations wait
//! on. In-flight operations subscribe to a per-address cancellation
//! channel, so the connection manager can abort them when a device drops
//! and the session can abort them all when it stops.

use dbus::Path;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::bus::Bus;
use crate::device::ConfigEntry;
use crate::macaddress::MacAddress;
use crate::serial::SerialState;
use crate::thingy52::Thingy52Config;
use crate::Error;

/// Why an in-flight operation was cancelled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CancelReason {
    SessionStopped,
    ConnectionLost,
}

/// Connection state of a single device address: the connected gate and the
/// cancellation channel of its in-flight operations.
pub(crate) struct ConnectionStatus {
    mac: MacAddress,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    cancel: broadcast::Sender<CancelReason>,
}

impl ConnectionStatus {
    pub(crate) fn new(mac: MacAddress) -> Self {
        let (connected_tx, connected_rx) = watch::channel(false);
        let (cancel, _) = broadcast::channel(16);
        Self {
            mac,
            connected_tx,
            connected_rx,
            cancel,
        }
    }

    pub(crate) fn set_connected(&self) {
        let _ = self.connected_tx.send(true);
    }

    pub(crate) fn set_disconnected(&self) {
        let _ = self.connected_tx.send(false);
    }

    pub(crate) fn cancel_io(&self, reason: CancelReason) {
        // no receivers means no operations in flight
        let _ = self.cancel.send(reason);
    }

    /// Wait until the device is connected, then run the operation. The
    /// returned future completes early with an error when the operation is
    /// cancelled by a disconnection or a session stop.
    pub(crate) async fn guard<T>(
        &self,
        io: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        let mac = self.mac;
        let mut cancel = self.cancel.subscribe();
        let mut connected = self.connected_rx.clone();
        tokio::select! {
            reason = cancel.recv() => Err(match reason {
                Ok(CancelReason::ConnectionLost)
                | Err(broadcast::error::RecvError::Lagged(_)) => Error::Disconnected(mac),
                Ok(CancelReason::SessionStopped)
                | Err(broadcast::error::RecvError::Closed) => Error::Stopped,
            }),
            result = async {
                while !*connected.borrow() {
                    connected.changed().await.map_err(|_| Error::Stopped)?;
                }
                io.await
            } => result,
        }
    }
}

struct SessionInner {
    bus: Bus,
    active_tx: watch::Sender<bool>,
    active_rx: watch::Receiver<bool>,
    connections: HashMap<MacAddress, ConnectionStatus>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    profiles: Vec<Path<'static>>,
    serial: Mutex<HashMap<MacAddress, SerialState>>,
    shared_configs: Mutex<HashMap<MacAddress, Thingy52Config>>,
}

/// A running connection session. Cheap to clone; all clones refer to the
/// same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Session")
    }
}

impl Session {
    pub(crate) fn new(
        bus: Bus,
        macs: impl IntoIterator<Item = MacAddress>,
        profiles: Vec<Path<'static>>,
    ) -> Self {
        let (active_tx, active_rx) = watch::channel(true);
        let connections = macs
            .into_iter()
            .map(|mac| (mac, ConnectionStatus::new(mac)))
            .collect();
        Self {
            inner: Arc::new(SessionInner {
                bus,
                active_tx,
                active_rx,
                connections,
                tasks: Mutex::new(Vec::new()),
                profiles,
                serial: Mutex::new(HashMap::new()),
                shared_configs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    pub fn is_active(&self) -> bool {
        *self.inner.active_rx.borrow()
    }

    /// Wait until all devices of the address are enabled and ready for I/O.
    pub async fn connected(&self, mac: MacAddress) -> Result<(), Error> {
        self.run_io(mac, async { Ok(()) }).await
    }

    /// Stop the session: all in-flight operations and reconnect tasks are
    /// cancelled.
    pub fn stop(&self) {
        if !self.is_active() {
            return;
        }
        let _ = self.inner.active_tx.send(false);
        for status in self.inner.connections.values() {
            status.set_disconnected();
            status.cancel_io(CancelReason::SessionStopped);
        }
        log::info!("session stopped");
    }

    /// Wait until the session stops. Use this to keep a program alive while
    /// the session does its work in the background.
    pub async fn closed(&self) {
        let mut active = self.inner.active_rx.clone();
        while *active.borrow() {
            if active.changed().await.is_err() {
                break;
            }
        }
    }

    /// Stop the session and release its bus resources: reconnect tasks are
    /// joined, devices disconnected, the agent and the service profiles
    /// unregistered. Failures on teardown are logged, not raised.
    pub async fn close(&self) {
        self.stop();
        let tasks: Vec<_> = self.inner.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    log::warn!("connection task failed: {}", err);
                }
            }
        }
        match self.inner.bus.unregister_agent().await {
            Ok(()) => log::info!("agent unregistered"),
            Err(err) => log::warn!("agent failed to unregister: {}", err),
        }
        match self.inner.bus.unregister_profiles(&self.inner.profiles).await {
            Ok(()) => log::info!("service profiles unregistered"),
            Err(err) => log::warn!("service profiles failed to unregister: {}", err),
        }
        log::info!("session is done");
    }

    pub(crate) fn add_task(&self, task: JoinHandle<()>) {
        self.inner.tasks.lock().unwrap().push(task);
    }

    pub(crate) fn set_connected(&self, mac: MacAddress) {
        if let Some(status) = self.inner.connections.get(&mac) {
            status.set_connected();
        }
    }

    pub(crate) fn set_disconnected(&self, mac: MacAddress) {
        if let Some(status) = self.inner.connections.get(&mac) {
            status.set_disconnected();
        }
    }

    /// Cancel the in-flight operations of all devices of the address.
    pub(crate) fn cancel_io(&self, mac: MacAddress, reason: CancelReason) {
        if let Some(status) = self.inner.connections.get(&mac) {
            status.cancel_io(reason);
        }
    }

    /// Run a device I/O operation under session management: wait for the
    /// connected gate first, and abort when the device disconnects or the
    /// session stops.
    pub(crate) async fn run_io<T>(
        &self,
        mac: MacAddress,
        io: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        if !self.is_active() {
            return Err(Error::NotRunning);
        }
        let status = self
            .inner
            .connections
            .get(&mac)
            .ok_or(Error::NotManaged(mac))?;
        status.guard(io).await
    }

    pub(crate) fn with_serial_state<R>(
        &self,
        mac: MacAddress,
        f: impl FnOnce(&mut SerialState) -> R,
    ) -> R {
        let mut serial = self.inner.serial.lock().unwrap();
        f(serial.entry(mac).or_default())
    }

    /// Fold a trigger period into the cached shared configuration of the
    /// device and return the encoded configuration blob.
    pub(crate) fn shared_config_bytes(
        &self,
        mac: MacAddress,
        entry: ConfigEntry,
        interval: Option<Duration>,
    ) -> [u8; 12] {
        let mut configs = self.inner.shared_configs.lock().unwrap();
        let config = configs.entry(mac).or_default();
        if let Some(interval) = interval {
            config.set(entry, interval);
        }
        config.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "00:11:22:33:44:55".parse().unwrap()
    }

    #[tokio::test]
    async fn guard_runs_when_connected() {
        let status = ConnectionStatus::new(mac());
        status.set_connected();
        let value = status.guard(async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn guard_waits_for_connected_gate() {
        let status = Arc::new(ConnectionStatus::new(mac()));
        let pending = {
            let status = status.clone();
            tokio::spawn(async move { status.guard(async { Ok(1) }).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());
        status.set_connected();
        assert_eq!(pending.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn guard_cancelled_on_connection_loss() {
        let status = Arc::new(ConnectionStatus::new(mac()));
        let pending = {
            let status = status.clone();
            tokio::spawn(async move {
                status
                    .guard(futures::future::pending::<Result<(), Error>>())
                    .await
            })
        };
        tokio::task::yield_now().await;
        status.set_connected();
        status.cancel_io(CancelReason::ConnectionLost);
        assert!(matches!(
            pending.await.unwrap(),
            Err(Error::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn guard_cancelled_on_session_stop() {
        let status = Arc::new(ConnectionStatus::new(mac()));
        let pending = {
            let status = status.clone();
            tokio::spawn(async move {
                status
                    .guard(futures::future::pending::<Result<(), Error>>())
                    .await
            })
        };
        tokio::task::yield_now().await;
        status.cancel_io(CancelReason::SessionStopped);
        assert!(matches!(pending.await.unwrap(), Err(Error::Stopped)));
    }

    #[tokio::test]
    async fn gate_clears_on_disconnect() {
        let status = Arc::new(ConnectionStatus::new(mac()));
        status.set_connected();
        status.guard(async { Ok(()) }).await.unwrap();
        status.set_disconnected();
        let pending = {
            let status = status.clone();
            tokio::spawn(async move { status.guard(async { Ok(()) }).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());
        status.set_connected();
        pending.await.unwrap().unwrap();
    }
}
