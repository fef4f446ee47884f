// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The host-facing facade: lifecycle, membership, subscriptions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::StickConfig;
use crate::connection::{open_serial, Connection};
use crate::controller::{Controller, Priority, SendHandle};
use crate::error::{RequestError, StickError};
use crate::events::{EventHub, StickEvent};
use crate::link::ByteLink;
use crate::nodes::NodeOps;
use crate::protocol::{Mac, Request, Response};
use crate::registry::Registry;
use crate::router::Router;
use crate::state::{JoinPolicy, NetworkState};
use crate::supervisor::{
    spawn_updater, spawn_watchdog, Supervised, UpdaterCtx, WatchdogCtx, WorkerHandle,
};

/// Everything that exists only while connected.
pub(crate) struct Runtime {
    pub cancel: CancellationToken,
    pub conn: Arc<Connection>,
    pub controller: Arc<Controller>,
    pub registry: Arc<Registry>,
    pub network: Arc<NetworkState>,
    pub sender: SendHandle,
    pub workers: Arc<Vec<Supervised>>,
    pub config: StickConfig,
    pub auto_update_secs: Arc<AtomicU64>,
    watchdog_started: AtomicBool,
    watchdog: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Controller for a Plugwise USB stick.
///
/// Construct, [`connect`](Self::connect), then
/// [`initialize_stick`](Self::initialize_stick) and
/// [`scan`](Self::scan). Mesh happenings arrive through
/// [`subscribe`](Self::subscribe).
pub struct Stick {
    port: String,
    config: StickConfig,
    events: Arc<EventHub>,
    runtime: StdMutex<Option<Arc<Runtime>>>,
}

impl Stick {
    pub fn new(port: impl Into<String>) -> Self {
        Self::with_config(port, StickConfig::default())
    }

    pub fn with_config(port: impl Into<String>, config: StickConfig) -> Self {
        Self {
            port: port.into(),
            config,
            events: Arc::new(EventHub::new()),
            runtime: StdMutex::new(None),
        }
    }

    pub(crate) fn runtime(&self) -> Result<Arc<Runtime>, StickError> {
        self.runtime
            .lock()
            .ok()
            .and_then(|r| r.clone())
            .ok_or(StickError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.runtime().map(|rt| rt.conn.is_connected()).unwrap_or(false)
    }

    /// Open the serial port and start the connection, controller, and
    /// dispatch workers. Idempotent.
    pub async fn connect(&self) -> Result<(), StickError> {
        if self.runtime().is_ok() {
            return Ok(());
        }
        let link = open_serial(&self.port, &self.config)?;
        self.attach(link)
    }

    /// Like [`connect`](Self::connect), over a caller-supplied link.
    /// This is how simulators and tests drive the full stack without a
    /// physical stick.
    pub async fn connect_with_link(&self, link: Box<dyn ByteLink>) -> Result<(), StickError> {
        if self.runtime().is_ok() {
            return Ok(());
        }
        self.attach(link)
    }

    fn attach(&self, link: Box<dyn ByteLink>) -> Result<(), StickError> {
        let Ok(mut slot) = self.runtime.lock() else { return Err(StickError::NotConnected) };
        if slot.is_some() {
            return Ok(());
        }

        let config = self.config.clone();
        let cancel = CancellationToken::new();
        let (conn, inbound_rx) = Connection::new(link, config.clone(), cancel.clone());
        let conn = Arc::new(conn);
        let controller = Controller::new(Arc::clone(&conn), config.clone(), cancel.clone());
        let sender = controller.handle();
        let registry = Registry::new(Arc::clone(&self.events));
        let network = Arc::new(NetworkState::default());
        network.set_join_policy(JoinPolicy {
            enabled: config.accept_join_requests,
            auto_accept: config.accept_join_requests,
        });

        let (exhausted_tx, exhausted_rx) = mpsc::unbounded_channel();
        let router = Router::new(
            inbound_rx,
            exhausted_rx,
            Arc::clone(&controller),
            Arc::clone(&registry),
            Arc::clone(&network),
            Arc::clone(&self.events),
            sender.clone(),
            cancel.clone(),
        );

        let auto_update_secs = Arc::new(AtomicU64::new(0));
        let mut workers = Vec::new();
        {
            let conn = Arc::clone(&conn);
            workers.push(Supervised::start("connection-reader", move || {
                WorkerHandle::Thread(conn.spawn_reader())
            }));
        }
        {
            let conn = Arc::clone(&conn);
            workers.push(Supervised::start("connection-writer", move || {
                WorkerHandle::Task(Arc::clone(&conn).spawn_writer())
            }));
        }
        {
            let controller = Arc::clone(&controller);
            workers.push(Supervised::start("send-worker", move || {
                WorkerHandle::Task(Arc::clone(&controller).spawn_send_worker())
            }));
        }
        {
            let controller = Arc::clone(&controller);
            workers.push(Supervised::start("receive-timeout", move || {
                WorkerHandle::Task(Arc::clone(&controller).spawn_timeout_scanner(exhausted_tx.clone()))
            }));
        }
        {
            let router = Arc::clone(&router);
            workers.push(Supervised::start("router", move || {
                WorkerHandle::Task(Arc::clone(&router).spawn())
            }));
        }
        {
            let registry = Arc::clone(&registry);
            let sender = sender.clone();
            let cancel = cancel.clone();
            let interval_secs = Arc::clone(&auto_update_secs);
            workers.push(Supervised::start("updater", move || {
                WorkerHandle::Task(spawn_updater(UpdaterCtx {
                    registry: Arc::clone(&registry),
                    sender: sender.clone(),
                    cancel: cancel.clone(),
                    interval_secs: Arc::clone(&interval_secs),
                }))
            }));
        }

        *slot = Some(Arc::new(Runtime {
            cancel,
            conn,
            controller,
            registry,
            network,
            sender,
            workers: Arc::new(workers),
            config,
            auto_update_secs,
            watchdog_started: AtomicBool::new(false),
            watchdog: StdMutex::new(None),
        }));
        Ok(())
    }

    /// Stop all workers, fail in-flight requests with a cancellation
    /// code, and close the port. Idempotent.
    pub fn disconnect(&self) {
        let runtime = self.runtime.lock().ok().and_then(|mut slot| slot.take());
        if let Some(rt) = runtime {
            tracing::info!("disconnecting from stick");
            rt.cancel.cancel();
            rt.controller.fail_all(RequestError::Cancelled);
            rt.conn.disconnect();
        }
    }

    /// Send the init request and wait for the stick to report itself.
    ///
    /// `StickInitError` when nothing comes back within `timeout`
    /// (default: the per-request timeout); `NetworkDown` when the stick
    /// answers but reports the mesh offline. Starts the watchdog on
    /// success.
    pub async fn initialize_stick(&self, timeout: Option<Duration>) -> Result<(), StickError> {
        let rt = self.runtime()?;
        if !rt.conn.is_connected() {
            return Err(StickError::StickInit);
        }
        let timeout = timeout.unwrap_or_else(|| rt.config.message_timeout());
        let outcome = rt.sender.submit(Request::StickInit, Priority::Foreground);
        let response = tokio::time::timeout(timeout, outcome)
            .await
            .map_err(|_| StickError::StickInit)?
            .map_err(|_| StickError::StickInit)?
            .map_err(|_| StickError::StickInit)?;
        let Response::StickInit { mac, network_online, circle_plus_mac, network_id, .. } = response
        else {
            return Err(StickError::StickInit);
        };
        rt.network.record_init(mac, network_online, circle_plus_mac, network_id);
        if !network_online {
            return Err(StickError::NetworkDown);
        }
        self.start_watchdog(&rt);
        Ok(())
    }

    fn start_watchdog(&self, rt: &Arc<Runtime>) {
        if rt.watchdog_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = spawn_watchdog(WatchdogCtx {
            workers: Arc::clone(&rt.workers),
            network: Arc::clone(&rt.network),
            registry: Arc::clone(&rt.registry),
            sender: rt.sender.clone(),
            config: rt.config.clone(),
            cancel: rt.cancel.clone(),
        });
        if let Ok(mut slot) = rt.watchdog.lock() {
            *slot = Some(handle);
        }
    }

    pub fn watchdog_running(&self) -> bool {
        self.runtime()
            .ok()
            .and_then(|rt| {
                rt.watchdog.lock().ok().map(|w| w.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            })
            .unwrap_or(false)
    }

    /// Discover the coordinator by its derived MAC. `CirclePlusError`
    /// when it does not respond within `timeout`.
    pub async fn initialize_circle_plus(&self, timeout: Option<Duration>) -> Result<(), StickError> {
        let rt = self.runtime()?;
        if !rt.conn.is_connected() || !rt.network.is_initialized() {
            return Err(StickError::StickInit);
        }
        let Some(mac) = rt.network.circle_plus_mac() else {
            return Err(StickError::StickInit);
        };
        if rt.network.is_circle_plus_discovered() {
            return Ok(());
        }

        let timeout = timeout.unwrap_or_else(|| rt.config.message_timeout());
        rt.registry.note_info_request(&mac, true);
        rt.sender.submit_forget(Request::NodeInfo { mac }, Priority::Foreground);

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if rt.network.is_circle_plus_discovered() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if rt.network.is_circle_plus_discovered() {
            Ok(())
        } else {
            Err(StickError::CirclePlus)
        }
    }

    /// Read the coordinator membership table and discover every member.
    /// Nodes that do not answer inside the cumulative window (expected
    /// for sleepy nodes) stay undiscovered until their next wake.
    /// Returns the MACs of all discovered nodes.
    pub async fn scan(&self) -> Result<Vec<Mac>, StickError> {
        let rt = self.runtime()?;
        self.initialize_circle_plus(None).await?;
        let Some(coordinator) = rt.registry.coordinator() else {
            return Err(StickError::CirclePlus);
        };

        rt.network.reset_scan();
        let members = coordinator.scan_for_nodes().await.map_err(|_| StickError::Timeout)?;
        rt.network.set_member_count(members.len());
        rt.registry.set_to_discover(&members);

        let window = rt.config.scan_timeout(members.len());
        let discoveries = members.keys().map(|mac| Self::discover_node(&rt, *mac));
        let timed_out = tokio::time::timeout(window, futures_util::future::join_all(discoveries))
            .await
            .is_err();

        if rt.network.finalize_scan() {
            let mut off_line = 0;
            for mac in members.keys() {
                if !rt.registry.is_known(mac).await {
                    off_line += 1;
                }
            }
            tracing::info!(
                members = members.len(),
                off_line,
                timed_out,
                "network scan finished; off-line nodes are discovered on their next wake"
            );
        }
        Ok(rt.registry.discovered_macs().await)
    }

    /// One discovery round: ask for node info and wait for the outcome.
    /// Failure leaves the MAC in the undiscovered set.
    async fn discover_node(rt: &Arc<Runtime>, mac: Mac) {
        if rt.registry.is_known(&mac).await {
            return;
        }
        rt.registry.note_info_request(&mac, true);
        let outcome = rt.sender.submit(Request::NodeInfo { mac }, Priority::Foreground);
        if let Ok(Err(e)) = outcome.await {
            tracing::info!(
                mac = %mac,
                err = %e,
                "node not discovered; expected for battery nodes, they answer on next wake"
            );
        }
    }

    /// Register a node in the coordinator membership table.
    pub fn node_join(&self, mac: &str) -> Result<(), StickError> {
        let mac = Mac::parse(mac)?;
        let rt = self.runtime()?;
        rt.sender
            .submit_forget(Request::NodeAdd { mac, accept: true }, Priority::Foreground);
        Ok(())
    }

    /// Remove a node from the coordinator membership table. The node is
    /// evicted from the registry when the coordinator confirms.
    pub fn node_unjoin(&self, mac: &str) -> Result<(), StickError> {
        let mac = Mac::parse(mac)?;
        let rt = self.runtime()?;
        let Some(coordinator) = rt.network.circle_plus_mac() else {
            return Err(StickError::StickInit);
        };
        rt.sender
            .submit_forget(Request::NodeRemove { coordinator, mac }, Priority::Foreground);
        Ok(())
    }

    /// Open or close the network for joiners. With `auto_accept`, join
    /// requests from unknown nodes are answered with a join on the
    /// spot; otherwise they surface as [`StickEvent::JoinRequest`].
    pub fn allow_join_requests(&self, enable: bool, auto_accept: bool) -> Result<(), StickError> {
        let rt = self.runtime()?;
        rt.sender
            .submit_forget(Request::NodeAllowJoining { enable }, Priority::Foreground);
        rt.network
            .set_join_policy(JoinPolicy { enabled: enable, auto_accept: enable && auto_accept });
        Ok(())
    }

    /// Configure periodic polling. `Some(0)` disables, `None` picks the
    /// default of three seconds per known node.
    pub async fn auto_update(&self, seconds: Option<u64>) -> Result<(), StickError> {
        let rt = self.runtime()?;
        let secs = match seconds {
            Some(secs) => secs,
            None => (rt.registry.supported_nodes().await.len() as u64 * 3).max(5),
        };
        tracing::debug!(secs, "auto update timer set");
        rt.auto_update_secs.store(secs, Ordering::SeqCst);
        Ok(())
    }

    // -- Read-only observability ----------------------------------------------

    /// MAC of the stick itself, once initialized.
    pub fn mac(&self) -> Option<String> {
        self.runtime().ok()?.network.stick_mac().map(|m| m.as_str().to_owned())
    }

    /// Derived MAC of the coordinator, once initialized.
    pub fn circle_plus_mac(&self) -> Option<String> {
        self.runtime().ok()?.network.circle_plus_mac().map(|m| m.as_str().to_owned())
    }

    pub fn network_id(&self) -> Option<u16> {
        self.runtime().ok()?.network.network_id()
    }

    /// Number of nodes registered at the coordinator, including the
    /// coordinator itself.
    pub fn joined_nodes(&self) -> usize {
        self.runtime().map(|rt| rt.network.member_count() + 1).unwrap_or(0)
    }

    /// MACs of all discovered, supported nodes.
    pub async fn discovered_nodes(&self) -> Vec<Mac> {
        match self.runtime() {
            Ok(rt) => rt.registry.discovered_macs().await,
            Err(_) => Vec::new(),
        }
    }

    /// Handle to a discovered node.
    pub async fn node(&self, mac: &str) -> Option<Arc<dyn NodeOps>> {
        let mac = Mac::parse(mac).ok()?;
        self.runtime().ok()?.registry.node(&mac).await
    }

    /// Subscribe to mesh events.
    pub fn subscribe(&self) -> broadcast::Receiver<StickEvent> {
        self.events.subscribe()
    }
}

impl Drop for Stick {
    fn drop(&mut self) {
        self.disconnect();
    }
}
