// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervision: the watchdog that replaces dead workers and the updater
//! that drives periodic polling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::config::StickConfig;
use crate::controller::{Priority, SendHandle};
use crate::protocol::Request;
use crate::registry::Registry;
use crate::state::NetworkState;

/// Join handle over either flavor of worker.
pub(crate) enum WorkerHandle {
    Task(tokio::task::JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
}

impl WorkerHandle {
    fn is_finished(&self) -> bool {
        match self {
            Self::Task(handle) => handle.is_finished(),
            Self::Thread(handle) => handle.is_finished(),
        }
    }
}

/// A worker the watchdog keeps alive: a live handle plus the recipe to
/// start a replacement.
pub(crate) struct Supervised {
    name: &'static str,
    handle: StdMutex<WorkerHandle>,
    respawn: Box<dyn Fn() -> WorkerHandle + Send + Sync>,
}

impl Supervised {
    /// Start the worker now and remember how to start it again.
    pub fn start(
        name: &'static str,
        spawn: impl Fn() -> WorkerHandle + Send + Sync + 'static,
    ) -> Self {
        let handle = StdMutex::new(spawn());
        Self { name, handle, respawn: Box::new(spawn) }
    }

    pub fn alive(&self) -> bool {
        self.handle.lock().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn revive(&self) {
        tracing::warn!(worker = self.name, "unexpected halt of worker, restarting");
        if let Ok(mut handle) = self.handle.lock() {
            *handle = (self.respawn)();
        }
    }

    #[cfg(test)]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[cfg(test)]
    pub fn abort(&self) {
        if let Ok(handle) = self.handle.lock() {
            if let WorkerHandle::Task(task) = &*handle {
                task.abort();
            }
        }
    }
}

/// Coordinator rediscovery backoff: every cycle for the first 60 tries,
/// then once per 60 cycles.
const CIRCLE_PLUS_FAST_RETRIES: u32 = 60;
const CIRCLE_PLUS_SLOW_CYCLE: u32 = 60;

pub(crate) struct WatchdogCtx {
    pub workers: Arc<Vec<Supervised>>,
    pub network: Arc<NetworkState>,
    pub registry: Arc<Registry>,
    pub sender: SendHandle,
    pub config: StickConfig,
    pub cancel: CancellationToken,
}

/// Watchdog: every cycle, replace finished workers and re-issue
/// coordinator discovery while it is still outstanding.
pub(crate) fn spawn_watchdog(ctx: WatchdogCtx) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(ctx.config.watchdog_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut circle_plus_retries: u32 = 0;
        let mut slow_cycle_counter: u32 = 0;
        tracing::debug!("watchdog started");
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            for worker in ctx.workers.iter() {
                if !worker.alive() {
                    worker.revive();
                }
            }

            if ctx.network.is_initialized() && !ctx.network.is_circle_plus_discovered() {
                slow_cycle_counter += 1;
                if circle_plus_retries < CIRCLE_PLUS_FAST_RETRIES
                    || slow_cycle_counter > CIRCLE_PLUS_SLOW_CYCLE
                {
                    if let Some(mac) = ctx.network.circle_plus_mac() {
                        tracing::info!(mac = %mac, "coordinator still undiscovered, resubmitting");
                        ctx.registry.note_info_request(&mac, true);
                        ctx.sender
                            .submit_forget(Request::NodeInfo { mac }, Priority::Foreground);
                    }
                    circle_plus_retries += 1;
                    slow_cycle_counter = 0;
                }
            }
        }
        tracing::debug!("watchdog stopped");
    })
}

pub(crate) struct UpdaterCtx {
    pub registry: Arc<Registry>,
    pub sender: SendHandle,
    pub cancel: CancellationToken,
    /// Seconds between cycles; 0 disables polling.
    pub interval_secs: Arc<AtomicU64>,
}

/// Days since the epoch; good enough to notice a calendar-day change.
fn current_day() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
        / 86_400
}

/// Updater: per cycle, ping and poll mains nodes, decay SED
/// availability, sync clocks on day change, and every tenth cycle send
/// a background ping to each undiscovered MAC so sleepy nodes get
/// discovered on their next wake.
pub(crate) fn spawn_updater(ctx: UpdaterCtx) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut day = current_day();
        let mut discover_counter: u8 = 0;
        tracing::debug!("updater started");
        loop {
            let secs = ctx.interval_secs.load(Ordering::SeqCst);
            let sleep = if secs == 0 { Duration::from_millis(500) } else { Duration::from_secs(secs) };
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
            if ctx.interval_secs.load(Ordering::SeqCst) == 0 {
                continue;
            }

            let day_changed = current_day() != day;
            if day_changed {
                day = current_day();
            }

            let now = Instant::now();
            for node in ctx.registry.supported_nodes().await {
                let base = node.base();
                if base.battery_powered() {
                    if base.heartbeat_expired(now) {
                        tracing::info!(
                            mac = %base.mac(),
                            interval_secs = base.maintenance_interval().as_secs(),
                            "no heartbeat within maintenance interval, marking unavailable"
                        );
                        base.mark_unavailable();
                    }
                } else {
                    node.request_ping();
                    if base.measures_power() {
                        node.update_power_usage();
                        if day_changed {
                            node.sync_clock();
                        }
                    }
                }
            }

            discover_counter += 1;
            if discover_counter >= 10 {
                discover_counter = 0;
                for mac in ctx.registry.undiscovered_macs() {
                    ctx.sender
                        .submit_forget(Request::NodePing { mac }, Priority::Background);
                }
            }
        }
        tracing::debug!("updater stopped");
    })
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod supervisor_tests;
