// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stick-level shared status: what the init response reported, the
//! coordinator discovery flag, and the join policy.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use crate::protocol::Mac;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct JoinPolicy {
    pub enabled: bool,
    pub auto_accept: bool,
}

#[derive(Default)]
pub(crate) struct NetworkState {
    stick_mac: StdMutex<Option<Mac>>,
    circle_plus_mac: StdMutex<Option<Mac>>,
    network_id: StdMutex<Option<u16>>,
    network_online: AtomicBool,
    initialized: AtomicBool,
    circle_plus_discovered: AtomicBool,
    join_policy: StdMutex<JoinPolicy>,
    /// Size of the coordinator membership table from the last scan.
    member_count: AtomicUsize,
    scan_finalized: AtomicBool,
}

impl NetworkState {
    pub fn record_init(&self, mac: Mac, online: bool, circle_plus: Mac, network_id: u16) {
        if let Ok(mut slot) = self.stick_mac.lock() {
            *slot = Some(mac);
        }
        if let Ok(mut slot) = self.circle_plus_mac.lock() {
            // The coordinator answers on the reported MAC with its first
            // two characters replaced by "00".
            *slot = Some(circle_plus.as_coordinator());
        }
        if let Ok(mut slot) = self.network_id.lock() {
            *slot = Some(network_id);
        }
        self.network_online.store(online, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn stick_mac(&self) -> Option<Mac> {
        self.stick_mac.lock().ok().and_then(|m| *m)
    }

    pub fn circle_plus_mac(&self) -> Option<Mac> {
        self.circle_plus_mac.lock().ok().and_then(|m| *m)
    }

    pub fn network_id(&self) -> Option<u16> {
        self.network_id.lock().ok().and_then(|m| *m)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_network_online(&self) -> bool {
        self.network_online.load(Ordering::SeqCst)
    }

    pub fn mark_circle_plus_discovered(&self) {
        self.circle_plus_discovered.store(true, Ordering::SeqCst);
    }

    pub fn is_circle_plus_discovered(&self) -> bool {
        self.circle_plus_discovered.load(Ordering::SeqCst)
    }

    pub fn set_join_policy(&self, policy: JoinPolicy) {
        if let Ok(mut slot) = self.join_policy.lock() {
            *slot = policy;
        }
    }

    pub fn join_policy(&self) -> JoinPolicy {
        self.join_policy.lock().map(|p| *p).unwrap_or_default()
    }

    pub fn set_member_count(&self, count: usize) {
        self.member_count.store(count, Ordering::SeqCst);
    }

    pub fn member_count(&self) -> usize {
        self.member_count.load(Ordering::SeqCst)
    }

    pub fn reset_scan(&self) {
        self.scan_finalized.store(false, Ordering::SeqCst);
    }

    /// True for exactly one caller per scan; the discovery-complete and
    /// timeout paths both finalize through here.
    pub fn finalize_scan(&self) -> bool {
        !self.scan_finalized.swap(true, Ordering::SeqCst)
    }
}
