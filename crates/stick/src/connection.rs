// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serial connection: owns the byte link and the two workers moving
//! bytes across it.
//!
//! The reader runs on a dedicated thread (serial reads block) and feeds
//! validated frames into an async channel. The writer is a task draining
//! the outbound queue with a minimum inter-frame gap; the stick rejects
//! back-to-back writes. Both workers are individually restartable: the
//! watchdog spawns a fresh one with a fresh link clone when one halts.

use std::io;
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::config::StickConfig;
use crate::error::StickError;
use crate::link::ByteLink;
use crate::protocol::{codec, Framer, RawFrame};

pub(crate) struct Connection {
    /// Master handle; workers get clones. `None` after disconnect.
    link: StdMutex<Option<Box<dyn ByteLink>>>,
    inbound_tx: mpsc::UnboundedSender<RawFrame>,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Held by the active writer worker for its lifetime; reacquired on
    /// restart once the previous worker has finished.
    outbound_rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    cancel: CancellationToken,
    config: StickConfig,
}

impl Connection {
    /// Wrap an opened link. The inbound end of the returned channel
    /// yields every frame that passes marker and CRC validation.
    pub fn new(
        link: Box<dyn ByteLink>,
        config: StickConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<RawFrame>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let conn = Self {
            link: StdMutex::new(Some(link)),
            inbound_tx,
            outbound_tx,
            outbound_rx: AsyncMutex::new(outbound_rx),
            cancel,
            config,
        };
        (conn, inbound_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().map(|l| l.is_some()).unwrap_or(false)
    }

    /// Non-blocking enqueue of one encoded frame.
    pub fn submit(&self, frame: Vec<u8>) -> bool {
        self.outbound_tx.send(frame).is_ok()
    }

    /// Drop the link. Idempotent; workers exit on their next poll tick.
    pub fn disconnect(&self) {
        if let Ok(mut link) = self.link.lock() {
            *link = None;
        }
    }

    fn clone_link(&self) -> Option<Box<dyn ByteLink>> {
        let guard = self.link.lock().ok()?;
        let link = guard.as_ref()?;
        match link.try_clone() {
            Ok(clone) => Some(clone),
            Err(e) => {
                tracing::error!(err = %e, "failed to clone link for worker");
                None
            }
        }
    }

    /// Spawn the reader worker: scans the byte stream for frames,
    /// validates them, pushes them inbound. Malformed runs are dropped
    /// and logged.
    pub fn spawn_reader(&self) -> std::thread::JoinHandle<()> {
        let link = self.clone_link();
        let inbound = self.inbound_tx.clone();
        let cancel = self.cancel.clone();
        std::thread::spawn(move || {
            let Some(mut link) = link else { return };
            let mut framer = Framer::new();
            let mut buf = [0u8; 512];
            tracing::debug!("connection reader started");
            while !cancel.is_cancelled() {
                match link.read(&mut buf) {
                    Ok(0) => {
                        tracing::warn!("serial link closed");
                        break;
                    }
                    Ok(n) => {
                        framer.push(&buf[..n]);
                        while let Some(chunk) = framer.next_chunk() {
                            match codec::split(&chunk) {
                                Ok(frame) => {
                                    if inbound.send(frame).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(err = %e, "dropping malformed frame");
                                }
                            }
                        }
                    }
                    Err(e) if is_transient(&e) => continue,
                    Err(e) => {
                        tracing::error!(err = %e, "serial read error, reader exiting");
                        break;
                    }
                }
            }
            tracing::debug!("connection reader stopped");
        })
    }

    /// Spawn the writer worker: drains the outbound queue, one frame
    /// per `write_gap`.
    pub fn spawn_writer(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let conn = self;
        tokio::spawn(async move {
            let mut link = match conn.clone_link() {
                Some(link) => link,
                None => return,
            };
            let mut rx = conn.outbound_rx.lock().await;
            let gap = conn.config.write_gap();
            tracing::debug!("connection writer started");
            loop {
                let frame = tokio::select! {
                    _ = conn.cancel.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                if let Err(e) = link.write_all(&frame) {
                    if is_transient(&e) {
                        // The receive-timeout path resubmits the frame.
                        tracing::warn!(err = %e, "transient serial write error, frame dropped");
                        continue;
                    }
                    tracing::error!(err = %e, "serial write error, writer exiting");
                    break;
                }
                tokio::time::sleep(gap).await;
            }
            tracing::debug!("connection writer stopped");
        })
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Open-or-fail helper used by `Stick::connect`.
pub(crate) fn open_serial(
    path: &str,
    config: &StickConfig,
) -> Result<Box<dyn ByteLink>, StickError> {
    let link = crate::link::SerialLink::open(path, config.baud_rate, config.read_timeout())?;
    Ok(Box::new(link))
}
