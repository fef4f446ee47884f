// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message controller: pairs requests with acks and responses, retries
//! on timeout, and keeps sequence ids unique among in-flight requests.
//!
//! Two workers live here. The send worker drains the submission queues
//! (foreground before background), assigns a sequence id, records the
//! pending entry, and hands the encoded frame to the connection. The
//! receive-timeout scanner wakes every poll tick, expires pending
//! entries, and either resubmits them under a fresh sequence id or fails
//! them through their responder.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::config::StickConfig;
use crate::connection::Connection;
use crate::error::RequestError;
use crate::protocol::{AckCode, Mac, Request, Response};

pub type RequestResult = Result<Response, RequestError>;

/// Submission priority. Background is best-effort discovery traffic and
/// yields to everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Foreground,
    Background,
}

pub(crate) struct Submission {
    request: Request,
    responder: Option<oneshot::Sender<RequestResult>>,
    priority: Priority,
    attempts_left: u8,
}

/// In-flight request state, keyed by sequence id in the pending table.
struct Pending {
    request: Request,
    responder: Option<oneshot::Sender<RequestResult>>,
    priority: Priority,
    attempts_left: u8,
    submitted_at: Instant,
    acked: bool,
}

/// Clonable submission front-end handed to nodes and supervisors.
#[derive(Clone)]
pub(crate) struct SendHandle {
    fg_tx: mpsc::UnboundedSender<Submission>,
    bg_tx: mpsc::UnboundedSender<Submission>,
    message_retry: u8,
}

impl SendHandle {
    /// Queue a request and receive its outcome on the returned channel.
    pub fn submit(&self, request: Request, priority: Priority) -> oneshot::Receiver<RequestResult> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Submission {
            request,
            responder: Some(tx),
            priority,
            attempts_left: self.message_retry.saturating_sub(1),
        });
        rx
    }

    /// Queue a request nobody waits on.
    pub fn submit_forget(&self, request: Request, priority: Priority) {
        self.enqueue(Submission {
            request,
            responder: None,
            priority,
            attempts_left: self.message_retry.saturating_sub(1),
        });
    }

    fn enqueue(&self, submission: Submission) {
        let queue = match submission.priority {
            Priority::Foreground => &self.fg_tx,
            Priority::Background => &self.bg_tx,
        };
        if let Err(mpsc::error::SendError(sub)) = queue.send(submission) {
            if let Some(responder) = sub.responder {
                let _ = responder.send(Err(RequestError::Disconnected));
            }
        }
    }
}

/// What the router must do after the controller resolved an inbound
/// response against the pending table. A `completion` is the responder
/// of the pending request this response terminates; the router fires it
/// with the response *after* dispatch, so callers awaiting e.g. a
/// node-info request observe the registry already updated.
pub(crate) enum Resolution {
    /// Continue with normal dispatch.
    Dispatch { completion: Option<oneshot::Sender<RequestResult>> },
    /// A request addressed at this node died inside the mesh; mark it
    /// unreachable.
    MarkUnreachable { mac: Mac },
    /// Pure protocol traffic, nothing to dispatch.
    Done { completion: Option<oneshot::Sender<RequestResult>> },
}

pub(crate) struct Controller {
    pending: StdMutex<HashMap<u16, Pending>>,
    next_seq: StdMutex<u16>,
    fg_tx: mpsc::UnboundedSender<Submission>,
    bg_tx: mpsc::UnboundedSender<Submission>,
    fg_rx: AsyncMutex<mpsc::UnboundedReceiver<Submission>>,
    bg_rx: AsyncMutex<mpsc::UnboundedReceiver<Submission>>,
    conn: Arc<Connection>,
    cancel: CancellationToken,
    config: StickConfig,
}

impl Controller {
    pub fn new(conn: Arc<Connection>, config: StickConfig, cancel: CancellationToken) -> Arc<Self> {
        let (fg_tx, fg_rx) = mpsc::unbounded_channel();
        let (bg_tx, bg_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            pending: StdMutex::new(HashMap::new()),
            next_seq: StdMutex::new(0),
            fg_tx,
            bg_tx,
            fg_rx: AsyncMutex::new(fg_rx),
            bg_rx: AsyncMutex::new(bg_rx),
            conn,
            cancel,
            config,
        })
    }

    pub fn handle(&self) -> SendHandle {
        SendHandle {
            fg_tx: self.fg_tx.clone(),
            bg_tx: self.bg_tx.clone(),
            message_retry: self.config.message_retry.max(1),
        }
    }

    /// Send worker: foreground drains strictly before background.
    pub fn spawn_send_worker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let ctrl = self;
        tokio::spawn(async move {
            let mut fg = ctrl.fg_rx.lock().await;
            let mut bg = ctrl.bg_rx.lock().await;
            tracing::debug!("send worker started");
            loop {
                let submission = tokio::select! {
                    biased;
                    _ = ctrl.cancel.cancelled() => break,
                    Some(sub) = fg.recv() => sub,
                    Some(sub) = bg.recv() => sub,
                };
                ctrl.transmit(submission);
            }
            tracing::debug!("send worker stopped");
        })
    }

    /// Assign a fresh sequence id, record the pending entry, and put the
    /// encoded frame on the wire.
    fn transmit(&self, submission: Submission) {
        let Ok(mut pending) = self.pending.lock() else { return };
        let seq_id = self.allocate_seq(&pending);
        let frame = submission.request.encode(seq_id);
        tracing::trace!(
            seq_id,
            command = submission.request.command().as_u16(),
            "transmitting request"
        );
        pending.insert(
            seq_id,
            Pending {
                request: submission.request,
                responder: submission.responder,
                priority: submission.priority,
                attempts_left: submission.attempts_left,
                submitted_at: Instant::now(),
                acked: false,
            },
        );
        drop(pending);

        if !self.conn.submit(frame) {
            // Connection gone; the scanner will fail the entry.
            tracing::warn!(seq_id, "submit to connection failed");
        }
    }

    fn allocate_seq(&self, pending: &HashMap<u16, Pending>) -> u16 {
        let mut next = self.next_seq.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            *next = next.wrapping_add(1);
            if !pending.contains_key(&*next) {
                return *next;
            }
        }
    }

    /// Receive-timeout scanner: expire, then retry or fail.
    pub fn spawn_timeout_scanner(
        self: Arc<Self>,
        on_exhausted: mpsc::UnboundedSender<Mac>,
    ) -> tokio::task::JoinHandle<()> {
        let ctrl = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(ctrl.config.poll_tick());
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::debug!("receive-timeout scanner started");
            loop {
                tokio::select! {
                    _ = ctrl.cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }

                let timeout = ctrl.config.message_timeout();
                let expired: Vec<(u16, Pending)> = {
                    let Ok(mut pending) = ctrl.pending.lock() else { continue };
                    let seqs: Vec<u16> = pending
                        .iter()
                        .filter(|(_, p)| p.submitted_at.elapsed() >= timeout)
                        .map(|(seq, _)| *seq)
                        .collect();
                    seqs.into_iter()
                        .filter_map(|seq| pending.remove(&seq).map(|p| (seq, p)))
                        .collect()
                };

                for (seq_id, entry) in expired {
                    if entry.attempts_left > 0 {
                        tracing::debug!(
                            seq_id,
                            attempts_left = entry.attempts_left,
                            "request timed out, reissuing"
                        );
                        ctrl.transmit(Submission {
                            request: entry.request,
                            responder: entry.responder,
                            priority: entry.priority,
                            attempts_left: entry.attempts_left - 1,
                        });
                    } else {
                        tracing::warn!(seq_id, acked = entry.acked, "request failed after retries");
                        if let Some(mac) = entry.request.target_mac() {
                            let _ = on_exhausted.send(mac);
                        }
                        if let Some(responder) = entry.responder {
                            let _ = responder.send(Err(RequestError::Timeout));
                        }
                    }
                }
            }
            tracing::debug!("receive-timeout scanner stopped");
        })
    }

    /// Match an inbound response against the pending table. Acks advance
    /// or terminate entries; expected responses complete them. Either
    /// arrival order works: a response may land before its ack.
    pub fn resolve(&self, response: &Response) -> Resolution {
        match response {
            Response::StickAck { seq_id, code } => {
                self.resolve_ack(*seq_id, *code);
                Resolution::Done { completion: None }
            }
            Response::NodeAck { seq_id, code, mac } => {
                if code.is_state_action() {
                    // Relay / clock / sleep confirmations complete the
                    // pending request and also update node state.
                    let completion = self.take_ack_terminal(*seq_id);
                    Resolution::Dispatch { completion }
                } else {
                    match self.resolve_ack(*seq_id, *code) {
                        Some(RequestError::MeshTimeout) => {
                            Resolution::MarkUnreachable { mac: *mac }
                        }
                        _ => Resolution::Done { completion: None },
                    }
                }
            }
            other => {
                let seq_id = other.seq_id();
                let Ok(mut pending) = self.pending.lock() else {
                    return Resolution::Dispatch { completion: None };
                };
                let matches = pending
                    .get(&seq_id)
                    .map(|p| p.request.response_command().map(|c| c.as_u16()) == Some(other.command()))
                    .unwrap_or(false);
                let completion = if matches {
                    pending.remove(&seq_id).and_then(|entry| entry.responder)
                } else {
                    None
                };
                Resolution::Dispatch { completion }
            }
        }
    }

    /// Success ack: mark acked, or complete an ack-terminal request.
    /// Reject / mesh-timeout: fail the entry now. Returns the failure,
    /// if any, so the caller can update node availability.
    fn resolve_ack(&self, seq_id: u16, code: AckCode) -> Option<RequestError> {
        let Ok(mut pending) = self.pending.lock() else { return None };
        let Some(ack_terminal) = pending
            .get(&seq_id)
            .map(|p| p.request.response_command().is_none())
        else {
            tracing::trace!(seq_id, code = code.as_u16(), "ack for unknown sequence id");
            return None;
        };

        match code {
            AckCode::Success | AckCode::JoinAccepted => {
                if ack_terminal {
                    if let Some(entry) = pending.remove(&seq_id) {
                        drop(pending);
                        if let Some(responder) = entry.responder {
                            let _ = responder.send(Ok(Response::StickAck { seq_id, code }));
                        }
                    }
                } else if let Some(entry) = pending.get_mut(&seq_id) {
                    entry.acked = true;
                }
                None
            }
            AckCode::Reject => {
                let entry = pending.remove(&seq_id);
                drop(pending);
                tracing::warn!(seq_id, "request rejected by stick");
                if let Some(responder) = entry.and_then(|e| e.responder) {
                    let _ = responder.send(Err(RequestError::Rejected));
                }
                Some(RequestError::Rejected)
            }
            AckCode::MeshTimeout => {
                let entry = pending.remove(&seq_id);
                drop(pending);
                tracing::warn!(seq_id, "mesh timeout reported by stick");
                if let Some(responder) = entry.and_then(|e| e.responder) {
                    let _ = responder.send(Err(RequestError::MeshTimeout));
                }
                Some(RequestError::MeshTimeout)
            }
            _ => None,
        }
    }

    /// Node acks carrying state complete ack-terminal requests (relay
    /// switch, clock set); the responder is returned for the router to
    /// fire after dispatch.
    fn take_ack_terminal(&self, seq_id: u16) -> Option<oneshot::Sender<RequestResult>> {
        let Ok(mut pending) = self.pending.lock() else { return None };
        let ack_terminal = pending
            .get(&seq_id)
            .map(|p| p.request.response_command().is_none())
            .unwrap_or(false);
        if ack_terminal {
            pending.remove(&seq_id).and_then(|entry| entry.responder)
        } else {
            None
        }
    }

    /// Fail everything in flight; called on disconnect. Responders still
    /// fire, with a cancellation code.
    pub fn fail_all(&self, error: RequestError) {
        let drained: Vec<Pending> = {
            let Ok(mut pending) = self.pending.lock() else { return };
            pending.drain().map(|(_, p)| p).collect()
        };
        for entry in drained {
            if let Some(responder) = entry.responder {
                let _ = responder.send(Err(error));
            }
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn pending_seqs(&self) -> Vec<u16> {
        self.pending.lock().map(|p| p.keys().copied().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
