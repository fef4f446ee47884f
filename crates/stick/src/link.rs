// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Byte-level link to the stick.
//!
//! The production implementation wraps a `serial2` port; tests and
//! simulators use [`memory_pair`] to wire two endpoints back to back.

use std::io;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serial2::SerialPort;

use crate::error::StickError;

/// A clonable bidirectional byte stream. Reads must time out (so the
/// reader worker can observe cancellation) rather than block forever.
pub trait ByteLink: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// A second handle to the same device, for the peer worker or a
    /// worker restart.
    fn try_clone(&self) -> io::Result<Box<dyn ByteLink>>;
}

/// 115200 8N1 serial link to a physical stick.
pub struct SerialLink {
    port: SerialPort,
}

impl SerialLink {
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, StickError> {
        let mut port = SerialPort::open(path, baud_rate)
            .map_err(|e| StickError::Port { message: format!("{path}: {e}") })?;
        port.set_read_timeout(read_timeout)
            .map_err(|e| StickError::Port { message: format!("{path}: {e}") })?;
        Ok(Self { port })
    }
}

impl ByteLink for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()
    }

    fn try_clone(&self) -> io::Result<Box<dyn ByteLink>> {
        Ok(Box::new(Self { port: self.port.try_clone()? }))
    }
}

/// In-memory link pair. Bytes written to one endpoint are read from the
/// other. Reads time out after `READ_TIMEOUT` like a real port.
pub fn memory_pair() -> (MemoryLink, MemoryLink) {
    let (a_tx, a_rx) = std_mpsc::channel();
    let (b_tx, b_rx) = std_mpsc::channel();
    (
        MemoryLink {
            tx: a_tx,
            rx: Arc::new(Mutex::new(b_rx)),
            pending: Arc::new(Mutex::new(Vec::new())),
        },
        MemoryLink {
            tx: b_tx,
            rx: Arc::new(Mutex::new(a_rx)),
            pending: Arc::new(Mutex::new(Vec::new())),
        },
    )
}

const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// One endpoint of [`memory_pair`]. Clones share the inbound stream, so
/// only one reader should be active at a time (matching how the serial
/// connection uses link clones).
pub struct MemoryLink {
    tx: std_mpsc::Sender<Vec<u8>>,
    rx: Arc<Mutex<std_mpsc::Receiver<Vec<u8>>>>,
    pending: Arc<Mutex<Vec<u8>>>,
}

impl ByteLink for MemoryLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "link poisoned"))?;
        if pending.is_empty() {
            let rx = self
                .rx
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "link poisoned"))?;
            match rx.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => pending.extend_from_slice(&chunk),
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
                }
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        pending.drain(..n);
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
    }

    fn try_clone(&self) -> io::Result<Box<dyn ByteLink>> {
        Ok(Box::new(Self {
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
            pending: Arc::clone(&self.pending),
        }))
    }
}
