//! Named bidirectional channel over a pair of POSIX FIFOs.
//!
//! A channel `name` maps to two unidirectional FIFOs under the channel
//! directory:
//!
//! ```text
//! <dir>/<name>.req   requester writes, responder reads
//! <dir>/<name>.rep   responder writes, requester reads
//! ```
//!
//! The protocol on top is strictly half-duplex request-then-reply, so the
//! two endpoints never race on a single FIFO. Whichever side opens first
//! creates the FIFOs; the other side attaches.
//!
//! # Open ordering
//!
//! Opening a FIFO blocks until the opposite end is opened, so the two roles
//! open in complementary order to avoid deadlock: the requester opens
//! `.req` for writing then `.rep` for reading, while the responder opens
//! `.req` for reading then `.rep` for writing.

use crate::error::{DuctworkError, Result};
use nix::sys::stat::Mode;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Which end of the conversation this process holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends requests, receives replies (client side).
    Requester,
    /// Receives requests, sends replies (server side).
    Responder,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Requester => "requester",
            Role::Responder => "responder",
        }
    }
}

/// One endpoint of a named FIFO channel.
///
/// Exactly one requester and one responder endpoint should exist per name
/// at a time; the OS does not enforce this, the channel allocator does.
#[derive(Debug)]
pub struct FifoChannel {
    name: String,
    role: Role,
    req_path: PathBuf,
    rep_path: PathBuf,
    /// Outgoing direction for this role.
    tx: Option<File>,
    /// Incoming direction for this role.
    rx: Option<File>,
}

impl FifoChannel {
    /// Establish or attach to the channel `name` under `dir`.
    ///
    /// Creates both FIFOs if they do not exist yet, then opens the two
    /// endpoints for this role. Blocks until the peer opens its endpoints.
    /// Fails with `TransportUnavailable` if the FIFOs cannot be created or
    /// opened.
    pub fn open(dir: &Path, name: &str, role: Role) -> Result<Self> {
        let req_path = dir.join(format!("{name}.req"));
        let rep_path = dir.join(format!("{name}.rep"));

        create_fifo(&req_path, name)?;
        create_fifo(&rep_path, name)?;

        let unavailable = |source: std::io::Error| DuctworkError::TransportUnavailable {
            name: name.to_string(),
            source,
        };

        // Complementary open order per role; see module docs.
        let (tx, rx) = match role {
            Role::Requester => {
                let tx = OpenOptions::new()
                    .write(true)
                    .open(&req_path)
                    .map_err(unavailable)?;
                let rx = OpenOptions::new()
                    .read(true)
                    .open(&rep_path)
                    .map_err(unavailable)?;
                (tx, rx)
            }
            Role::Responder => {
                let rx = OpenOptions::new()
                    .read(true)
                    .open(&req_path)
                    .map_err(unavailable)?;
                let tx = OpenOptions::new()
                    .write(true)
                    .open(&rep_path)
                    .map_err(unavailable)?;
                (tx, rx)
            }
        };

        debug!(channel = %name, role = role.as_str(), "channel open");

        Ok(Self {
            name: name.to_string(),
            role,
            req_path,
            rep_path,
            tx: Some(tx),
            rx: Some(rx),
        })
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role of this endpoint.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Write exactly `buf.len()` bytes to the peer.
    ///
    /// Blocks until the FIFO accepts the data. Fails with `TransportClosed`
    /// if the peer endpoint is gone.
    pub fn send(&self, buf: &[u8]) -> Result<()> {
        let mut tx = self.tx.as_ref().ok_or_else(|| self.closed())?;
        trace!(channel = %self.name, len = buf.len(), "send");
        tx.write_all(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                self.closed()
            } else {
                DuctworkError::io_with_path(e, self.tx_path())
            }
        })
    }

    /// Read exactly `len` bytes from the peer.
    ///
    /// The caller always knows `len` in advance: replies are either a fixed
    /// compile-time size or a length announced by a previous reply. Fails
    /// with `TransportClosed` on end-of-stream at a message boundary and
    /// `ShortRead` when the stream ends mid-message.
    pub fn recv_exact(&self, len: usize) -> Result<Vec<u8>> {
        let mut rx = self.rx.as_ref().ok_or_else(|| self.closed())?;
        let mut buf = vec![0u8; len];
        let mut total = 0usize;

        while total < len {
            let n = rx
                .read(&mut buf[total..])
                .map_err(|e| DuctworkError::io_with_path(e, self.rx_path()))?;
            if n == 0 {
                return if total == 0 {
                    Err(self.closed())
                } else {
                    Err(DuctworkError::ShortRead {
                        expected: len,
                        actual: total,
                    })
                };
            }
            total += n;
        }

        trace!(channel = %self.name, len, "recv");
        Ok(buf)
    }

    /// Read one request message of at most `max` bytes.
    ///
    /// Requests vary in length (a file query carries a filename), so the
    /// responder reads a single peer write in one `read(2)` call. FIFO
    /// writes up to `PIPE_BUF` bytes are atomic, and `max` is capped well
    /// below that, so one read returns one whole request.
    ///
    /// Returns `TransportClosed` when the peer has closed its write end.
    pub fn recv_message(&self, max: usize) -> Result<Vec<u8>> {
        let mut rx = self.rx.as_ref().ok_or_else(|| self.closed())?;
        let mut buf = vec![0u8; max];
        let n = rx
            .read(&mut buf)
            .map_err(|e| DuctworkError::io_with_path(e, self.rx_path()))?;
        if n == 0 {
            return Err(self.closed());
        }
        buf.truncate(n);
        trace!(channel = %self.name, len = n, "recv message");
        Ok(buf)
    }

    /// Release the transport.
    ///
    /// Drops both endpoints and unlinks the FIFO paths. Idempotent; the
    /// peer's next receive observes end-of-stream. A missing path (already
    /// unlinked by the peer) is not an error.
    pub fn close(&mut self) {
        if self.tx.is_none() && self.rx.is_none() {
            return;
        }
        self.tx = None;
        self.rx = None;
        remove_fifo(&self.req_path);
        remove_fifo(&self.rep_path);
        debug!(channel = %self.name, role = self.role.as_str(), "channel closed");
    }

    fn tx_path(&self) -> &Path {
        match self.role {
            Role::Requester => &self.req_path,
            Role::Responder => &self.rep_path,
        }
    }

    fn rx_path(&self) -> &Path {
        match self.role {
            Role::Requester => &self.rep_path,
            Role::Responder => &self.req_path,
        }
    }

    fn closed(&self) -> DuctworkError {
        DuctworkError::TransportClosed {
            channel: self.name.clone(),
        }
    }
}

impl Drop for FifoChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Create a FIFO at `path`, tolerating one that already exists.
fn create_fifo(path: &Path, channel: &str) -> Result<()> {
    match nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::EEXIST) => Ok(()),
        Err(errno) => Err(DuctworkError::TransportUnavailable {
            name: channel.to_string(),
            source: std::io::Error::from(errno),
        }),
    }
}

/// Unlink a FIFO, ignoring a path the peer already removed.
fn remove_fifo(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "failed to unlink fifo");
        }
    }
}
