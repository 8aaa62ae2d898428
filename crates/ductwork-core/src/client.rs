//! Client-side requester: connects over the control channel, negotiates
//! dynamic channels, and runs the data and file request flows.
//!
//! Every request goes out on the most recently opened channel; the
//! registry keeps the control channel underneath and tears everything
//! down in reverse creation order on shutdown.

use crate::channel::{FifoChannel, Role};
use crate::config::ProtocolConfig;
use crate::error::{DuctworkError, Result};
use crate::message::{decode_channel_name, Message};
use crate::registry::ChannelRegistry;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

/// The client side of the transport.
pub struct Requester {
    channel_dir: PathBuf,
    max_message: usize,
    registry: ChannelRegistry,
}

impl Requester {
    /// Attach to a responder through the control channel under
    /// `channel_dir`.
    ///
    /// Blocks until the responder opens its side. `max_message` must match
    /// the responder's, since it bounds both request writes and file chunk
    /// replies.
    pub fn connect(channel_dir: impl Into<PathBuf>, max_message: usize) -> Result<Self> {
        let channel_dir = channel_dir.into();
        std::fs::create_dir_all(&channel_dir)
            .map_err(|e| DuctworkError::io_with_path(e, &channel_dir))?;

        let control = FifoChannel::open(
            &channel_dir,
            ProtocolConfig::CONTROL_CHANNEL,
            Role::Requester,
        )?;
        info!(dir = %channel_dir.display(), "connected to responder");

        Ok(Self {
            channel_dir,
            max_message,
            registry: ChannelRegistry::new(control),
        })
    }

    /// Ask the responder for a private channel and switch to it.
    ///
    /// Sends `NewChannel` on the control channel, reads back the
    /// fixed-size name reply, opens the named channel, and registers it as
    /// the new active channel. Returns the allocated name.
    pub fn new_channel(&mut self) -> Result<String> {
        let control = self.registry.control();
        control.send(&Message::NewChannel.encode())?;
        let reply = control.recv_exact(ProtocolConfig::CHANNEL_NAME_LEN)?;
        let name = decode_channel_name(&reply)?;

        let channel = FifoChannel::open(&self.channel_dir, &name, Role::Requester)?;
        self.registry.register(channel);
        info!(channel = %name, "switched to dynamic channel");
        Ok(name)
    }

    /// Request one reading of `subject` at `time` on stream `stream`.
    ///
    /// The responder answers a failed lookup with NaN since the protocol
    /// has no error reply kind; that is surfaced here as an error rather
    /// than handed to the caller as a value.
    pub fn data_query(&self, subject: i32, time: f64, stream: i32) -> Result<f64> {
        let channel = self.registry.active();
        let request = Message::DataQuery {
            subject,
            time,
            stream,
        };
        channel.send(&request.encode())?;

        let reply = channel.recv_exact(8)?;
        let value = f64::from_le_bytes(to_array(&reply)?);
        if value.is_nan() {
            return Err(DuctworkError::Validation {
                field: "data_query".to_string(),
                message: format!("responder could not resolve subject {subject} at {time}"),
            });
        }
        debug!(subject, time, stream, value, "data reply");
        Ok(value)
    }

    /// Transfer the whole of file `name` from the responder into `sink`.
    ///
    /// Opens with the length probe (`offset == 0 && length == 0`), then
    /// requests chunks of at most `max_message` bytes back to back until
    /// the announced total is consumed. A zero-length file completes after
    /// the probe alone. Returns the number of bytes transferred.
    pub fn fetch_file(&self, name: &str, sink: &mut impl Write) -> Result<u64> {
        let channel = self.registry.active();

        let probe = Message::FileQuery {
            offset: 0,
            length: 0,
            name: name.to_string(),
        };
        channel.send(&probe.encode())?;
        let reply = channel.recv_exact(8)?;
        let total = i64::from_le_bytes(to_array(&reply)?);
        if total < 0 {
            return Err(DuctworkError::FileNotFound(PathBuf::from(name)));
        }
        info!(file = %name, total, "file transfer starting");

        let mut offset = 0i64;
        while offset < total {
            let length = (total - offset).min(self.max_message as i64);
            let request = Message::FileQuery {
                offset,
                length,
                name: name.to_string(),
            };
            channel.send(&request.encode())?;
            let chunk = channel.recv_exact(length as usize)?;
            sink.write_all(&chunk)
                .map_err(|e| DuctworkError::io_with_path(e, PathBuf::from(name)))?;
            offset += length;
        }

        info!(file = %name, bytes = total, "file transfer complete");
        Ok(total as u64)
    }

    /// Names of this requester's open channels, in creation order.
    pub fn channel_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Number of open channels, control included.
    pub fn channel_count(&self) -> usize {
        self.registry.len()
    }

    /// Disconnect: close dynamic channels newest-first, then quit and
    /// close the control channel.
    pub fn shutdown(self) -> Result<()> {
        self.registry.close_all()
    }
}

/// Fixed-size reply conversion; a length mismatch is a short read already
/// caught by the channel, so this only guards slice-to-array plumbing.
fn to_array<const N: usize>(buf: &[u8]) -> Result<[u8; N]> {
    buf.try_into().map_err(|_| DuctworkError::ShortRead {
        expected: N,
        actual: buf.len(),
    })
}
