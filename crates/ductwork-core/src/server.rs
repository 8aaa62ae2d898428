//! Server-side dispatcher: serves the control channel, allocates dynamic
//! channels, and offloads request servicing to the thread pool.
//!
//! One dispatcher thread blocks reading each open channel; the actual data
//! and file resolution runs on pool workers so a slow file read on one
//! channel does not stall replies on another. The half-duplex protocol
//! guarantees at most one in-flight request per channel, so a worker can
//! write its reply without competing with anyone.
//!
//! The control loop is the sole channel-name allocator; concurrent
//! `NewChannel` requests are serialized by construction.
//!
//! # Failure signalling
//!
//! The protocol has no error reply kind. Two reply encodings stand in for
//! it where the reply domain has room: a missing file answers the length
//! probe with `-1`, and a failed data query answers with NaN. A failed
//! chunk read cannot be signalled at all; the worker logs it and the
//! session is abandoned.

use crate::channel::{FifoChannel, Role};
use crate::config::{ProtocolConfig, Settings};
use crate::error::{DuctworkError, Result};
use crate::message::{encode_channel_name, Message};
use crate::pool::ThreadPool;
use crate::store::{DataStore, FileStore};
use std::sync::Arc;
use std::thread::Scope;
use tracing::{debug, error, info, warn};

/// Length-probe reply for a file the responder cannot serve.
pub const LENGTH_UNAVAILABLE: i64 = -1;

/// The server side of the transport: stores, pool, and serving loops.
pub struct Responder {
    settings: Settings,
    data: DataStore,
    files: FileStore,
}

impl Responder {
    /// Build a responder over the configured store roots.
    pub fn new(settings: Settings) -> Result<Self> {
        let data = DataStore::open(&settings.data_root)?;
        let files = FileStore::open(&settings.file_root)?;
        Ok(Self {
            settings,
            data,
            files,
        })
    }

    /// Serve one client session.
    ///
    /// Opens the control channel (blocking until the client attaches),
    /// serves it until `Quit` or client disappearance, waits for all
    /// dynamic-channel dispatchers to finish, then drains and stops the
    /// pool. Channels close in the reverse of their creation order because
    /// the client tears its endpoints down that way and each dispatcher
    /// follows its peer.
    pub fn run(&self) -> Result<()> {
        info!(
            dir = %self.settings.channel_dir.display(),
            workers = self.settings.workers,
            max_message = self.settings.max_message,
            "responder starting"
        );

        std::fs::create_dir_all(&self.settings.channel_dir)
            .map_err(|e| DuctworkError::io_with_path(e, &self.settings.channel_dir))?;

        let control = Arc::new(FifoChannel::open(
            &self.settings.channel_dir,
            ProtocolConfig::CONTROL_CHANNEL,
            Role::Responder,
        )?);

        let mut pool = ThreadPool::new(self.settings.workers);

        let outcome = std::thread::scope(|scope| self.serve_control(scope, &pool, control));

        pool.stop();

        match outcome {
            Ok(()) => {
                info!("responder finished");
                Ok(())
            }
            Err(DuctworkError::TransportClosed { channel }) => {
                warn!(channel = %channel, "client vanished without quit");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Serve the control channel until `Quit`.
    fn serve_control<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        pool: &'scope ThreadPool,
        control: Arc<FifoChannel>,
    ) -> Result<()> {
        // Sole allocator; uniqueness holds even with concurrent clients of
        // the pool because only this loop hands out names.
        let mut next_channel = 1u64;

        loop {
            let raw = control.recv_message(self.settings.max_message)?;
            match Message::decode(&raw)? {
                Message::Quit => {
                    info!("quit received on control channel");
                    return Ok(());
                }
                Message::NewChannel => {
                    let name = format!("chan-{}-{}", std::process::id(), next_channel);
                    next_channel += 1;
                    self.open_dynamic_channel(scope, pool, &control, name)?;
                }
                request => self.dispatch(pool, &control, request),
            }
        }
    }

    /// Allocate a dynamic channel: start its dispatcher, then reply with
    /// the name so the client can attach.
    ///
    /// The dispatcher thread blocks opening the responder endpoint until
    /// the client opens its side; either side may create the FIFOs first.
    fn open_dynamic_channel<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        pool: &'scope ThreadPool,
        control: &FifoChannel,
        name: String,
    ) -> Result<()> {
        info!(channel = %name, "allocating dynamic channel");
        let reply = encode_channel_name(&name)?;

        scope.spawn(move || {
            let channel = match FifoChannel::open(&self.settings.channel_dir, &name, Role::Responder)
            {
                Ok(c) => Arc::new(c),
                Err(e) => {
                    error!(channel = %name, error = %e, "dynamic channel open failed");
                    return;
                }
            };
            self.serve_dynamic(pool, channel);
        });

        control.send(&reply)
    }

    /// Serve a dynamic channel until `Quit`, client close, or a protocol
    /// fault.
    fn serve_dynamic(&self, pool: &ThreadPool, channel: Arc<FifoChannel>) {
        let name = channel.name().to_string();
        loop {
            let raw = match channel.recv_message(self.settings.max_message) {
                Ok(raw) => raw,
                Err(DuctworkError::TransportClosed { .. }) => {
                    debug!(channel = %name, "client closed dynamic channel");
                    return;
                }
                Err(e) => {
                    error!(channel = %name, error = %e, "receive failed");
                    return;
                }
            };

            match Message::decode(&raw) {
                Ok(Message::Quit) => {
                    info!(channel = %name, "quit received");
                    return;
                }
                Ok(Message::NewChannel) => {
                    // Lifecycle negotiation belongs to the control channel.
                    error!(channel = %name, "NewChannel on dynamic channel; ending session");
                    return;
                }
                Ok(request) => self.dispatch(pool, &channel, request),
                Err(e) => {
                    error!(channel = %name, error = %e, "undecodable request; ending session");
                    return;
                }
            }
        }
    }

    /// Hand one data or file request to the pool; the worker writes the
    /// reply on the same channel.
    fn dispatch(&self, pool: &ThreadPool, channel: &Arc<FifoChannel>, request: Message) {
        let task_name = match &request {
            Message::DataQuery {
                subject, stream, ..
            } => format!("data-{}-{}-{}", channel.name(), subject, stream),
            Message::FileQuery { name, offset, .. } => {
                format!("file-{}-{}-{}", channel.name(), name, offset)
            }
            // Quit/NewChannel never reach here.
            _ => return,
        };

        let channel = channel.clone();
        let data = self.data.clone();
        let files = self.files.clone();
        let max_message = self.settings.max_message;

        let submitted = pool.submit(task_name.clone(), move || {
            if let Err(e) = answer(&channel, &data, &files, max_message, request) {
                error!(channel = channel.name(), error = %e, "reply failed");
            }
        });

        if let Err(e) = submitted {
            // Only possible during shutdown; the request is reported, not
            // silently dropped.
            error!(task = %task_name, error = %e, "submission rejected");
        }
    }
}

/// Resolve one request against the stores and write the reply.
fn answer(
    channel: &FifoChannel,
    data: &DataStore,
    files: &FileStore,
    max_message: usize,
    request: Message,
) -> Result<()> {
    match request {
        Message::DataQuery {
            subject,
            time,
            stream,
        } => {
            let value = match data.lookup(subject, time, stream) {
                Ok(v) => v,
                Err(e) => {
                    warn!(subject, time, stream, error = %e, "data query failed");
                    f64::NAN
                }
            };
            channel.send(&value.to_le_bytes())
        }
        Message::FileQuery {
            offset,
            length,
            name,
        } => {
            if offset == 0 && length == 0 {
                let total = match files.length(&name) {
                    Ok(len) => len,
                    Err(e) => {
                        warn!(file = %name, error = %e, "length probe failed");
                        LENGTH_UNAVAILABLE
                    }
                };
                channel.send(&total.to_le_bytes())
            } else {
                if length as usize > max_message {
                    return Err(DuctworkError::protocol(format!(
                        "chunk length {length} exceeds max message {max_message}"
                    )));
                }
                let chunk = files.read_chunk(&name, offset, length)?;
                channel.send(&chunk)
            }
        }
        // Handled by the serving loops.
        Message::Quit | Message::NewChannel => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_settings(tmp: &TempDir) -> Settings {
        let data_root = tmp.path().join("data");
        let file_root = tmp.path().join("files");
        std::fs::create_dir_all(&data_root).unwrap();
        std::fs::create_dir_all(&file_root).unwrap();
        Settings::default()
            .with_channel_dir(tmp.path().join("chan"))
            .with_data_root(data_root)
            .with_file_root(file_root)
    }

    fn open_pair(dir: &std::path::Path, name: &str) -> (FifoChannel, FifoChannel) {
        std::fs::create_dir_all(dir).unwrap();
        let dir_clone = dir.to_path_buf();
        let name_clone = name.to_string();
        let responder = std::thread::spawn(move || {
            FifoChannel::open(&dir_clone, &name_clone, Role::Responder).unwrap()
        });
        let requester = FifoChannel::open(dir, name, Role::Requester).unwrap();
        (requester, responder.join().unwrap())
    }

    #[test]
    fn test_answer_data_query() {
        let tmp = TempDir::new().unwrap();
        let settings = test_settings(&tmp);
        let mut f =
            std::fs::File::create(settings.data_root.join("7.csv")).unwrap();
        writeln!(f, "0.0,1.25,-1.25").unwrap();

        let data = DataStore::open(&settings.data_root).unwrap();
        let files = FileStore::open(&settings.file_root).unwrap();
        let (requester, responder) = open_pair(&settings.channel_dir, "t-data");

        let request = Message::DataQuery {
            subject: 7,
            time: 0.0,
            stream: 1,
        };
        answer(&responder, &data, &files, 256, request).unwrap();

        let reply = requester.recv_exact(8).unwrap();
        let value = f64::from_le_bytes(reply.try_into().unwrap());
        assert_eq!(value, 1.25);
    }

    #[test]
    fn test_answer_unknown_subject_is_nan() {
        let tmp = TempDir::new().unwrap();
        let settings = test_settings(&tmp);
        let data = DataStore::open(&settings.data_root).unwrap();
        let files = FileStore::open(&settings.file_root).unwrap();
        let (requester, responder) = open_pair(&settings.channel_dir, "t-nan");

        let request = Message::DataQuery {
            subject: 404,
            time: 0.0,
            stream: 1,
        };
        answer(&responder, &data, &files, 256, request).unwrap();

        let reply = requester.recv_exact(8).unwrap();
        assert!(f64::from_le_bytes(reply.try_into().unwrap()).is_nan());
    }

    #[test]
    fn test_answer_length_probe_and_missing_file() {
        let tmp = TempDir::new().unwrap();
        let settings = test_settings(&tmp);
        std::fs::write(settings.file_root.join("a.bin"), vec![1u8; 2500]).unwrap();

        let data = DataStore::open(&settings.data_root).unwrap();
        let files = FileStore::open(&settings.file_root).unwrap();
        let (requester, responder) = open_pair(&settings.channel_dir, "t-probe");

        let probe = Message::FileQuery {
            offset: 0,
            length: 0,
            name: "a.bin".to_string(),
        };
        answer(&responder, &data, &files, 256, probe).unwrap();
        let total =
            i64::from_le_bytes(requester.recv_exact(8).unwrap().try_into().unwrap());
        assert_eq!(total, 2500);

        let probe = Message::FileQuery {
            offset: 0,
            length: 0,
            name: "missing.bin".to_string(),
        };
        answer(&responder, &data, &files, 256, probe).unwrap();
        let total =
            i64::from_le_bytes(requester.recv_exact(8).unwrap().try_into().unwrap());
        assert_eq!(total, LENGTH_UNAVAILABLE);
    }

    #[test]
    fn test_answer_rejects_oversize_chunk() {
        let tmp = TempDir::new().unwrap();
        let settings = test_settings(&tmp);
        std::fs::write(settings.file_root.join("a.bin"), vec![1u8; 64]).unwrap();

        let data = DataStore::open(&settings.data_root).unwrap();
        let files = FileStore::open(&settings.file_root).unwrap();
        let (_requester, responder) = open_pair(&settings.channel_dir, "t-big");

        let request = Message::FileQuery {
            offset: 0,
            length: 1024,
            name: "a.bin".to_string(),
        };
        let err = answer(&responder, &data, &files, 256, request).unwrap_err();
        assert!(matches!(err, DuctworkError::Protocol { .. }));
    }
}
