//! Centralized configuration for the ductwork transport.
//!
//! Protocol constants live in const-holder structs; per-process knobs live
//! in [`Settings`], which layers environment overrides over defaults and is
//! further layered on by the binaries' command-line flags.

use crate::error::{DuctworkError, Result};
use std::path::PathBuf;

/// Wire-protocol constants shared by both endpoints.
///
/// Both processes are compiled from this definition; the protocol never
/// negotiates these at runtime (apart from `MAX_MESSAGE`, which the client
/// passes to the server it spawns).
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Current wire layout version. Bump when the encoding in
    /// `message.rs` changes shape.
    pub const WIRE_VERSION: u32 = 1;

    /// Default maximum message size in bytes. Bounds a single request write
    /// and a single file chunk reply.
    pub const MAX_MESSAGE: usize = 256;

    /// Fixed size of the new-channel name reply buffer. The name is
    /// NUL-padded to exactly this many bytes so the receiver always knows
    /// the receive length.
    pub const CHANNEL_NAME_LEN: usize = 64;

    /// Name of the mandatory control channel.
    pub const CONTROL_CHANNEL: &'static str = "control";

    /// Sampling interval of the data store rows, in seconds.
    pub const SAMPLE_INTERVAL: f64 = 0.004;
}

/// Per-process runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory the FIFO pairs live in. Both processes must agree.
    pub channel_dir: PathBuf,
    /// Maximum message size; requests and file chunks never exceed this.
    pub max_message: usize,
    /// Server-side worker thread count.
    pub workers: usize,
    /// Root directory of the per-subject CSV data set.
    pub data_root: PathBuf,
    /// Root directory served for file queries.
    pub file_root: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel_dir: PathBuf::from("."),
            max_message: ProtocolConfig::MAX_MESSAGE,
            workers: 4,
            data_root: PathBuf::from("data"),
            file_root: PathBuf::from("files"),
        }
    }
}

impl Settings {
    /// Build settings from defaults plus environment overrides.
    ///
    /// Recognized variables: `DUCTWORK_CHANNEL_DIR`, `DUCTWORK_MAX_MESSAGE`.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Ok(dir) = std::env::var("DUCTWORK_CHANNEL_DIR") {
            settings.channel_dir = PathBuf::from(dir);
        }

        if let Ok(raw) = std::env::var("DUCTWORK_MAX_MESSAGE") {
            let max = raw.parse::<usize>().map_err(|_| DuctworkError::Config {
                message: format!("DUCTWORK_MAX_MESSAGE is not a valid size: {raw:?}"),
            })?;
            settings = settings.with_max_message(max)?;
        }

        Ok(settings)
    }

    /// Set the channel directory.
    pub fn with_channel_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.channel_dir = dir.into();
        self
    }

    /// Set the maximum message size.
    ///
    /// Rejects sizes too small to hold a request header or larger than
    /// `PIPE_BUF` (4096 on Linux), beyond which single-write atomicity no
    /// longer holds for request framing.
    pub fn with_max_message(mut self, max: usize) -> Result<Self> {
        if !(32..=4096).contains(&max) {
            return Err(DuctworkError::Config {
                message: format!("max message size {max} outside supported range 32..=4096"),
            });
        }
        self.max_message = max;
        Ok(self)
    }

    /// Set the worker thread count.
    pub fn with_workers(mut self, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(DuctworkError::Config {
                message: "worker count must be at least 1".to_string(),
            });
        }
        self.workers = workers;
        Ok(self)
    }

    /// Set the data store root.
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }

    /// Set the file store root.
    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = root.into();
        self
    }
}
