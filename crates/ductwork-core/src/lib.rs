//! Ductwork Core - Local request/response transport over POSIX FIFOs.
//!
//! Two cooperating processes on one host talk through named FIFO pairs: a
//! requester (client) sends fixed-layout requests, a responder (server)
//! answers them from its data and file stores. A mandatory control channel
//! bootstraps the session; private channels are negotiated dynamically and
//! torn down in reverse creation order.
//!
//! For the command-line endpoints, see the `ductwork-server` and
//! `ductwork-client` crates.
//!
//! # Example
//!
//! ```rust,ignore
//! use ductwork_core::Requester;
//!
//! fn main() -> ductwork_core::Result<()> {
//!     let mut requester = Requester::connect("/tmp/duct", 256)?;
//!
//!     // Move data traffic off the control channel.
//!     let name = requester.new_channel()?;
//!     println!("private channel: {name}");
//!
//!     let value = requester.data_query(7, 0.12, 1)?;
//!     println!("subject 7 at 0.12s: {value}");
//!
//!     requester.shutdown()
//! }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod pool;
pub mod registry;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use channel::{FifoChannel, Role};
pub use client::Requester;
pub use config::{ProtocolConfig, Settings};
pub use error::{DuctworkError, Result};
pub use message::Message;
pub use pool::{Task, ThreadPool};
pub use registry::ChannelRegistry;
pub use server::Responder;
pub use store::{DataStore, FileStore};
