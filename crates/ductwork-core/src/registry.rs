//! Client-side bookkeeping of open channels and their teardown order.
//!
//! The registry is owned and mutated only by the client's single control
//! flow; it needs no locking. The control channel is registered first and
//! torn down last: dynamically created channels close in strict
//! reverse-of-open order, then exactly one `Quit` goes out on the control
//! channel before it closes.

use crate::channel::FifoChannel;
use crate::error::Result;
use crate::message::Message;
use tracing::{debug, info};

/// Ordered set of the requester's open channels.
pub struct ChannelRegistry {
    /// Control channel first; dynamic channels in creation order after it.
    channels: Vec<FifoChannel>,
}

impl ChannelRegistry {
    /// Create a registry rooted at the control channel.
    pub fn new(control: FifoChannel) -> Self {
        Self {
            channels: vec![control],
        }
    }

    /// Register a dynamically created channel. Later registrations close
    /// earlier during teardown.
    pub fn register(&mut self, channel: FifoChannel) {
        debug!(channel = channel.name(), "channel registered");
        self.channels.push(channel);
    }

    /// The channel requests should go out on: the most recently created
    /// one, falling back to the control channel.
    pub fn active(&self) -> &FifoChannel {
        self.channels.last().expect("registry always holds control")
    }

    /// The control channel.
    pub fn control(&self) -> &FifoChannel {
        &self.channels[0]
    }

    /// Number of open channels, control included.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        false // the control channel is always present
    }

    /// Names of open channels in creation order. Used by teardown tests
    /// and logging.
    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Tear everything down: close dynamic channels in reverse creation
    /// order, send one `Quit` on the control channel, close it.
    ///
    /// Consumes the registry; a best-effort close still runs on drop if the
    /// quit send fails.
    pub fn close_all(mut self) -> Result<()> {
        while self.channels.len() > 1 {
            let mut channel = self.channels.pop().expect("len checked above");
            info!(channel = channel.name(), "closing dynamic channel");
            channel.close();
        }

        let control = &self.channels[0];
        control.send(&Message::Quit.encode())?;
        info!(channel = control.name(), "quit sent on control channel");
        self.channels[0].close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Role;
    use crate::message::Message;
    use std::path::Path;
    use tempfile::TempDir;

    fn open_pair(dir: &Path, name: &str) -> (FifoChannel, FifoChannel) {
        let dir_clone = dir.to_path_buf();
        let name_clone = name.to_string();
        let responder = std::thread::spawn(move || {
            FifoChannel::open(&dir_clone, &name_clone, Role::Responder).unwrap()
        });
        let requester = FifoChannel::open(dir, name, Role::Requester).unwrap();
        (requester, responder.join().unwrap())
    }

    #[test]
    fn test_active_is_latest_registered() {
        let tmp = TempDir::new().unwrap();
        let (control, _control_peer) = open_pair(tmp.path(), "control");
        let (sub, _sub_peer) = open_pair(tmp.path(), "sub1");

        let mut registry = ChannelRegistry::new(control);
        assert_eq!(registry.active().name(), "control");
        registry.register(sub);
        assert_eq!(registry.active().name(), "sub1");
        assert_eq!(registry.names(), vec!["control", "sub1"]);
    }

    #[test]
    fn test_close_all_reverse_order_then_quit() {
        let tmp = TempDir::new().unwrap();
        let (control, control_peer) = open_pair(tmp.path(), "control");
        let (sub1, sub1_peer) = open_pair(tmp.path(), "sub1");
        let (sub2, sub2_peer) = open_pair(tmp.path(), "sub2");

        let mut registry = ChannelRegistry::new(control);
        registry.register(sub1);
        registry.register(sub2);

        // Observe teardown from the responder side: each peer sees EOF when
        // its channel closes, the control peer sees the Quit message.
        let watcher = std::thread::spawn(move || {
            let mut order = Vec::new();
            // sub2 closes before sub1
            assert!(sub2_peer.recv_message(64).is_err());
            order.push("sub2");
            assert!(sub1_peer.recv_message(64).is_err());
            order.push("sub1");
            let quit = control_peer.recv_message(64).unwrap();
            assert_eq!(Message::decode(&quit).unwrap(), Message::Quit);
            order.push("quit");
            order
        });

        registry.close_all().unwrap();
        assert_eq!(watcher.join().unwrap(), vec!["sub2", "sub1", "quit"]);
    }
}
