//! Inbound connections: one accept thread, one reader thread per peer.

use crate::{ChannelId, Envelope, MessageType, P2pError, Reactor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

/// Inbound half of the p2p layer.
///
/// Envelopes are split on newlines, decoded, and handed to the reactor
/// registered for their channel. Reactor errors are logged and dropped;
/// they never tear the connection down.
pub struct Receiver {
    addr: String,
    reactors: Mutex<HashMap<ChannelId, Arc<dyn Reactor>>>,
}

impl Receiver {
    /// Create a receiver bound to `ip:port` on start.
    pub fn new(addr: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            addr: addr.into(),
            reactors: Mutex::new(HashMap::new()),
        })
    }

    /// Register the reactor for one channel.
    pub fn add_channel(&self, reactor: Arc<dyn Reactor>, channel: ChannelId) {
        self.reactors.lock().insert(channel, reactor);
    }

    /// Bind and start accepting. Returns once the listener is live;
    /// connection handling continues on background threads.
    pub fn start(self: &Arc<Self>) -> Result<(), P2pError> {
        let listener = TcpListener::bind(&self.addr)?;
        tracing::info!(addr = %self.addr, "receiver listening");

        let receiver = self.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let receiver = receiver.clone();
                        std::thread::spawn(move || receiver.serve_connection(stream));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
        });
        Ok(())
    }

    fn serve_connection(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "connection closed");
                    return;
                }
            };
            if line.is_empty() {
                continue;
            }
            if let Err(e) = self.dispatch(line.as_bytes()) {
                tracing::debug!(peer = %peer, error = %e, "message dropped");
            }
        }
    }

    fn dispatch(&self, line: &[u8]) -> Result<(), P2pError> {
        let envelope = Envelope::decode_line(line)?;
        let channel = ChannelId::try_from(envelope.channel_id)?;
        let message_type = MessageType::try_from(envelope.message_type)?;

        let reactor = self
            .reactors
            .lock()
            .get(&channel)
            .cloned()
            .ok_or(P2pError::UnknownChannel(envelope.channel_id))?;
        reactor.receive(channel, &envelope.message, message_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct Capture {
        tx: mpsc::Sender<(ChannelId, Vec<u8>, MessageType)>,
    }

    impl Reactor for Capture {
        fn receive(
            &self,
            channel: ChannelId,
            payload: &[u8],
            message_type: MessageType,
        ) -> Result<(), P2pError> {
            self.tx
                .send((channel, payload.to_vec(), message_type))
                .map_err(|e| P2pError::Reactor(e.to_string()))
        }
    }

    #[test]
    fn test_dispatch_routes_by_channel() {
        let receiver = Receiver::new("127.0.0.1:0");
        let (tx, rx) = mpsc::channel();
        receiver.add_channel(Arc::new(Capture { tx }), ChannelId::Mempool);

        let line = Envelope::new(ChannelId::Mempool, b"tx-bytes".to_vec(), MessageType::TxInsert)
            .encode_line();
        receiver.dispatch(&line[..line.len() - 1]).unwrap();

        let (channel, payload, message_type) = rx.try_recv().unwrap();
        assert_eq!(channel, ChannelId::Mempool);
        assert_eq!(payload, b"tx-bytes");
        assert_eq!(message_type, MessageType::TxInsert);
    }

    #[test]
    fn test_dispatch_unregistered_channel_errors() {
        let receiver = Receiver::new("127.0.0.1:0");
        let line = Envelope::new(ChannelId::ConsensusState, vec![], MessageType::Vote)
            .encode_line();
        assert!(matches!(
            receiver.dispatch(&line[..line.len() - 1]),
            Err(P2pError::UnknownChannel(1))
        ));
    }
}
