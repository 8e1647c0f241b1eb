//! Outbound connections with per-destination reuse and bounded retry.

use crate::{ChannelId, Envelope, MessageType, P2pError};
use lattice_types::Peer;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

/// How many times a failed write is retried before giving up.
const SEND_ATTEMPTS: u32 = 5;

/// Outbound half of the p2p layer.
///
/// One TCP connection per destination address, lazily dialed and reused
/// until a write fails, in which case the connection is re-dialed on the
/// retry path. Messages to the local address are dropped (the local
/// replica feeds itself directly).
pub struct Sender {
    shard_map: Mutex<HashMap<String, Vec<Peer>>>,
    conns: Mutex<HashMap<String, TcpStream>>,
    retry_duration: Duration,
    my_addr: String,
}

impl Sender {
    /// Create a sender identified by the local `ip:port`.
    pub fn new(my_addr: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            shard_map: Mutex::new(HashMap::new()),
            conns: Mutex::new(HashMap::new()),
            retry_duration: Duration::from_millis(100),
            my_addr: my_addr.into(),
        })
    }

    /// Register a peer under each shard it serves.
    pub fn add_peer(&self, peer: &Peer) {
        let mut map = self.shard_map.lock();
        for chain in &peer.chains {
            let peers = map.entry(chain.clone()).or_default();
            if !peers.iter().any(|p| p.addr == peer.addr) {
                peers.push(peer.clone());
            }
        }
    }

    /// Pre-dial every registered peer, collecting the failures.
    pub fn start(&self) -> Result<(), P2pError> {
        let peers: Vec<Peer> = {
            let map = self.shard_map.lock();
            map.values().flatten().cloned().collect()
        };
        let mut errors: Vec<String> = Vec::new();
        let mut conns = self.conns.lock();
        for peer in peers {
            if peer.addr == self.my_addr || conns.contains_key(&peer.addr) {
                continue;
            }
            match TcpStream::connect(&peer.addr) {
                Ok(stream) => {
                    tracing::info!(peer = %peer.addr, "connected");
                    conns.insert(peer.addr.clone(), stream);
                }
                Err(e) => errors.push(format!("{}: {}", peer.addr, e)),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(P2pError::Envelope(errors.join("\n")))
        }
    }

    /// Close every connection.
    pub fn stop(&self) {
        let mut conns = self.conns.lock();
        for (_, conn) in conns.drain() {
            let _ = conn.shutdown(std::net::Shutdown::Both);
        }
    }

    /// Send one message to a single peer address.
    pub fn send(
        &self,
        addr: &str,
        channel: ChannelId,
        message: &[u8],
        message_type: MessageType,
    ) -> Result<(), P2pError> {
        if addr == self.my_addr {
            return Ok(());
        }
        let line = Envelope::new(channel, message.to_vec(), message_type).encode_line();
        self.dial_and_write(&line, addr, SEND_ATTEMPTS)
    }

    /// Fan a message out to every peer of a shard, each on its own
    /// thread (fire and forget, matching proposal broadcast).
    pub fn send_to_shard(
        self: &Arc<Self>,
        shard_id: &str,
        channel: ChannelId,
        message: &[u8],
        message_type: MessageType,
    ) {
        let peers: Vec<Peer> = {
            let map = self.shard_map.lock();
            map.get(shard_id).cloned().unwrap_or_default()
        };
        for peer in peers {
            let sender = self.clone();
            let message = message.to_vec();
            std::thread::spawn(move || {
                if let Err(e) = sender.send(&peer.addr, channel, &message, message_type) {
                    tracing::warn!(peer = %peer.addr, error = %e, "send failed");
                }
            });
        }
    }

    /// Send to the peer at `index` of a shard.
    pub fn send_to_shard_index(
        &self,
        shard_id: &str,
        index: usize,
        channel: ChannelId,
        message: &[u8],
        message_type: MessageType,
    ) -> Result<(), P2pError> {
        let addr = {
            let map = self.shard_map.lock();
            map.get(shard_id)
                .and_then(|peers| peers.get(index))
                .map(|peer| peer.addr.clone())
        };
        match addr {
            Some(addr) => self.send(&addr, channel, message, message_type),
            None => Err(P2pError::NoSuchPeer {
                shard: shard_id.to_string(),
                index,
            }),
        }
    }

    fn dial_and_write(&self, line: &[u8], addr: &str, attempts_left: u32) -> Result<(), P2pError> {
        match self.try_write(line, addr) {
            Ok(()) => Ok(()),
            Err(_) if attempts_left > 0 => {
                self.conns.lock().remove(addr);
                std::thread::sleep(self.retry_duration);
                self.dial_and_write(line, addr, attempts_left - 1)
            }
            Err(_) => Err(P2pError::SendFailed {
                addr: addr.to_string(),
                attempts: SEND_ATTEMPTS,
            }),
        }
    }

    /// Write one framed line over the reused (or freshly dialed)
    /// connection to `addr`.
    fn try_write(&self, line: &[u8], addr: &str) -> std::io::Result<()> {
        let mut conns = self.conns.lock();
        let stream = match conns.entry(addr.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let stream = TcpStream::connect(addr)?;
                tracing::info!(peer = %addr, "connected");
                entry.insert(stream)
            }
        };
        stream.write_all(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::net::TcpListener;

    fn peer(addr: &str, chain: &str) -> Peer {
        Peer {
            addr: addr.to_string(),
            chains: vec![chain.to_string()],
            pubkey: String::new(),
            vote: 1,
        }
    }

    #[test]
    fn test_send_frames_one_envelope_per_line() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            line
        });

        let sender = Sender::new("127.0.0.1:1");
        sender
            .send(&addr, ChannelId::ConsensusState, b"payload", MessageType::Vote)
            .unwrap();

        let line = handle.join().unwrap();
        let envelope = Envelope::decode_line(line.trim_end().as_bytes()).unwrap();
        assert_eq!(envelope.message, b"payload");
        assert_eq!(envelope.message_type, MessageType::Vote as u32);
    }

    #[test]
    fn test_send_to_self_is_dropped() {
        let sender = Sender::new("127.0.0.1:9");
        // No listener exists; a self-send must still succeed by no-op.
        assert!(sender
            .send("127.0.0.1:9", ChannelId::Mempool, b"x", MessageType::TxInsert)
            .is_ok());
    }

    #[test]
    fn test_send_to_shard_index_unknown_peer() {
        let sender = Sender::new("127.0.0.1:1");
        sender.add_peer(&peer("127.0.0.1:2", "s1"));
        let result = sender.send_to_shard_index(
            "s1",
            5,
            ChannelId::ConsensusState,
            b"x",
            MessageType::Part,
        );
        assert!(matches!(result, Err(P2pError::NoSuchPeer { .. })));
    }
}
