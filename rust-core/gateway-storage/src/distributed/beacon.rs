// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Discovery beacon for the embedded distributed store.
//
// A short-interval UDP heartbeat, separate from the consensus transport. A
// fresh node uses it to find existing cluster members before the engine
// forms or joins a replication group; a bootstrap node uses it to announce
// itself. The beacon lives only as long as the engine it serves.
//
// The socket is bound without address reuse, so only one beacon can hold a
// given `bind_addr`. Nodes sharing a host need distinct bind ports.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::BeaconConfig;

/// Heartbeat payload, JSON-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconMessage {
    pub node_id: String,
    pub raft_addr: String,
    pub http_addr: String,
    /// Unix milliseconds at send time.
    pub sent_at: i64,
}

/// A node heard on the beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub node_id: String,
    pub raft_addr: String,
    pub http_addr: String,
    /// Where the last heartbeat came from.
    pub seen_from: SocketAddr,
    pub last_seen: i64,
}

/// A running heartbeat sender + listener.
#[derive(Debug)]
pub struct Beacon {
    node_id: String,
    local_addr: SocketAddr,
    peers: Arc<RwLock<HashMap<String, PeerInfo>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Beacon {
    /// Bind the beacon socket and start heartbeating `announce`.
    pub async fn start(config: &BeaconConfig, announce: BeaconMessage) -> std::io::Result<Self> {
        let bind_addr = config.bind_addr();
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                std::io::Error::new(
                    e.kind(),
                    format!(
                        "beacon port {bind_addr} is held by another process; \
                         give each node on this host its own beacon.bind_addr"
                    ),
                )
            } else {
                e
            }
        })?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let peers = Arc::new(RwLock::new(HashMap::new()));
        let node_id = announce.node_id.clone();

        let sender = tokio::spawn(send_loop(
            Arc::clone(&socket),
            config.announce_addr(),
            config.interval(),
            announce,
        ));
        let listener = tokio::spawn(listen_loop(socket, node_id.clone(), Arc::clone(&peers)));

        info!(%local_addr, announce = %config.announce_addr(), node_id = %node_id, "beacon started");

        Ok(Self {
            node_id,
            local_addr,
            peers,
            tasks: Mutex::new(vec![sender, listener]),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peers heard so far, ordered by node id.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.peers.read().await.values().cloned().collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        peers
    }

    /// Stop heartbeating and listening. Idempotent.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        debug!(node_id = %self.node_id, "beacon stopped");
    }

    pub fn is_running(&self) -> bool {
        !self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_empty()
    }
}

impl Drop for Beacon {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    every: std::time::Duration,
    mut message: BeaconMessage,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        message.sent_at = chrono::Utc::now().timestamp_millis();
        let payload = match serde_json::to_vec(&message) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode beacon heartbeat");
                continue;
            }
        };
        if let Err(e) = socket.send_to(&payload, target).await {
            debug!(%target, error = %e, "beacon heartbeat not sent");
        }
    }
}

async fn listen_loop(
    socket: Arc<UdpSocket>,
    own_id: String,
    peers: Arc<RwLock<HashMap<String, PeerInfo>>>,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "beacon receive failed");
                continue;
            }
        };
        let message: BeaconMessage = match serde_json::from_slice(&buf[..len]) {
            Ok(m) => m,
            Err(e) => {
                debug!(%from, error = %e, "ignoring malformed beacon heartbeat");
                continue;
            }
        };
        if message.node_id == own_id {
            continue;
        }
        let mut peers = peers.write().await;
        if !peers.contains_key(&message.node_id) {
            info!(peer = %message.node_id, raft_addr = %message.raft_addr, "discovered peer");
        }
        peers.insert(
            message.node_id.clone(),
            PeerInfo {
                node_id: message.node_id,
                raft_addr: message.raft_addr,
                http_addr: message.http_addr,
                seen_from: from,
                last_seen: message.sent_at,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_config(announce: SocketAddr) -> BeaconConfig {
        BeaconConfig {
            bind_addr: Some("127.0.0.1:0".parse().unwrap()),
            announce_addr: Some(announce),
            interval_ms: Some(20),
        }
    }

    fn message(id: &str) -> BeaconMessage {
        BeaconMessage {
            node_id: id.to_string(),
            raft_addr: "127.0.0.1:12000".to_string(),
            http_addr: "127.0.0.1:11000".to_string(),
            sent_at: 0,
        }
    }

    #[tokio::test]
    async fn test_beacon_discovers_announcing_peer() {
        let quiet_target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let listener = Beacon::start(&local_config(quiet_target), message("node-a"))
            .await
            .unwrap();
        let talker = Beacon::start(&local_config(listener.local_addr()), message("node-b"))
            .await
            .unwrap();

        let mut found = Vec::new();
        for _ in 0..100 {
            found = listener.peers().await;
            if !found.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node_id, "node-b");
        assert_eq!(found[0].seen_from, talker.local_addr());
        talker.stop();
    }

    #[tokio::test]
    async fn test_beacon_ignores_itself() {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        drop(socket);

        let config = BeaconConfig {
            bind_addr: Some(addr),
            announce_addr: Some(addr),
            interval_ms: Some(10),
        };
        let beacon = Beacon::start(&config, message("solo")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(beacon.peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_occupied_bind_addr_names_the_setting() {
        let holder = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = BeaconConfig {
            bind_addr: Some(holder.local_addr().unwrap()),
            announce_addr: Some("127.0.0.1:9".parse().unwrap()),
            interval_ms: Some(20),
        };
        let err = Beacon::start(&config, message("second")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
        assert!(err.to_string().contains("beacon.bind_addr"));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let beacon = Beacon::start(&local_config("127.0.0.1:9".parse().unwrap()), message("x"))
            .await
            .unwrap();
        assert!(beacon.is_running());
        beacon.stop();
        beacon.stop();
        assert!(!beacon.is_running());
    }
}
