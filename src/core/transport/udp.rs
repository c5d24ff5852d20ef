//! UDP client and server links
//!
//! Sockets are created through `socket2` so broadcast, address reuse and
//! multicast membership can be set before binding.

use super::{
    Delivered, Link, LinkEvent, MulticastConfig, PeerId, Target, TransportError, UdpClientConfig,
    UdpServerConfig,
};
use async_trait::async_trait;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

const DATAGRAM_BUFFER: usize = 65536;

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let target = format!("{host}:{port}");
    let addr = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| TransportError::from_connect(&target, e))?
        .next();
    addr.ok_or_else(|| TransportError::ConnectionFailed(format!("{target}: no address")))
}

fn udp_socket(
    bind: SocketAddr,
    broadcast: bool,
    multicast: Option<&MulticastConfig>,
) -> Result<UdpSocket, TransportError> {
    let domain = if bind.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    if broadcast {
        socket.set_broadcast(true)?;
    }
    if multicast.is_some() {
        socket.set_reuse_address(true)?;
    }

    socket
        .bind(&bind.into())
        .map_err(|e| TransportError::from_connect(&bind.to_string(), e))?;

    if let Some(m) = multicast {
        socket.join_multicast_v4(&m.group, &m.interface)?;
        socket.set_multicast_loop_v4(true)?;
    }

    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Open a UDP client socket on an ephemeral port
pub async fn open_client(config: UdpClientConfig) -> Result<Box<dyn Link>, TransportError> {
    let remote = resolve(&config.host, config.port).await?;
    let bind: SocketAddr = if remote.is_ipv6() {
        "[::]:0".parse().map_err(|_| TransportError::InvalidConfiguration("bind".into()))?
    } else {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
    };
    let socket = udp_socket(bind, config.broadcast, None)?;

    Ok(Box::new(UdpClientLink {
        socket,
        remote,
        buffer: vec![0; DATAGRAM_BUFFER],
    }))
}

struct UdpClientLink {
    socket: UdpSocket,
    remote: SocketAddr,
    buffer: Vec<u8>,
}

#[async_trait]
impl Link for UdpClientLink {
    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        match self.socket.recv_from(&mut self.buffer).await {
            Ok((n, from)) => Ok(LinkEvent::Data {
                from: from.to_string(),
                peer: None,
                bytes: Bytes::copy_from_slice(&self.buffer[..n]),
            }),
            // ICMP port unreachable surfaces here on some platforms
            Err(e) => Ok(LinkEvent::Warning(format!("receive failed: {e}"))),
        }
    }

    async fn write(&mut self, _target: Target, bytes: &Bytes) -> Result<Vec<Delivered>, TransportError> {
        self.socket.send_to(bytes, self.remote).await?;
        Ok(vec![Delivered::remote(self.remote.to_string())])
    }

    fn describe(&self) -> String {
        match self.socket.local_addr() {
            Ok(local) => format!("{} -> {}", local, self.remote),
            Err(_) => self.remote.to_string(),
        }
    }
}

/// Bind a UDP server; peers are learned from incoming datagrams
pub async fn open_server(config: UdpServerConfig) -> Result<Box<dyn Link>, TransportError> {
    let bind = resolve(&config.bind_host, config.port).await?;
    let socket = udp_socket(bind, false, config.multicast.as_ref())?;
    let group = config
        .multicast
        .as_ref()
        .map(|m| SocketAddr::V4(SocketAddrV4::new(m.group, config.port)));

    Ok(Box::new(UdpServerLink {
        socket,
        group,
        peers: PeerTable::new(config.max_peers, Duration::from_secs(config.peer_idle_secs)),
        pending: VecDeque::new(),
        buffer: vec![0; DATAGRAM_BUFFER],
    }))
}

/// Peers learned from datagram sources, bounded in size and idle time
struct PeerTable {
    max_peers: usize,
    idle: Duration,
    by_id: HashMap<PeerId, (SocketAddr, Instant)>,
    by_address: HashMap<SocketAddr, PeerId>,
    next_id: u64,
}

impl PeerTable {
    fn new(max_peers: usize, idle: Duration) -> Self {
        Self {
            max_peers: max_peers.max(1),
            idle,
            by_id: HashMap::new(),
            by_address: HashMap::new(),
            next_id: 1,
        }
    }

    /// Note a datagram from `address`. Returns the peer id and whether the
    /// peer is new; peers forgotten to make room land in `evicted`.
    fn touch(&mut self, address: SocketAddr, now: Instant, evicted: &mut Vec<PeerId>) -> (PeerId, bool) {
        if let Some(&id) = self.by_address.get(&address) {
            if let Some(entry) = self.by_id.get_mut(&id) {
                entry.1 = now;
            }
            return (id, false);
        }

        let idle: Vec<PeerId> = self
            .by_id
            .iter()
            .filter(|(_, (_, seen))| now.saturating_duration_since(*seen) >= self.idle)
            .map(|(id, _)| *id)
            .collect();
        for id in idle {
            self.remove(id);
            evicted.push(id);
        }
        while self.by_id.len() >= self.max_peers {
            let Some(oldest) = self.by_id.iter().min_by_key(|(_, (_, seen))| *seen).map(|(id, _)| *id) else {
                break;
            };
            self.remove(oldest);
            evicted.push(oldest);
        }

        let id = PeerId(self.next_id);
        self.next_id += 1;
        self.by_id.insert(id, (address, now));
        self.by_address.insert(address, id);
        (id, true)
    }

    fn get(&self, id: PeerId) -> Option<SocketAddr> {
        self.by_id.get(&id).map(|(address, _)| *address)
    }

    fn remove(&mut self, id: PeerId) -> Option<SocketAddr> {
        let (address, _) = self.by_id.remove(&id)?;
        self.by_address.remove(&address);
        Some(address)
    }

    fn all(&self) -> Vec<(PeerId, SocketAddr)> {
        self.by_id.iter().map(|(id, (address, _))| (*id, *address)).collect()
    }
}

struct UdpServerLink {
    socket: UdpSocket,
    group: Option<SocketAddr>,
    peers: PeerTable,
    pending: VecDeque<LinkEvent>,
    buffer: Vec<u8>,
}

impl UdpServerLink {
    fn forget(&mut self, id: PeerId, reason: String) {
        if let Some(address) = self.peers.remove(id) {
            self.pending
                .push_back(LinkEvent::Warning(format!("peer {address}: {reason}")));
            self.pending.push_back(LinkEvent::PeerDisconnected(id));
        }
    }
}

#[async_trait]
impl Link for UdpServerLink {
    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }

        let (n, from) = match self.socket.recv_from(&mut self.buffer).await {
            Ok(received) => received,
            Err(e) => return Ok(LinkEvent::Warning(format!("receive failed: {e}"))),
        };
        let mut evicted = Vec::new();
        let (id, new) = self.peers.touch(from, Instant::now(), &mut evicted);
        let data = LinkEvent::Data {
            from: from.to_string(),
            peer: Some(id),
            bytes: Bytes::copy_from_slice(&self.buffer[..n]),
        };
        if !new {
            return Ok(data);
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "forgetting UDP peers");
        }
        let connected = LinkEvent::PeerConnected {
            id,
            address: from.to_string(),
        };
        let mut evicted = evicted.into_iter().map(LinkEvent::PeerDisconnected);
        match evicted.next() {
            Some(first) => {
                self.pending.extend(evicted);
                self.pending.push_back(connected);
                self.pending.push_back(data);
                Ok(first)
            }
            None => {
                self.pending.push_back(data);
                Ok(connected)
            }
        }
    }

    async fn write(&mut self, target: Target, bytes: &Bytes) -> Result<Vec<Delivered>, TransportError> {
        let mut targets: Vec<(Option<PeerId>, SocketAddr)> = match target {
            Target::Broadcast => self.peers.all().into_iter().map(|(id, addr)| (Some(id), addr)).collect(),
            Target::Peer(id) => match self.peers.get(id) {
                Some(addr) => vec![(Some(id), addr)],
                None => {
                    self.pending
                        .push_back(LinkEvent::Warning(format!("no such peer {id}")));
                    Vec::new()
                }
            },
        };
        if let (Target::Broadcast, Some(group)) = (target, self.group) {
            targets.push((None, group));
        }

        let mut delivered = Vec::with_capacity(targets.len());
        for (peer, address) in targets {
            match self.socket.send_to(bytes, address).await {
                Ok(_) => delivered.push(Delivered {
                    peer,
                    to: address.to_string(),
                }),
                Err(e) => match peer {
                    Some(id) => self.forget(id, e.to_string()),
                    None => self
                        .pending
                        .push_back(LinkEvent::Warning(format!("send to {address} failed: {e}"))),
                },
            }
        }
        Ok(delivered)
    }

    fn describe(&self) -> String {
        let local = self
            .socket
            .local_addr()
            .map_or_else(|_| "?".to_string(), |a| a.to_string());
        match self.group {
            Some(group) => format!("listening on {local}, group {}", group.ip()),
            None => format!("listening on {local}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn test_peer_table_reuses_known_source() {
        let mut table = PeerTable::new(8, Duration::from_secs(60));
        let now = Instant::now();
        let mut evicted = Vec::new();

        let (first, new) = table.touch(addr(1000), now, &mut evicted);
        assert!(new);
        assert_eq!(table.touch(addr(1000), now, &mut evicted), (first, false));
        let (second, new) = table.touch(addr(1001), now, &mut evicted);
        assert!(new);
        assert_ne!(first, second);
        assert!(evicted.is_empty());
        assert_eq!(table.get(second), Some(addr(1001)));
    }

    #[test]
    fn test_peer_table_cap_drops_least_recent() {
        let mut table = PeerTable::new(2, Duration::from_secs(60));
        let start = Instant::now();
        let mut evicted = Vec::new();

        let (a, _) = table.touch(addr(1), start, &mut evicted);
        let (b, _) = table.touch(addr(2), start + Duration::from_secs(1), &mut evicted);
        // a is heard again, so b becomes the least recent
        table.touch(addr(1), start + Duration::from_secs(2), &mut evicted);
        let (c, _) = table.touch(addr(3), start + Duration::from_secs(3), &mut evicted);

        assert_eq!(evicted, vec![b]);
        assert_eq!(table.all().len(), 2);
        assert_eq!(table.get(a), Some(addr(1)));
        assert_eq!(table.get(c), Some(addr(3)));
        assert_eq!(table.get(b), None);
    }

    #[test]
    fn test_peer_table_expires_idle() {
        let mut table = PeerTable::new(16, Duration::from_secs(10));
        let start = Instant::now();
        let mut evicted = Vec::new();

        let (stale, _) = table.touch(addr(1), start, &mut evicted);
        let (fresh, _) = table.touch(addr(2), start + Duration::from_secs(8), &mut evicted);
        table.touch(addr(3), start + Duration::from_secs(12), &mut evicted);

        assert_eq!(evicted, vec![stale]);
        assert_eq!(table.get(fresh), Some(addr(2)));
        assert!(table.remove(stale).is_none());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let resolved = resolve("127.0.0.1", 7).await.unwrap();
        assert_eq!(resolved, addr(7));
    }
}
