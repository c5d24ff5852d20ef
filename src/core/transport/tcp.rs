//! TCP client and server links

use super::{
    Delivered, Link, LinkEvent, PeerId, Target, TcpClientConfig, TcpServerConfig, TransportError,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};

const READ_BUFFER: usize = 4096;
const INBOUND_QUEUE: usize = 256;

/// Connect a TCP client
pub async fn open_client(config: TcpClientConfig) -> Result<Box<dyn Link>, TransportError> {
    let addr = format!("{}:{}", config.host, config.port);

    let stream = tokio::time::timeout(
        Duration::from_secs(config.timeout_secs),
        TcpStream::connect(&addr),
    )
    .await
    .map_err(|_| TransportError::Timeout(config.timeout_secs))?
    .map_err(|e| TransportError::from_connect(&addr, e))?;

    stream.set_nodelay(true)?;
    let local = stream.local_addr()?;
    let remote = stream.peer_addr()?;
    let (reader, writer) = stream.into_split();

    Ok(Box::new(TcpClientLink {
        local,
        remote,
        reader,
        writer,
        buffer: BytesMut::with_capacity(READ_BUFFER),
    }))
}

struct TcpClientLink {
    local: SocketAddr,
    remote: SocketAddr,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    buffer: BytesMut,
}

#[async_trait]
impl Link for TcpClientLink {
    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        self.buffer.reserve(READ_BUFFER);
        let n = self.reader.read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(TransportError::Disconnected);
        }
        Ok(LinkEvent::Data {
            from: self.remote.to_string(),
            peer: None,
            bytes: self.buffer.split().freeze(),
        })
    }

    async fn write(&mut self, _target: Target, bytes: &Bytes) -> Result<Vec<Delivered>, TransportError> {
        self.writer.write_all(bytes).await?;
        Ok(vec![Delivered::remote(self.remote.to_string())])
    }

    async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }

    fn describe(&self) -> String {
        format!("{} -> {}", self.local, self.remote)
    }
}

/// Bind a TCP server
pub async fn open_server(config: TcpServerConfig) -> Result<Box<dyn Link>, TransportError> {
    let addr = format!("{}:{}", config.bind_host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| TransportError::from_connect(&addr, e))?;
    let local = listener.local_addr()?;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

    Ok(Box::new(TcpServerLink {
        local,
        listener,
        peers: HashMap::new(),
        readers: JoinSet::new(),
        inbound_tx,
        inbound_rx,
        pending: VecDeque::new(),
        next_id: 1,
    }))
}

enum Inbound {
    Data(PeerId, Bytes),
    Closed(PeerId, Option<std::io::Error>),
}

struct Peer {
    address: SocketAddr,
    writer: OwnedWriteHalf,
    reader: AbortHandle,
}

struct TcpServerLink {
    local: SocketAddr,
    listener: TcpListener,
    peers: HashMap<PeerId, Peer>,
    readers: JoinSet<()>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
    pending: VecDeque<LinkEvent>,
    next_id: u64,
}

impl TcpServerLink {
    fn accept(&mut self, stream: TcpStream, address: SocketAddr) -> LinkEvent {
        let id = PeerId(self.next_id);
        self.next_id += 1;

        let _ = stream.set_nodelay(true);
        let (mut reader, writer) = stream.into_split();
        let tx = self.inbound_tx.clone();
        let handle = self.readers.spawn(async move {
            let mut buffer = BytesMut::with_capacity(READ_BUFFER);
            loop {
                buffer.reserve(READ_BUFFER);
                match reader.read_buf(&mut buffer).await {
                    Ok(0) => {
                        let _ = tx.send(Inbound::Closed(id, None)).await;
                        break;
                    }
                    Ok(_) => {
                        if tx.send(Inbound::Data(id, buffer.split().freeze())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Inbound::Closed(id, Some(e))).await;
                        break;
                    }
                }
            }
        });

        self.peers.insert(
            id,
            Peer {
                address,
                writer,
                reader: handle,
            },
        );
        LinkEvent::PeerConnected {
            id,
            address: address.to_string(),
        }
    }

    fn drop_peer(&mut self, id: PeerId, reason: Option<String>) {
        if let Some(peer) = self.peers.remove(&id) {
            peer.reader.abort();
            if let Some(reason) = reason {
                self.pending
                    .push_back(LinkEvent::Warning(format!("peer {}: {}", peer.address, reason)));
            }
            self.pending.push_back(LinkEvent::PeerDisconnected(id));
        }
    }
}

#[async_trait]
impl Link for TcpServerLink {
    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, address)) => return Ok(self.accept(stream, address)),
                    Err(e) => return Ok(LinkEvent::Warning(format!("accept failed: {e}"))),
                },
                Some(inbound) = self.inbound_rx.recv() => match inbound {
                    Inbound::Data(id, bytes) => {
                        if let Some(peer) = self.peers.get(&id) {
                            return Ok(LinkEvent::Data {
                                from: peer.address.to_string(),
                                peer: Some(id),
                                bytes,
                            });
                        }
                    }
                    Inbound::Closed(id, err) => self.drop_peer(id, err.map(|e| e.to_string())),
                },
                Some(_) = self.readers.join_next(), if !self.readers.is_empty() => {}
            }
        }
    }

    async fn write(&mut self, target: Target, bytes: &Bytes) -> Result<Vec<Delivered>, TransportError> {
        let ids: Vec<PeerId> = match target {
            Target::Broadcast => self.peers.keys().copied().collect(),
            Target::Peer(id) => vec![id],
        };

        let mut delivered = Vec::with_capacity(ids.len());
        let mut failed = Vec::new();
        for id in ids {
            let Some(peer) = self.peers.get_mut(&id) else {
                self.pending
                    .push_back(LinkEvent::Warning(format!("no such peer {id}")));
                continue;
            };
            match peer.writer.write_all(bytes).await {
                Ok(()) => delivered.push(Delivered {
                    peer: Some(id),
                    to: peer.address.to_string(),
                }),
                Err(e) => failed.push((id, e.to_string())),
            }
        }

        for (id, reason) in failed {
            self.drop_peer(id, Some(reason));
        }
        Ok(delivered)
    }

    async fn shutdown(&mut self) {
        self.readers.abort_all();
        for (_, mut peer) in self.peers.drain() {
            let _ = peer.writer.shutdown().await;
        }
        self.pending.clear();
    }

    fn describe(&self) -> String {
        format!("listening on {}", self.local)
    }
}
