//! WebSocket client and server links

use super::{
    Delivered, Link, LinkEvent, PeerId, Target, TransportError, WebSocketClientConfig,
    WebSocketMessageType, WebSocketServerConfig,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const INBOUND_QUEUE: usize = 256;

fn outgoing(message_type: WebSocketMessageType, bytes: &Bytes) -> Message {
    match message_type {
        WebSocketMessageType::Binary => Message::binary(bytes.clone()),
        WebSocketMessageType::Text => Message::text(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Payload of a data frame, `None` for control frames
fn incoming(message: Message) -> Option<Bytes> {
    match message {
        Message::Binary(data) => Some(data),
        Message::Text(text) => Some(Bytes::copy_from_slice(text.as_str().as_bytes())),
        _ => None,
    }
}

/// `Basic` authorization header value
fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
}

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect a WebSocket client
pub async fn open_client(config: WebSocketClientConfig) -> Result<Box<dyn Link>, TransportError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidConfiguration(format!("{}: {e}", config.url)))?;

    if let Some(username) = &config.username {
        let value = basic_auth(username, config.password.as_deref().unwrap_or_default());
        let value = HeaderValue::from_str(&value)
            .map_err(|e| TransportError::InvalidConfiguration(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {e}", config.url)))?;
    let (sink, stream) = stream.split();

    Ok(Box::new(WebSocketClientLink {
        url: config.url,
        message_type: config.message_type,
        sink,
        stream,
    }))
}

struct WebSocketClientLink {
    url: String,
    message_type: WebSocketMessageType,
    sink: SplitSink<ClientStream, Message>,
    stream: SplitStream<ClientStream>,
}

#[async_trait]
impl Link for WebSocketClientLink {
    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Disconnected),
                Some(Ok(message)) => {
                    if let Some(bytes) = incoming(message) {
                        return Ok(LinkEvent::Data {
                            from: self.url.clone(),
                            peer: None,
                            bytes,
                        });
                    }
                }
                Some(Err(e)) => return Err(TransportError::ReceiveError(e.to_string())),
            }
        }
    }

    async fn write(&mut self, _target: Target, bytes: &Bytes) -> Result<Vec<Delivered>, TransportError> {
        self.sink
            .send(outgoing(self.message_type, bytes))
            .await
            .map_err(|e| TransportError::SendError(e.to_string()))?;
        Ok(vec![Delivered::remote(self.url.clone())])
    }

    async fn shutdown(&mut self) {
        let _ = self.sink.close().await;
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

type ServerSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Bind a WebSocket server
pub async fn open_server(config: WebSocketServerConfig) -> Result<Box<dyn Link>, TransportError> {
    let addr = format!("{}:{}", config.bind_host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| TransportError::from_connect(&addr, e))?;
    let local = listener.local_addr()?;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

    Ok(Box::new(WebSocketServerLink {
        local,
        message_type: config.message_type,
        listener,
        peers: HashMap::new(),
        handshakes: HashMap::new(),
        sessions: JoinSet::new(),
        inbound_tx,
        inbound_rx,
        pending: VecDeque::new(),
        next_id: 1,
    }))
}

enum Inbound {
    Ready(PeerId, ServerSink),
    Rejected(PeerId, String),
    Data(PeerId, Bytes),
    Closed(PeerId, Option<String>),
}

struct Peer {
    address: SocketAddr,
    sink: ServerSink,
    session: AbortHandle,
}

struct WebSocketServerLink {
    local: SocketAddr,
    message_type: WebSocketMessageType,
    listener: TcpListener,
    peers: HashMap<PeerId, Peer>,
    handshakes: HashMap<PeerId, (SocketAddr, AbortHandle)>,
    sessions: JoinSet<()>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
    pending: VecDeque<LinkEvent>,
    next_id: u64,
}

/// Handshake, then forward frames until the peer goes away
async fn serve_peer(id: PeerId, stream: TcpStream, tx: mpsc::Sender<Inbound>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            let _ = tx.send(Inbound::Rejected(id, e.to_string())).await;
            return;
        }
    };
    let (sink, mut stream) = ws.split();
    if tx.send(Inbound::Ready(id, sink)).await.is_err() {
        return;
    }

    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Close(_))) | None => break None,
            Some(Ok(message)) => {
                if let Some(bytes) = incoming(message) {
                    if tx.send(Inbound::Data(id, bytes)).await.is_err() {
                        return;
                    }
                }
            }
            Some(Err(e)) => break Some(e.to_string()),
        }
    };
    let _ = tx.send(Inbound::Closed(id, reason)).await;
}

impl WebSocketServerLink {
    fn drop_peer(&mut self, id: PeerId, reason: Option<String>) {
        if let Some(peer) = self.peers.remove(&id) {
            peer.session.abort();
            if let Some(reason) = reason {
                self.pending
                    .push_back(LinkEvent::Warning(format!("peer {}: {}", peer.address, reason)));
            }
            self.pending.push_back(LinkEvent::PeerDisconnected(id));
        }
    }
}

#[async_trait]
impl Link for WebSocketServerLink {
    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, address)) => {
                        let id = PeerId(self.next_id);
                        self.next_id += 1;
                        let session = self.sessions.spawn(serve_peer(id, stream, self.inbound_tx.clone()));
                        self.handshakes.insert(id, (address, session));
                    }
                    Err(e) => return Ok(LinkEvent::Warning(format!("accept failed: {e}"))),
                },
                Some(inbound) = self.inbound_rx.recv() => match inbound {
                    Inbound::Ready(id, sink) => {
                        if let Some((address, session)) = self.handshakes.remove(&id) {
                            self.peers.insert(id, Peer { address, sink, session });
                            return Ok(LinkEvent::PeerConnected { id, address: address.to_string() });
                        }
                    }
                    Inbound::Rejected(id, reason) => {
                        if let Some((address, _)) = self.handshakes.remove(&id) {
                            return Ok(LinkEvent::Warning(format!("handshake with {address} failed: {reason}")));
                        }
                    }
                    Inbound::Data(id, bytes) => {
                        if let Some(peer) = self.peers.get(&id) {
                            return Ok(LinkEvent::Data {
                                from: peer.address.to_string(),
                                peer: Some(id),
                                bytes,
                            });
                        }
                    }
                    Inbound::Closed(id, reason) => self.drop_peer(id, reason),
                },
                Some(_) = self.sessions.join_next(), if !self.sessions.is_empty() => {}
            }
        }
    }

    async fn write(&mut self, target: Target, bytes: &Bytes) -> Result<Vec<Delivered>, TransportError> {
        let ids: Vec<PeerId> = match target {
            Target::Broadcast => self.peers.keys().copied().collect(),
            Target::Peer(id) => vec![id],
        };

        let message = outgoing(self.message_type, bytes);
        let mut delivered = Vec::with_capacity(ids.len());
        let mut failed = Vec::new();
        for id in ids {
            let Some(peer) = self.peers.get_mut(&id) else {
                self.pending
                    .push_back(LinkEvent::Warning(format!("no such peer {id}")));
                continue;
            };
            match peer.sink.send(message.clone()).await {
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
        for (_, mut peer) in self.peers.drain() {
            let _ = peer.sink.close().await;
        }
        self.sessions.abort_all();
        self.handshakes.clear();
        self.pending.clear();
    }

    fn describe(&self) -> String {
        format!("listening on ws://{}", self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth() {
        assert_eq!(basic_auth("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_outgoing_frames() {
        let bytes = Bytes::from_static(b"hi");
        assert!(matches!(outgoing(WebSocketMessageType::Binary, &bytes), Message::Binary(_)));
        assert!(matches!(outgoing(WebSocketMessageType::Text, &bytes), Message::Text(_)));
        assert_eq!(incoming(Message::text("hi")), Some(bytes));
        assert_eq!(incoming(Message::Ping(Bytes::new())), None);
    }
}
