//! In-memory link for unit tests

use super::{
    Delivered, Link, LinkEvent, OpenFuture, Opener, Target, TransportConfig, TransportError,
    TransportKind, TransportRegistry,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Echoes every write back as inbound data
pub(crate) struct Loopback {
    rx: mpsc::UnboundedReceiver<Bytes>,
    tx: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl Link for Loopback {
    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        match self.rx.recv().await {
            Some(bytes) => Ok(LinkEvent::Data {
                from: "loopback".to_string(),
                peer: None,
                bytes,
            }),
            None => Err(TransportError::Disconnected),
        }
    }

    async fn write(&mut self, _target: Target, bytes: &Bytes) -> Result<Vec<Delivered>, TransportError> {
        let _ = self.tx.send(bytes.clone());
        Ok(vec![Delivered::remote("loopback")])
    }

    fn describe(&self) -> String {
        "loopback".to_string()
    }
}

pub(crate) fn loopback_opener() -> Opener {
    Arc::new(|_config| -> OpenFuture {
        Box::pin(async {
            let (tx, rx) = mpsc::unbounded_channel();
            Ok(Box::new(Loopback { rx, tx }) as Box<dyn Link>)
        })
    })
}

/// Registry whose TCP client kind is a loopback
pub(crate) fn loopback_registry() -> Arc<TransportRegistry> {
    let mut registry = TransportRegistry::new();
    registry.register(
        TransportKind::TcpClient,
        "Loopback",
        TransportConfig::default(),
        loopback_opener(),
    );
    Arc::new(registry)
}
