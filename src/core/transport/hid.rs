//! HID device link
//!
//! `hidapi` is blocking, so the device lives on a dedicated thread. Writes
//! reach it through a `crossbeam-channel` queue and input reports come back
//! over a tokio channel.

use super::{Delivered, HidConfig, Link, LinkEvent, Target, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use hidapi::HidApi;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const REPORT_SIZE: usize = 64;
const READ_TIMEOUT_MS: i32 = 20;

enum Request {
    Write(Vec<u8>, oneshot::Sender<Result<usize, String>>),
    Stop,
}

enum Report {
    Input(Bytes),
    Failed(String),
}

/// Open a HID device
pub async fn open(config: HidConfig) -> Result<Box<dyn Link>, TransportError> {
    let (request_tx, request_rx) = crossbeam_channel::unbounded();
    let (report_tx, report_rx) = mpsc::channel(256);
    let (ready_tx, ready_rx) = oneshot::channel();

    let thread_config = config.clone();
    std::thread::Builder::new()
        .name("hid-io".to_string())
        .spawn(move || device_thread(thread_config, request_rx, report_tx, ready_tx))?;

    let description = ready_rx
        .await
        .map_err(|_| TransportError::ConnectionFailed("HID thread exited".to_string()))?
        .map_err(TransportError::ConnectionFailed)?;

    Ok(Box::new(HidLink {
        description,
        report_id: config.report_id,
        requests: request_tx,
        reports: report_rx,
    }))
}

fn device_thread(
    config: HidConfig,
    requests: Receiver<Request>,
    reports: mpsc::Sender<Report>,
    ready: oneshot::Sender<Result<String, String>>,
) {
    let opened = HidApi::new().and_then(|api| match &config.serial_number {
        Some(serial) => api.open_serial(config.vendor_id, config.product_id, serial),
        None => api.open(config.vendor_id, config.product_id),
    });
    let device = match opened {
        Ok(device) => device,
        Err(e) => {
            let _ = ready.send(Err(format!(
                "{:04x}:{:04x}: {e}",
                config.vendor_id, config.product_id
            )));
            return;
        }
    };

    let product = device.get_product_string().ok().flatten().unwrap_or_default();
    let description = format!("{:04x}:{:04x} {}", config.vendor_id, config.product_id, product)
        .trim()
        .to_string();
    if ready.send(Ok(description)).is_err() {
        return;
    }

    let mut buffer = [0u8; REPORT_SIZE];
    loop {
        match requests.try_recv() {
            Ok(Request::Write(data, reply)) => {
                let _ = reply.send(device.write(&data).map_err(|e| e.to_string()));
                continue;
            }
            Ok(Request::Stop) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        match device.read_timeout(&mut buffer, READ_TIMEOUT_MS) {
            Ok(0) => {}
            Ok(n) => {
                if reports
                    .blocking_send(Report::Input(Bytes::copy_from_slice(&buffer[..n])))
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                let _ = reports.blocking_send(Report::Failed(e.to_string()));
                break;
            }
        }
    }
    debug!("HID thread stopped");
}

struct HidLink {
    description: String,
    report_id: u8,
    requests: Sender<Request>,
    reports: mpsc::Receiver<Report>,
}

#[async_trait]
impl Link for HidLink {
    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        match self.reports.recv().await {
            Some(Report::Input(bytes)) => Ok(LinkEvent::Data {
                from: self.description.clone(),
                peer: None,
                bytes,
            }),
            Some(Report::Failed(e)) => Err(TransportError::ReceiveError(e)),
            None => Err(TransportError::Disconnected),
        }
    }

    async fn write(&mut self, _target: Target, bytes: &Bytes) -> Result<Vec<Delivered>, TransportError> {
        let mut report = Vec::with_capacity(bytes.len() + 1);
        report.push(self.report_id);
        report.extend_from_slice(bytes);

        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Request::Write(report, reply_tx))
            .map_err(|_| TransportError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| TransportError::Disconnected)?
            .map_err(TransportError::SendError)?;

        Ok(vec![Delivered::remote(self.description.clone())])
    }

    async fn shutdown(&mut self) {
        let _ = self.requests.send(Request::Stop);
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl Drop for HidLink {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Stop);
    }
}
