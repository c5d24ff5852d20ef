//! Serial port link

use super::{Delivered, Link, LinkEvent, SerialConfig, SerialFlowControl, SerialParity, Target, TransportError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serialport::SerialPortType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

const READ_BUFFER: usize = 4096;

/// Open a serial port
pub async fn open(config: SerialConfig) -> Result<Box<dyn Link>, TransportError> {
    let data_bits = match config.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    };

    let stop_bits = match config.stop_bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    };

    let parity = match config.parity {
        SerialParity::Odd => Parity::Odd,
        SerialParity::Even => Parity::Even,
        SerialParity::None => Parity::None,
    };

    let flow_control = match config.flow_control {
        SerialFlowControl::Hardware => FlowControl::Hardware,
        SerialFlowControl::Software => FlowControl::Software,
        SerialFlowControl::None => FlowControl::None,
    };

    let stream = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .open_native_async()
        .map_err(|e| map_serial_error(&config.port, e))?;

    Ok(Box::new(SerialLink {
        config,
        stream,
        buffer: BytesMut::with_capacity(READ_BUFFER),
    }))
}

fn map_serial_error(port: &str, err: tokio_serial::Error) -> TransportError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => TransportError::PortNotFound(port.to_string()),
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied(port.to_string())
        }
        serialport::ErrorKind::InvalidInput => {
            TransportError::InvalidConfiguration(format!("{port}: {err}"))
        }
        _ => TransportError::ConnectionFailed(format!("{port}: {err}")),
    }
}

struct SerialLink {
    config: SerialConfig,
    stream: SerialStream,
    buffer: BytesMut,
}

#[async_trait]
impl Link for SerialLink {
    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        self.buffer.reserve(READ_BUFFER);
        let n = self.stream.read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(TransportError::Disconnected);
        }
        Ok(LinkEvent::Data {
            from: self.config.port.clone(),
            peer: None,
            bytes: self.buffer.split().freeze(),
        })
    }

    async fn write(&mut self, _target: Target, bytes: &Bytes) -> Result<Vec<Delivered>, TransportError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(vec![Delivered::remote(self.config.port.clone())])
    }

    fn describe(&self) -> String {
        let parity = match self.config.parity {
            SerialParity::None => 'N',
            SerialParity::Odd => 'O',
            SerialParity::Even => 'E',
        };
        format!(
            "{} @ {} {}{}{}",
            self.config.port, self.config.baud_rate, self.config.data_bits, parity, self.config.stop_bits
        )
    }
}

/// Serial port found on the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Port name
    pub name: String,
    /// Port type (USB, PCI, Bluetooth, Unknown)
    pub kind: String,
    /// USB description if available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (kind, description) = match p.port_type {
                SerialPortType::UsbPort(usb) => (
                    "USB",
                    Some(format!(
                        "{:04x}:{:04x} {}",
                        usb.vid,
                        usb.pid,
                        usb.product.unwrap_or_default()
                    )),
                ),
                SerialPortType::PciPort => ("PCI", None),
                SerialPortType::BluetoothPort => ("Bluetooth", None),
                SerialPortType::Unknown => ("Unknown", None),
            };
            PortInfo {
                name: p.port_name,
                kind: kind.to_string(),
                description: description.map(|d| d.trim().to_string()),
            }
        })
        .collect())
}
