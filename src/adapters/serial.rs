//! RS-232 transport
//!
//! Wraps the serialport crate; every read and write runs on Tokio's blocking
//! pool so that a slow instrument never stalls the interpreter's runtime.

use super::{Transport, TransportError};
use crate::instrument::connection::SerialParams;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// An open serial line.
pub struct SerialTransport {
    /// OS device path (e.g. "/dev/ttyUSB0")
    device: String,

    /// Appended to every outgoing message
    termination: String,

    /// Reply line ending
    response_delimiter: char,

    /// Read timeout for queries
    timeout: Duration,

    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    /// Open `device` at `baud`. `params` supplies framing; 8N1 otherwise.
    pub fn open(
        device: &str,
        baud: u32,
        params: Option<&SerialParams>,
        termination: &str,
        timeout: Duration,
    ) -> Result<Self> {
        #[cfg(feature = "instrument_serial")]
        {
            use crate::instrument::connection::Parity;
            use serialport::{DataBits, StopBits};

            let mut builder = serialport::new(device, baud).timeout(Duration::from_millis(100));
            if let Some(p) = params {
                builder = builder
                    .data_bits(match p.data_bits {
                        5 => DataBits::Five,
                        6 => DataBits::Six,
                        7 => DataBits::Seven,
                        _ => DataBits::Eight,
                    })
                    .stop_bits(if p.stop_bits == 2 {
                        StopBits::Two
                    } else {
                        StopBits::One
                    })
                    .parity(match p.parity {
                        Parity::None => serialport::Parity::None,
                        Parity::Even => serialport::Parity::Even,
                        Parity::Odd => serialport::Parity::Odd,
                    });
            }
            let port = builder
                .open()
                .with_context(|| format!("Failed to open serial port '{device}' at {baud} baud"))?;

            debug!(target: "comm", "Serial port '{}' opened at {} baud", device, baud);
            Ok(Self {
                device: device.to_string(),
                termination: termination.to_string(),
                response_delimiter: '\n',
                timeout,
                port: Some(Arc::new(Mutex::new(port))),
            })
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = (baud, params, termination, timeout);
            Err(TransportError::Unavailable(format!(
                "cannot open '{device}': serial support not enabled, rebuild with --features instrument_serial"
            ))
            .into())
        }
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| anyhow::Error::from(TransportError::NotConnected))
    }

    /// Read one reply line without sending anything first.
    pub async fn read_line(&mut self) -> Result<String> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let delimiter = self.response_delimiter;
            let timeout = self.timeout;

            tokio::task::spawn_blocking(move || -> Result<String> {
                use std::io::Read;

                let mut port_guard = port.blocking_lock();
                let mut response = String::new();
                let mut buffer = [0u8; 1];
                let start = std::time::Instant::now();

                loop {
                    if start.elapsed() > timeout {
                        return Err(TransportError::Timeout(timeout).into());
                    }
                    match port_guard.read(&mut buffer) {
                        Ok(0) => return Err(anyhow!("Unexpected EOF from serial port")),
                        Ok(_) => {
                            let ch = buffer[0] as char;
                            response.push(ch);
                            if ch == delimiter {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => return Err(anyhow!("Serial read error: {}", e)),
                    }
                }

                let response = response.trim().to_string();
                debug!(target: "comm", "serial -> {}", response);
                Ok(response)
            })
            .await
            .context("Serial I/O task panicked")?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = (self.response_delimiter, self.timeout);
            Err(TransportError::NotConnected.into())
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn describe(&self) -> String {
        format!("serial {}", self.device)
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let line = format!("{}{}", message, self.termination);
            let for_log = message.to_string();

            tokio::task::spawn_blocking(move || -> Result<()> {
                use std::io::Write;

                let mut port_guard = port.blocking_lock();
                port_guard
                    .write_all(line.as_bytes())
                    .context("Failed to write to serial port")?;
                port_guard.flush().context("Failed to flush serial port")?;
                debug!(target: "comm", "serial <- {}", for_log);
                Ok(())
            })
            .await
            .context("Serial I/O task panicked")?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = (message, &self.termination);
            Err(TransportError::NotConnected.into())
        }
    }

    async fn query(&mut self, message: &str) -> Result<String> {
        self.send(message).await?;
        self.read_line().await
    }

    async fn close(&mut self) -> Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!(target: "comm", "Serial port '{}' closed", self.device);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_a_missing_device_fails() {
        let result = SerialTransport::open(
            "/dev/daq-script-no-such-port",
            9600,
            None,
            "\n",
            Duration::from_millis(10),
        );
        assert!(result.is_err());
    }
}
