//! Wire-level transports.
//!
//! The dispatcher never talks to hardware directly. A [`TransportFactory`]
//! turns a parsed [`ConnectionSpec`] into a [`Transport`], and instruments
//! send strings through it.

pub mod mock;
pub mod null;
pub mod prologix;
pub mod serial;
pub mod tcp;

pub use mock::{MockTransports, WireRecord};
pub use null::NullTransport;
pub use prologix::PrologixGpib;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

use crate::config::TransportSettings;
use crate::instrument::connection::ConnectionSpec;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is closed or was never opened
    #[error("Transport is not connected")]
    NotConnected,
    /// No reply within the configured timeout
    #[error("Timed out after {0:?} waiting for a reply")]
    Timeout(Duration),
    /// The backend for this connection kind is not available
    #[error("{0}")]
    Unavailable(String),
}

/// A bidirectional text channel to one device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable endpoint, used in logs.
    fn describe(&self) -> String;

    /// Send one message; the transport appends its termination.
    async fn send(&mut self, message: &str) -> Result<()>;

    /// Send one message and read one terminated reply.
    async fn query(&mut self, message: &str) -> Result<String>;

    /// Read the device status byte (GPIB serial poll).
    async fn read_status(&mut self) -> Result<u8> {
        Err(anyhow!("{} does not support status polling", self.describe()))
    }

    /// Release the channel. Calling it twice is harmless.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports for parsed connection strings.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a channel for `spec`.
    async fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn Transport>>;
}

/// The production factory, configured from `[transport]` settings.
pub struct DefaultTransports {
    settings: TransportSettings,
    gpib_bus: Mutex<Option<Arc<Mutex<SerialTransport>>>>,
}

impl DefaultTransports {
    /// Create a factory; nothing is opened until the first MAKE.
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            gpib_bus: Mutex::new(None),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.settings.timeout_ms)
    }

    /// The shared serial link to the GPIB controller, opened on first use.
    async fn gpib_bus(&self) -> Result<Arc<Mutex<SerialTransport>>> {
        let controller = self.settings.gpib.as_ref().ok_or_else(|| {
            TransportError::Unavailable(
                "no GPIB controller configured (set [transport.gpib])".to_string(),
            )
        })?;

        let mut slot = self.gpib_bus.lock().await;
        if let Some(bus) = slot.as_ref() {
            return Ok(bus.clone());
        }
        let link = SerialTransport::open(
            &controller.port,
            controller.baud,
            None,
            "\n",
            self.timeout(),
        )?;
        let bus = Arc::new(Mutex::new(link));
        *slot = Some(bus.clone());
        Ok(bus)
    }
}

#[async_trait]
impl TransportFactory for DefaultTransports {
    async fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn Transport>> {
        match spec {
            ConnectionSpec::None => Ok(Box::new(NullTransport::new())),
            ConnectionSpec::Serial(params) => {
                let device = self
                    .settings
                    .serial_ports
                    .get(&params.port)
                    .cloned()
                    .unwrap_or_else(|| params.port.clone());
                let link = SerialTransport::open(
                    &device,
                    params.baud,
                    Some(params),
                    &self.settings.termination,
                    self.timeout(),
                )?;
                Ok(Box::new(link))
            }
            ConnectionSpec::Gpib(address) => {
                let bus = self.gpib_bus().await?;
                let device = PrologixGpib::attach(bus, *address).await?;
                Ok(Box::new(device))
            }
            ConnectionSpec::Network(host) => {
                let link = TcpTransport::connect(
                    host,
                    self.settings.network_port,
                    &self.settings.termination,
                    self.timeout(),
                )
                .await?;
                Ok(Box::new(link))
            }
            ConnectionSpec::Vendor { wire, .. } => Err(TransportError::Unavailable(format!(
                "no driver for vendor wire {wire} is available"
            ))
            .into()),
        }
    }
}
