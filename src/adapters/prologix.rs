//! GPIB through a Prologix GPIB-USB controller.
//!
//! The controller is a serial device shared by every GPIB instrument on the
//! bus; each message is preceded by `++addr N` so that it reaches the right
//! listener. Replies are requested explicitly with `++read eoi`.

use super::{SerialTransport, Transport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One GPIB device behind a shared Prologix controller.
pub struct PrologixGpib {
    bus: Arc<Mutex<SerialTransport>>,
    address: u8,
    attached: bool,
}

impl PrologixGpib {
    /// Put the controller in controller mode with manual read-back and
    /// address `address`.
    pub async fn attach(bus: Arc<Mutex<SerialTransport>>, address: u8) -> Result<Self> {
        {
            let mut link = bus.lock().await;
            link.send("++mode 1").await?;
            link.send("++auto 0").await?;
            link.send(&format!("++addr {address}")).await?;
        }
        debug!(target: "comm", "GPIB#{} attached via Prologix", address);
        Ok(Self {
            bus,
            address,
            attached: true,
        })
    }
}

#[async_trait]
impl Transport for PrologixGpib {
    fn describe(&self) -> String {
        format!("GPIB#{}", self.address)
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        let mut link = self.bus.lock().await;
        link.send(&format!("++addr {}", self.address)).await?;
        link.send(message).await
    }

    async fn query(&mut self, message: &str) -> Result<String> {
        let mut link = self.bus.lock().await;
        link.send(&format!("++addr {}", self.address)).await?;
        link.send(message).await?;
        link.send("++read eoi").await?;
        link.read_line().await
    }

    async fn read_status(&mut self) -> Result<u8> {
        let mut link = self.bus.lock().await;
        link.send(&format!("++spoll {}", self.address)).await?;
        let reply = link.read_line().await?;
        reply
            .trim()
            .parse::<u8>()
            .with_context(|| format!("GPIB#{} returned an invalid status byte '{}'", self.address, reply))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        let mut link = self.bus.lock().await;
        link.send(&format!("++addr {}", self.address)).await?;
        link.send("++loc").await
    }
}
