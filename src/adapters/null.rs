//! Transport for `none` connections: nothing leaves the process.

use super::{Transport, TransportError};
use anyhow::Result;
use async_trait::async_trait;
use log::debug;

/// Logs outgoing messages and answers every query with an empty string.
#[derive(Debug, Default)]
pub struct NullTransport {
    closed: bool,
}

impl NullTransport {
    /// A fresh, open null channel.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for NullTransport {
    fn describe(&self) -> String {
        "none".to_string()
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        if self.closed {
            return Err(TransportError::NotConnected.into());
        }
        debug!(target: "comm", "none <- {}", message);
        Ok(())
    }

    async fn query(&mut self, message: &str) -> Result<String> {
        if self.closed {
            return Err(TransportError::NotConnected.into());
        }
        debug!(target: "comm", "none <- {} (no reply)", message);
        Ok(String::new())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
