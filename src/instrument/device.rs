//! Transport plumbing shared by the instrument handlers.

use super::connection::ConnectionSpec;
use crate::adapters::{Transport, TransportError};
use anyhow::Result;

/// The opened connection of one instrument.
///
/// Handlers embed a `DeviceLink` and forward `open`, `close`, `send` and
/// `query` to it.
#[derive(Default)]
pub struct DeviceLink {
    alias: String,
    link: Option<Box<dyn Transport>>,
}

impl DeviceLink {
    /// An unopened link.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `link` and reset the device. GPIB devices get a `*CLS`.
    pub async fn attach(
        &mut self,
        alias: &str,
        connection: &ConnectionSpec,
        link: Box<dyn Transport>,
    ) -> Result<()> {
        self.alias = alias.to_string();
        self.link = Some(link);
        if matches!(connection, ConnectionSpec::Gpib(_)) {
            self.send("*CLS").await?;
        }
        tracing::debug!(alias, %connection, "device link attached");
        Ok(())
    }

    /// Alias the link was attached under.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// True between `attach` and `close`.
    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn link(&mut self) -> Result<&mut Box<dyn Transport>> {
        self.link
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected.into())
    }

    /// Send one message.
    pub async fn send(&mut self, message: &str) -> Result<()> {
        tracing::trace!(alias = %self.alias, message, "send");
        self.link()?.send(message).await
    }

    /// Send one message and read the reply.
    pub async fn query(&mut self, message: &str) -> Result<String> {
        tracing::trace!(alias = %self.alias, message, "query");
        self.link()?.query(message).await
    }

    /// Serial-poll the device.
    pub async fn read_status(&mut self) -> Result<u8> {
        self.link()?.read_status().await
    }

    /// Close the transport; later calls do nothing.
    pub async fn close(&mut self) -> Result<()> {
        match self.link.take() {
            Some(mut link) => {
                tracing::debug!(alias = %self.alias, "closing {}", link.describe());
                link.close().await
            }
            None => Ok(()),
        }
    }
}
