//! Instruments and commands defined in text files.

use super::connection::ConnectionSpec;
use super::descriptor::{ArgValue, CommandDescriptor};
use super::device::DeviceLink;
use super::wire_format::WireTemplate;
use super::Instrument;
use crate::adapters::Transport;
use crate::dispatcher::ExecutionContext;
use crate::error::{AppResult, DispatchError};
use anyhow::{bail, Result};
use async_trait::async_trait;

/// Handler behind a definition file with no code-level implementation.
/// All of its commands are generic.
#[derive(Default)]
pub struct GenericInstrument {
    device: DeviceLink,
}

impl GenericInstrument {
    /// An unopened instance.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Instrument for GenericInstrument {
    async fn open(
        &mut self,
        alias: &str,
        connection: &ConnectionSpec,
        link: Box<dyn Transport>,
    ) -> Result<()> {
        self.device.attach(alias, connection, link).await
    }

    async fn close(&mut self) -> Result<()> {
        self.device.close().await
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        self.device.send(message).await
    }

    async fn query(&mut self, message: &str) -> Result<String> {
        self.device.query(message).await
    }

    fn list_commands(&self) -> Vec<CommandDescriptor> {
        Vec::new()
    }

    async fn invoke(
        &mut self,
        command: &CommandDescriptor,
        _args: &[ArgValue],
        _ctx: &ExecutionContext,
    ) -> Result<Option<String>> {
        bail!("'{}' has no code-level implementation", command.name)
    }
}

/// Execute a generic command through `handler`.
///
/// The template is always rendered, so formatting problems surface in the
/// validating pass. In the live pass `get...` commands return the reply,
/// `save...` commands write the reply to the output file named by the
/// trailing extension argument, and everything else is sent as is.
pub async fn execute(
    handler: &mut dyn Instrument,
    command: &CommandDescriptor,
    args: &[ArgValue],
    ctx: &ExecutionContext,
) -> AppResult<Option<String>> {
    let template = command.template().ok_or_else(|| {
        DispatchError::MalformedDescriptor(format!("'{}' has no wire template", command.name))
    })?;
    let wire = WireTemplate::parse(template).map_err(DispatchError::MalformedDescriptor)?;

    let (wire_args, extension) = match (command.is_save(), args.split_last()) {
        (true, Some((extension, rest))) => (rest, Some(extension.as_text())),
        _ => (args, None),
    };
    let message = wire.render(wire_args)?;

    if ctx.is_validating() {
        return Ok(None);
    }

    let transport = |e: anyhow::Error| DispatchError::Transport(format!("{e:#}"));
    if let Some(extension) = extension {
        let reply = handler.query(&message).await.map_err(transport)?;
        let path = ctx.output_file(&extension);
        tokio::fs::write(&path, reply).await?;
        tracing::info!(command = %command.name, path = %path.display(), "reply saved");
        Ok(Some(path.display().to_string()))
    } else if command.is_get() {
        let reply = handler.query(&message).await.map_err(transport)?;
        Ok(Some(reply))
    } else {
        handler.send(&message).await.map_err(transport)?;
        Ok(None)
    }
}
