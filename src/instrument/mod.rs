//! Instruments: the handler trait, command descriptors, connections, the
//! registry of known instrument types and the table of live instances.
//!
//! Every handler implements [`Instrument`]. Commands a handler implements in
//! code are described by [`Instrument::list_commands`]; commands loaded from
//! definition files are attached by the registry and executed through the
//! handler's [`Instrument::send`] / [`Instrument::query`].

pub mod builtin;
pub mod connection;
pub mod descriptor;
pub mod device;
pub mod generic;
pub mod registry;
pub mod table;
pub mod wire_format;

pub use connection::{ConnectionSpec, TransportKind};
pub use descriptor::{parse_descriptor, ArgValue, CommandDescriptor, ParamRange, ParamSpec, ParamType, Provenance};
pub use device::DeviceLink;
pub use generic::GenericInstrument;
pub use registry::{HandlerRegistry, InstrumentInfo};
pub use table::{InstanceTable, LiveInstance};

use crate::adapters::Transport;
use crate::dispatcher::ExecutionContext;
use anyhow::Result;
use async_trait::async_trait;

/// An instrument handler.
///
/// A handler is created for every MAKE line. During the validating pass it
/// is never opened; only commands marked self-validating are invoked, and
/// those must not touch the wire while [`ExecutionContext::is_validating`]
/// is true.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Take ownership of an opened transport and initialise the device.
    async fn open(
        &mut self,
        alias: &str,
        connection: &ConnectionSpec,
        link: Box<dyn Transport>,
    ) -> Result<()>;

    /// Release the device. Must tolerate being called more than once.
    async fn close(&mut self) -> Result<()>;

    /// Send a raw message.
    async fn send(&mut self, message: &str) -> Result<()>;

    /// Send a raw message and return the reply.
    async fn query(&mut self, message: &str) -> Result<String>;

    /// Commands implemented in code.
    fn list_commands(&self) -> Vec<CommandDescriptor>;

    /// Run one of the commands returned by `list_commands`.
    ///
    /// Arguments are already converted and range-checked. A returned string
    /// is the command's result (a reading, a file name).
    async fn invoke(
        &mut self,
        command: &CommandDescriptor,
        args: &[ArgValue],
        ctx: &ExecutionContext,
    ) -> Result<Option<String>>;
}
