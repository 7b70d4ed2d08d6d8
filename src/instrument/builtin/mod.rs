//! Instrument handlers implemented in code.
//!
//! Each handler describes its commands with [`CommandDescriptor::reflected`]
//! and dispatches on the command name in `invoke`.

pub mod lakeshore_340;
pub mod srs_ds345;
pub mod utility;

pub use lakeshore_340::Lakeshore340;
pub use srs_ds345::SrsDs345;
pub use utility::Utility;

use super::connection::TransportKind;
use super::descriptor::{ArgValue, CommandDescriptor};
use super::registry::HandlerRegistry;
use crate::error::{AppResult, DispatchError};

const GPIB_OR_SERIAL: &[TransportKind] = &[TransportKind::Gpib, TransportKind::Serial];

/// Register every built-in handler.
pub fn register_all(registry: &mut HandlerRegistry) -> AppResult<()> {
    registry.register(utility::DISPLAY_NAME, "utility", &[TransportKind::None], || {
        Box::new(Utility::new())
    })?;
    registry.register(srs_ds345::DISPLAY_NAME, "srs_ds345", GPIB_OR_SERIAL, || {
        Box::new(SrsDs345::new())
    })?;
    registry.register(
        lakeshore_340::DISPLAY_NAME,
        "lakeshore_340",
        GPIB_OR_SERIAL,
        || Box::new(Lakeshore340::new()),
    )?;
    Ok(())
}

/// The argument at `index` as a float.
pub(crate) fn float_arg(command: &CommandDescriptor, args: &[ArgValue], index: usize) -> anyhow::Result<f64> {
    args.get(index)
        .and_then(ArgValue::as_f64)
        .ok_or_else(|| missing(command, index))
}

/// The argument at `index` as an integer.
pub(crate) fn int_arg(command: &CommandDescriptor, args: &[ArgValue], index: usize) -> anyhow::Result<i64> {
    args.get(index)
        .and_then(ArgValue::as_i64)
        .ok_or_else(|| missing(command, index))
}

/// The argument at `index` as unquoted text.
pub(crate) fn text_arg(command: &CommandDescriptor, args: &[ArgValue], index: usize) -> anyhow::Result<String> {
    args.get(index)
        .map(ArgValue::as_text)
        .ok_or_else(|| missing(command, index))
}

fn missing(command: &CommandDescriptor, index: usize) -> anyhow::Error {
    let expected = command
        .params
        .get(index)
        .map(|p| p.ty.to_string())
        .unwrap_or_else(|| "an argument".to_string());
    DispatchError::TypeConversion {
        value: format!("argument {} of {}", index + 1, command.name),
        expected,
    }
    .into()
}

/// Error for a command name the handler does not implement.
pub(crate) fn unsupported(alias: &str, command: &CommandDescriptor) -> anyhow::Error {
    DispatchError::UnknownCommand {
        instrument: alias.to_string(),
        command: command.name.clone(),
    }
    .into()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::adapters::{MockTransports, TransportFactory};
    use crate::config::Settings;
    use crate::dispatcher::{ExecutionContext, ExecutionMode, RunControl};
    use crate::instrument::connection::ConnectionSpec;
    use crate::instrument::descriptor::{ArgValue, CommandDescriptor};
    use crate::instrument::Instrument;
    use std::sync::Arc;

    pub fn context(mode: ExecutionMode) -> ExecutionContext {
        ExecutionContext::new(mode, RunControl::new(), Arc::new(Settings::default()))
    }

    pub async fn open(handler: &mut dyn Instrument, mock: &MockTransports, spec: ConnectionSpec) {
        let link = mock.open(&spec).await.unwrap();
        handler.open("dev", &spec, link).await.unwrap();
    }

    pub fn command(handler: &dyn Instrument, name: &str) -> CommandDescriptor {
        handler
            .list_commands()
            .into_iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    /// Convert and range-check tokens the way the dispatcher does.
    pub fn args(command: &CommandDescriptor, tokens: &[&str]) -> Vec<ArgValue> {
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        let args = command.convert_args(&tokens).unwrap();
        command.check_ranges(&args).unwrap();
        args
    }
}
