//! Stanford Research Systems DS345 function generator.

use super::{float_arg, text_arg, unsupported};
use crate::adapters::Transport;
use crate::dispatcher::ExecutionContext;
use crate::error::DispatchError;
use crate::instrument::connection::ConnectionSpec;
use crate::instrument::descriptor::{ArgValue, CommandDescriptor, ParamRange, ParamSpec, ParamType};
use crate::instrument::device::DeviceLink;
use crate::instrument::Instrument;
use anyhow::Result;
use async_trait::async_trait;

/// Name used in MAKE lines.
pub const DISPLAY_NAME: &str = "SRS DS345";

/// Output functions in the order of their `FUNC` codes.
const FUNCTIONS: [&str; 6] = ["Sine", "Square", "Triangle", "Ramp", "Noise", "Arbitrary"];

/// Highest sine frequency the DS345 generates, in Hz.
const MAX_FREQUENCY: f64 = 30.2e6;

/// DS345 handler.
#[derive(Default)]
pub struct SrsDs345 {
    device: DeviceLink,
}

impl SrsDs345 {
    /// An unopened instance.
    pub fn new() -> Self {
        Self::default()
    }
}

fn function_code(name: &str) -> Result<usize> {
    FUNCTIONS
        .iter()
        .position(|f| f.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| {
            DispatchError::TypeConversion {
                value: name.to_string(),
                expected: format!("one of {}", FUNCTIONS.join(", ")),
            }
            .into()
        })
}

#[async_trait]
impl Instrument for SrsDs345 {
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
        vec![
            CommandDescriptor::reflected("setOutputFunction")
                .described("Sets the Output Function to Sine, Square, etc.")
                .param(
                    ParamSpec::new("Output Function", ParamType::String)
                        .with_tooltip("Sine, Square, Triangle, Ramp, Noise or Arbitrary"),
                )
                .self_validating(),
            CommandDescriptor::reflected("setFrequency")
                .described("Set the output frequency")
                .param(
                    ParamSpec::new("Frequency", ParamType::Float)
                        .with_tooltip("Hz")
                        .with_range(ParamRange::Float {
                            min: 0.0,
                            max: MAX_FREQUENCY,
                        }),
                ),
            CommandDescriptor::reflected("setAmplitude")
                .described("Set the peak-to-peak output amplitude")
                .param(
                    ParamSpec::new("Amplitude", ParamType::Float)
                        .with_tooltip("Vpp")
                        .with_range(ParamRange::Float { min: 0.0, max: 10.0 }),
                ),
            CommandDescriptor::reflected("getIdentification").described("Query *IDN?"),
            CommandDescriptor::reflected("getStatusByte").described("Serial-poll the generator"),
        ]
    }

    async fn invoke(
        &mut self,
        command: &CommandDescriptor,
        args: &[ArgValue],
        ctx: &ExecutionContext,
    ) -> Result<Option<String>> {
        match command.name.as_str() {
            "setOutputFunction" => {
                let code = function_code(&text_arg(command, args, 0)?)?;
                if ctx.is_live() {
                    self.device.send(&format!("FUNC {code}")).await?;
                }
                Ok(None)
            }
            "setFrequency" => {
                let hz = float_arg(command, args, 0)?;
                self.device.send(&format!("FREQ {hz}")).await?;
                Ok(None)
            }
            "setAmplitude" => {
                let vpp = float_arg(command, args, 0)?;
                self.device.send(&format!("AMPL {vpp}VP")).await?;
                Ok(None)
            }
            "getIdentification" => Ok(Some(self.device.query("*IDN?").await?)),
            "getStatusByte" => Ok(Some(self.device.read_status().await?.to_string())),
            _ => Err(unsupported(self.device.alias(), command)),
        }
    }
}
