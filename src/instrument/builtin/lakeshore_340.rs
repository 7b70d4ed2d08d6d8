//! Lake Shore 340 temperature controller.
//!
//! Two control loops, four sensor inputs (A to D) and a heater with six
//! range settings (0 turns the heater off).

use super::{float_arg, int_arg, text_arg, unsupported};
use crate::adapters::Transport;
use crate::dispatcher::ExecutionContext;
use crate::error::DispatchError;
use crate::instrument::connection::ConnectionSpec;
use crate::instrument::descriptor::{ArgValue, CommandDescriptor, ParamRange, ParamSpec, ParamType};
use crate::instrument::device::DeviceLink;
use crate::instrument::Instrument;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Name used in MAKE lines.
pub const DISPLAY_NAME: &str = "Lakeshore 340";

const CHANNELS: [&str; 4] = ["A", "B", "C", "D"];
const MAX_HEATER_RANGE: i64 = 5;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lake Shore 340 handler.
#[derive(Default)]
pub struct Lakeshore340 {
    device: DeviceLink,
}

impl Lakeshore340 {
    /// An unopened instance.
    pub fn new() -> Self {
        Self::default()
    }

    async fn read_temperature(&mut self, channel: &str) -> Result<f64> {
        let reply = self.device.query(&format!("KRDG? {channel}")).await?;
        reply
            .trim()
            .trim_start_matches('+')
            .parse::<f64>()
            .map_err(|_| anyhow!("could not parse temperature reading '{}'", reply.trim()))
    }
}

fn channel(text: &str) -> Result<&'static str> {
    CHANNELS
        .iter()
        .find(|c| c.eq_ignore_ascii_case(text.trim()))
        .copied()
        .ok_or_else(|| {
            DispatchError::TypeConversion {
                value: text.to_string(),
                expected: "an input channel (A, B, C or D)".to_string(),
            }
            .into()
        })
}

fn channel_param() -> ParamSpec {
    ParamSpec::new("Channel", ParamType::String).with_tooltip("A, B, C or D")
}

#[async_trait]
impl Instrument for Lakeshore340 {
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
            CommandDescriptor::reflected("setTemp")
                .described("Set the setpoint of a control loop")
                .param(
                    ParamSpec::new("Loop", ParamType::Int)
                        .with_tooltip("1 or 2")
                        .with_range(ParamRange::Int { min: 1, max: 2 }),
                )
                .param(
                    ParamSpec::new("Temperature", ParamType::Float)
                        .with_tooltip("K")
                        .with_range(ParamRange::Float { min: 0.0, max: 1500.0 }),
                ),
            CommandDescriptor::reflected("getTemp")
                .described("Read the temperature of an input channel in K")
                .param(channel_param())
                .self_validating(),
            CommandDescriptor::reflected("setHeaterRange")
                .described("Set the heater range; 0 turns the heater off")
                .param(ParamSpec::new("Range", ParamType::Int).with_tooltip("0 to 5"))
                .self_validating(),
            CommandDescriptor::reflected("waitForTemp")
                .described("Wait until a channel reads within the tolerance of a target")
                .param(channel_param())
                .param(ParamSpec::new("Target", ParamType::Float).with_tooltip("K"))
                .param(
                    ParamSpec::new("Tolerance", ParamType::Float)
                        .with_tooltip("K")
                        .with_range(ParamRange::Float { min: 0.0, max: 100.0 }),
                ),
        ]
    }

    async fn invoke(
        &mut self,
        command: &CommandDescriptor,
        args: &[ArgValue],
        ctx: &ExecutionContext,
    ) -> Result<Option<String>> {
        match command.name.as_str() {
            "setTemp" => {
                let loop_number = int_arg(command, args, 0)?;
                let kelvin = float_arg(command, args, 1)?;
                self.device
                    .send(&format!("SETP {loop_number},{kelvin:.3}"))
                    .await?;
                Ok(None)
            }
            "getTemp" => {
                let channel = channel(&text_arg(command, args, 0)?)?;
                if ctx.is_validating() {
                    return Ok(None);
                }
                let kelvin = self.read_temperature(channel).await?;
                Ok(Some(kelvin.to_string()))
            }
            "setHeaterRange" => {
                let range = int_arg(command, args, 0)?;
                if !(0..=MAX_HEATER_RANGE).contains(&range) {
                    return Err(DispatchError::RangeViolation {
                        parameter: "Range".to_string(),
                        value: range.to_string(),
                        min: "0".to_string(),
                        max: MAX_HEATER_RANGE.to_string(),
                    }
                    .into());
                }
                if ctx.is_live() {
                    self.device.send(&format!("RANGE {range}")).await?;
                }
                Ok(None)
            }
            "waitForTemp" => {
                let channel = channel(&text_arg(command, args, 0)?)?;
                let target = float_arg(command, args, 1)?;
                let tolerance = float_arg(command, args, 2)?;
                loop {
                    let kelvin = self.read_temperature(channel).await?;
                    if (kelvin - target).abs() <= tolerance {
                        tracing::info!(channel, kelvin, target, "temperature reached");
                        return Ok(Some(kelvin.to_string()));
                    }
                    tracing::debug!(channel, kelvin, target, "waiting for temperature");
                    if !ctx.sleep(POLL_INTERVAL).await {
                        return Ok(None);
                    }
                }
            }
            _ => Err(unsupported(self.device.alias(), command)),
        }
    }
}
