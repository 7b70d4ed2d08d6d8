//! Script housekeeping that needs no hardware: waiting and status messages.

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
use chrono::{Local, NaiveTime};
use std::time::Duration;

/// Name used in MAKE lines.
pub const DISPLAY_NAME: &str = "Utility";

const WAIT: &str = "Wait";
const WAIT_UNTIL: &str = "WaitUntil";
const STATUS_MESSAGE: &str = "StatusMessage";
const TIME_FORMAT: &str = "%H:%M:%S";

/// The `Utility` pseudo-instrument, made with connection `none`.
#[derive(Default)]
pub struct Utility {
    device: DeviceLink,
}

impl Utility {
    /// An unopened instance.
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_time(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text.trim(), TIME_FORMAT).map_err(|_| {
        DispatchError::TypeConversion {
            value: text.to_string(),
            expected: "a time of day (hh:mm:ss)".to_string(),
        }
        .into()
    })
}

/// Time from `now` until the next occurrence of `target`, today or tomorrow.
fn until_next(now: NaiveTime, target: NaiveTime) -> Duration {
    let mut delta = target.signed_duration_since(now);
    if delta < chrono::Duration::zero() {
        delta += chrono::Duration::days(1);
    }
    delta.to_std().unwrap_or_default()
}

#[async_trait]
impl Instrument for Utility {
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
            CommandDescriptor::reflected(WAIT)
                .described("Pause the script")
                .param(
                    ParamSpec::new("Seconds", ParamType::Float)
                        .with_range(ParamRange::Float { min: 0.0, max: 1e6 }),
                ),
            CommandDescriptor::reflected(WAIT_UNTIL)
                .described("Pause the script until the given time of day")
                .param(ParamSpec::new("Time", ParamType::String).with_tooltip("hh:mm:ss"))
                .self_validating(),
            CommandDescriptor::reflected(STATUS_MESSAGE)
                .described("Show a message in the status log")
                .param(ParamSpec::new("Message", ParamType::String)),
        ]
    }

    async fn invoke(
        &mut self,
        command: &CommandDescriptor,
        args: &[ArgValue],
        ctx: &ExecutionContext,
    ) -> Result<Option<String>> {
        match command.name.as_str() {
            WAIT => {
                let seconds = float_arg(command, args, 0)?;
                if ctx.is_live() && !ctx.sleep(Duration::from_secs_f64(seconds)).await {
                    tracing::debug!("wait cut short by stop");
                }
                Ok(None)
            }
            WAIT_UNTIL => {
                let target = parse_time(&text_arg(command, args, 0)?)?;
                if ctx.is_validating() {
                    return Ok(None);
                }
                let wait = until_next(Local::now().time(), target);
                tracing::info!(until = %target, seconds = wait.as_secs(), "waiting");
                ctx.sleep(wait).await;
                Ok(None)
            }
            STATUS_MESSAGE => {
                let message = text_arg(command, args, 0)?;
                if ctx.is_live() {
                    tracing::info!(target: "status", alias = %self.device.alias(), "{message}");
                }
                Ok(None)
            }
            _ => Err(unsupported(self.device.alias(), command)),
        }
    }
}
