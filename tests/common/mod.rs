//! Shared fixtures: a handler that counts what happens to it.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use daq_script::adapters::{MockTransports, Transport};
use daq_script::dispatcher::ExecutionContext;
use daq_script::instrument::{
    ArgValue, CommandDescriptor, ConnectionSpec, DeviceLink, Instrument, ParamRange, ParamSpec,
    ParamType, TransportKind,
};
use daq_script::scripting::RhaiEngine;
use daq_script::{Dispatcher, HandlerRegistry, Settings};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters shared by every `Recorder` made from one registry.
#[derive(Default)]
pub struct Counters {
    pub opened: AtomicUsize,
    pub touched: AtomicUsize,
    pub checked: AtomicUsize,
    pub holding: AtomicUsize,
    pub closed: AtomicUsize,
    pub fail_close: AtomicBool,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Test handler.
///
/// - `touch`: side effect, live pass only
/// - `check Level`: self-validating, runs in both passes
/// - `hold`: sleeps until stopped
/// - `pauseHere`: pauses the run from inside the handler
pub struct Recorder {
    device: DeviceLink,
    counters: Arc<Counters>,
}

#[async_trait]
impl Instrument for Recorder {
    async fn open(
        &mut self,
        alias: &str,
        connection: &ConnectionSpec,
        link: Box<dyn Transport>,
    ) -> Result<()> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.device.attach(alias, connection, link).await
    }

    async fn close(&mut self) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        self.device.close().await?;
        if self.counters.fail_close.load(Ordering::SeqCst) {
            bail!("recorder refused to close");
        }
        Ok(())
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        self.device.send(message).await
    }

    async fn query(&mut self, message: &str) -> Result<String> {
        self.device.query(message).await
    }

    fn list_commands(&self) -> Vec<CommandDescriptor> {
        vec![
            CommandDescriptor::reflected("touch"),
            CommandDescriptor::reflected("check")
                .param(
                    ParamSpec::new("Level", ParamType::Int)
                        .with_range(ParamRange::Int { min: 0, max: 9 }),
                )
                .self_validating(),
            CommandDescriptor::reflected("hold"),
            CommandDescriptor::reflected("pauseHere"),
        ]
    }

    async fn invoke(
        &mut self,
        command: &CommandDescriptor,
        _args: &[ArgValue],
        ctx: &ExecutionContext,
    ) -> Result<Option<String>> {
        match command.name.as_str() {
            "touch" => {
                self.counters.touched.fetch_add(1, Ordering::SeqCst);
                self.device.send("TOUCH").await?;
            }
            "check" => {
                self.counters.checked.fetch_add(1, Ordering::SeqCst);
            }
            "hold" => {
                self.counters.holding.fetch_add(1, Ordering::SeqCst);
                ctx.sleep(Duration::from_secs(60)).await;
            }
            "pauseHere" => ctx.control().pause(),
            other => bail!("no command {other}"),
        }
        Ok(None)
    }
}

/// Built-ins plus `Recorder` (connections `none` and GPIB).
pub fn registry(counters: &Arc<Counters>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::with_builtins().unwrap();
    let counters = counters.clone();
    registry
        .register(
            "Recorder",
            "recorder",
            &[TransportKind::None, TransportKind::Gpib],
            move || {
                Box::new(Recorder {
                    device: DeviceLink::new(),
                    counters: counters.clone(),
                })
            },
        )
        .unwrap();
    registry
}

pub fn dispatcher(
    counters: &Arc<Counters>,
    mock: &MockTransports,
    settings: Settings,
) -> Dispatcher {
    Dispatcher::new(
        registry(counters),
        Arc::new(mock.clone()),
        Arc::new(RhaiEngine::default()),
        Arc::new(settings),
    )
}

/// Settings with a short stop grace period.
pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.dispatcher.stop_grace_ms = 10;
    settings
}

pub fn lines(text: &str) -> Vec<String> {
    text.lines().map(|l| l.trim_start().to_string()).collect()
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
