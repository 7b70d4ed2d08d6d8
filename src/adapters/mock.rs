//! In-memory transports that record traffic instead of touching hardware.
//!
//! Used by the test suite and by `daq_script run --simulate`.

use super::{Transport, TransportError, TransportFactory};
use crate::instrument::connection::ConnectionSpec;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One message seen on a mock wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    /// Connection the message went to, e.g. `GPIB#12`
    pub endpoint: String,
    /// The message without termination
    pub message: String,
}

#[derive(Default)]
struct MockState {
    sent: Vec<WireRecord>,
    replies: HashMap<String, String>,
    refused: HashSet<String>,
    opened: Vec<String>,
    closed: Vec<String>,
    status: u8,
}

/// Factory handing out recording transports. Clones share their record.
#[derive(Clone, Default)]
pub struct MockTransports {
    state: Arc<Mutex<MockState>>,
}

impl MockTransports {
    /// An empty recorder that answers every query with an empty string.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `query` with `reply` on every connection.
    pub fn with_reply(self, query: &str, reply: &str) -> Self {
        self.state().replies.insert(query.to_string(), reply.to_string());
        self
    }

    /// Make opening `endpoint` fail.
    pub fn refusing(self, endpoint: &str) -> Self {
        self.state().refused.insert(endpoint.to_string());
        self
    }

    /// Status byte returned by serial polls.
    pub fn with_status(self, status: u8) -> Self {
        self.state().status = status;
        self
    }

    /// Every message sent so far, in order.
    pub fn sent(&self) -> Vec<WireRecord> {
        self.state().sent.clone()
    }

    /// Messages sent to one endpoint.
    pub fn messages_to(&self, endpoint: &str) -> Vec<String> {
        self.state()
            .sent
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .map(|r| r.message.clone())
            .collect()
    }

    /// Endpoints opened so far.
    pub fn opened(&self) -> Vec<String> {
        self.state().opened.clone()
    }

    /// Endpoints closed so far.
    pub fn closed(&self) -> Vec<String> {
        self.state().closed.clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransports {
    async fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn Transport>> {
        let endpoint = spec.to_string();
        let mut state = self.state();
        if state.refused.contains(&endpoint) {
            return Err(anyhow!("{endpoint} refused the connection"));
        }
        state.opened.push(endpoint.clone());
        Ok(Box::new(MockTransport {
            endpoint,
            state: self.state.clone(),
            open: true,
        }))
    }
}

struct MockTransport {
    endpoint: String,
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl MockTransport {
    fn record(&self, message: &str) -> Result<MutexGuard<'_, MockState>> {
        if !self.open {
            return Err(TransportError::NotConnected.into());
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sent.push(WireRecord {
            endpoint: self.endpoint.clone(),
            message: message.to_string(),
        });
        debug!(target: "comm", "{} <- {}", self.endpoint, message);
        Ok(state)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn describe(&self) -> String {
        format!("mock {}", self.endpoint)
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        self.record(message).map(|_| ())
    }

    async fn query(&mut self, message: &str) -> Result<String> {
        let state = self.record(message)?;
        Ok(state.replies.get(message).cloned().unwrap_or_default())
    }

    async fn read_status(&mut self) -> Result<u8> {
        if !self.open {
            return Err(TransportError::NotConnected.into());
        }
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).status)
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .closed
                .push(self.endpoint.clone());
        }
        Ok(())
    }
}
