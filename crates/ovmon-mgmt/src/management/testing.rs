//! In-memory transport and connector for unit tests.

use crate::management::transport::{Connector, Transport};
use crate::management::types::*;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Everything a scripted transport observed.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub sent: Vec<String>,
    pub reads: usize,
    pub closes: usize,
    pub opens: usize,
}

impl TransportLog {
    pub fn count_sent(&self, command: &str) -> usize {
        let line = format!("{}\n", command);
        self.sent.iter().filter(|s| **s == line).count()
    }
}

/// Replies with canned chunks keyed by command. Reading with nothing queued
/// behaves like a read timeout.
#[derive(Clone)]
pub struct ScriptedTransport {
    replies: HashMap<String, Vec<String>>,
    pending: VecDeque<String>,
    log: Arc<Mutex<TransportLog>>,
    open: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            pending: VecDeque::new(),
            log: Arc::new(Mutex::new(TransportLog::default())),
            open: true,
        }
    }

    pub fn reply(self, command: &str, reply: &str) -> Self {
        self.reply_chunks(command, &[reply])
    }

    pub fn reply_chunks(mut self, command: &str, chunks: &[&str]) -> Self {
        self.replies
            .insert(command.to_string(), chunks.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn log(&self) -> Arc<Mutex<TransportLog>> {
        self.log.clone()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, data: &[u8]) -> MonitorResult<()> {
        if !self.open {
            return Err(MonitorError::not_connected());
        }
        let line = String::from_utf8_lossy(data).into_owned();
        if let Some(chunks) = self.replies.get(line.trim_end_matches('\n')) {
            self.pending.extend(chunks.iter().cloned());
        }
        self.log.lock().unwrap().sent.push(line);
        Ok(())
    }

    async fn receive_chunk(&mut self) -> MonitorResult<Vec<u8>> {
        self.log.lock().unwrap().reads += 1;
        match self.pending.pop_front() {
            Some(chunk) => Ok(chunk.into_bytes()),
            None => Err(MonitorError::new(MonitorErrorKind::Timeout, "scripted read timeout")),
        }
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Hands out clones of one scripted transport, or a fixed error.
pub struct ScriptedConnector {
    transport: ScriptedTransport,
    failure: Option<MonitorError>,
}

impl ScriptedConnector {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self {
            transport,
            failure: None,
        }
    }

    pub fn failing(error: MonitorError) -> Self {
        Self {
            transport: ScriptedTransport::new(),
            failure: Some(error),
        }
    }

    pub fn log(&self) -> Arc<Mutex<TransportLog>> {
        self.transport.log()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn open(
        &self,
        _endpoint: &VpnEndpoint,
        _options: &ClientOptions,
    ) -> MonitorResult<ScriptedTransport> {
        self.transport.log.lock().unwrap().opens += 1;
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(self.transport.clone()),
        }
    }
}
