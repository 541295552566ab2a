// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Window controller
//
// Owns the single recording session of this process. The control surface
// talks to `RecorderManager`; one spawned worker receives messages,
// classifies them against the window and feeds the schema store.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RecorderConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::message::{SchemaHeader, Timestamp};
use crate::protocol::{Statistics, WriterStatus};
use crate::schema::{ChannelSchemaStore, SessionMetadata, REQUIRED_PARAMETERS};
use crate::storage::AppendEngine;
use crate::stream::StreamConnector;
use crate::window::{Boundary, Classification, Position, Window};

/// Lifecycle of the recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecorderState {
    Idle = 0,
    Starting = 1,
    Recording = 2,
    Closed = 3,
    Failed = 4,
}

impl RecorderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RecorderState::Idle,
            1 => RecorderState::Starting,
            2 => RecorderState::Recording,
            3 => RecorderState::Closed,
            _ => RecorderState::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecorderState::Idle => "idle",
            RecorderState::Starting => "starting",
            RecorderState::Recording => "recording",
            RecorderState::Closed => "closed",
            RecorderState::Failed => "failed",
        }
    }

    pub fn status(self) -> WriterStatus {
        match self {
            RecorderState::Idle => WriterStatus::Waiting,
            RecorderState::Starting | RecorderState::Recording => WriterStatus::Writing,
            RecorderState::Closed => WriterStatus::Finished,
            RecorderState::Failed => WriterStatus::Error,
        }
    }
}

/// How the process should end, reported to the entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Stop boundary reached and the file was closed
    Completed,
    /// `stop` command
    Stopped,
    /// `kill` command
    Killed,
    /// Unrecoverable fault in the session worker
    Fatal,
}

impl Termination {
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Completed | Termination::Stopped | Termination::Killed => 0,
            Termination::Fatal => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecorderSettings {
    pub receive_timeout: Duration,
    pub startup_timeout: Duration,
}

impl RecorderSettings {
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self {
            receive_timeout: config.stream.receive_timeout(),
            startup_timeout: config.writer.startup_timeout(),
        }
    }
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self::from_config(&RecorderConfig::default())
    }
}

/// State shared between the controller and the session worker
struct SessionState {
    state: AtomicU8,
    running: AtomicBool,
    window: RwLock<Window>,
    observed: AtomicBool,
    last_pulse_id: AtomicU64,
    last_timestamp_bits: AtomicU64,
    rows_written: AtomicU64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(RecorderState::Idle as u8),
            running: AtomicBool::new(false),
            window: RwLock::new(Window::default()),
            observed: AtomicBool::new(false),
            last_pulse_id: AtomicU64::new(0),
            last_timestamp_bits: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
        }
    }

    fn state(&self) -> RecorderState {
        RecorderState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RecorderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: RecorderState, to: RecorderState) -> Result<(), RecorderState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(RecorderState::from_u8)
    }

    fn observe(&self, position: &Position) {
        self.last_pulse_id.store(position.pulse_id, Ordering::Relaxed);
        self.last_timestamp_bits
            .store(position.timestamp.to_bits(), Ordering::Relaxed);
        self.observed.store(true, Ordering::Release);
    }

    /// Readers may see a pulse id and timestamp from adjacent messages
    fn last_observed(&self) -> Option<Position> {
        if !self.observed.load(Ordering::Acquire) {
            return None;
        }
        Some(Position {
            pulse_id: self.last_pulse_id.load(Ordering::Relaxed),
            timestamp: f64::from_bits(self.last_timestamp_bits.load(Ordering::Relaxed)),
        })
    }
}

/// Controller for the one recording session of this process
pub struct RecorderManager {
    connector: Arc<dyn StreamConnector>,
    engine: Mutex<Option<Box<dyn AppendEngine>>>,
    parameters: RwLock<Option<SessionMetadata>>,
    shared: Arc<SessionState>,
    settings: RecorderSettings,
    terminator: mpsc::UnboundedSender<Termination>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecorderManager {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        engine: Box<dyn AppendEngine>,
        settings: RecorderSettings,
        terminator: mpsc::UnboundedSender<Termination>,
    ) -> Self {
        Self {
            connector,
            engine: Mutex::new(Some(engine)),
            parameters: RwLock::new(None),
            shared: Arc::new(SessionState::new()),
            settings,
            terminator,
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.shared.state()
    }

    pub fn get_status(&self) -> WriterStatus {
        self.state().status()
    }

    /// Set the session metadata used by the next start
    pub async fn set_parameters(&self, value: serde_json::Value) -> RecorderResult<()> {
        let state = self.state();
        if state != RecorderState::Idle {
            return Err(RecorderError::InvalidState {
                operation: "set parameters",
                state: state.as_str(),
            });
        }

        let metadata = SessionMetadata::from_json(value)?;
        info!("Session parameters set: {}", metadata.to_json());
        *self.parameters.write().await = Some(metadata);
        Ok(())
    }

    pub async fn get_parameters(&self) -> Option<serde_json::Value> {
        self.parameters.read().await.as_ref().map(|m| m.to_json())
    }

    /// Start the session and wait until the worker is receiving
    ///
    /// Without an explicit boundary the session starts at the current time.
    /// A worker that does not confirm in time is fatal to the process.
    pub async fn start(&self, start: Option<Boundary>) -> RecorderResult<()> {
        self.shared
            .transition(RecorderState::Idle, RecorderState::Starting)
            .map_err(|state| RecorderError::InvalidState {
                operation: "start",
                state: state.as_str(),
            })?;

        let Some(metadata) = self.parameters.read().await.clone() else {
            self.shared.set_state(RecorderState::Idle);
            return Err(RecorderError::MissingParameters {
                required: REQUIRED_PARAMETERS.iter().map(|k| k.to_string()).collect(),
                received: Vec::new(),
            });
        };

        let Some(engine) = self.engine.lock().await.take() else {
            self.shared.set_state(RecorderState::Failed);
            return Err(RecorderError::InvalidState {
                operation: "start",
                state: "closed",
            });
        };

        let boundary = start.unwrap_or_else(Boundary::now);
        *self.shared.window.write().await = Window::new(Some(boundary));
        self.shared.running.store(true, Ordering::Release);

        info!(
            "Starting recording at {} from '{}'",
            boundary,
            self.connector.address()
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = SessionWorker {
            connector: self.connector.clone(),
            store: ChannelSchemaStore::new(engine, metadata),
            shared: self.shared.clone(),
            receive_timeout: self.settings.receive_timeout,
            terminator: self.terminator.clone(),
        };
        *self.worker.lock().await = Some(tokio::spawn(worker.run(ready_tx)));

        match tokio::time::timeout(self.settings.startup_timeout, ready_rx).await {
            Ok(Ok(())) => {
                info!("Writer confirmed it is receiving");
                Ok(())
            }
            Ok(Err(_)) => Err(RecorderError::Transport(format!(
                "writer failed before receiving from '{}'",
                self.connector.address()
            ))),
            Err(_) => {
                error!(
                    "Writer did not start receiving within {:?}",
                    self.settings.startup_timeout
                );
                self.shared.running.store(false, Ordering::Release);
                self.shared.set_state(RecorderState::Failed);
                if let Some(handle) = self.worker.lock().await.take() {
                    handle.abort();
                }
                let _ = self.terminator.send(Termination::Fatal);
                Err(RecorderError::StartupTimeout(self.settings.startup_timeout))
            }
        }
    }

    /// Record the stop boundary; the worker acts on it
    pub async fn request_stop(&self, stop: Option<Boundary>) -> RecorderResult<()> {
        let state = self.state();
        if !matches!(state, RecorderState::Starting | RecorderState::Recording) {
            return Err(RecorderError::InvalidState {
                operation: "stop",
                state: state.as_str(),
            });
        }

        let boundary = stop.unwrap_or_else(Boundary::now);
        info!("Stop boundary set at {}", boundary);
        self.shared.window.write().await.stop = Some(boundary);
        Ok(())
    }

    pub async fn get_statistics(&self) -> Statistics {
        let window = *self.shared.window.read().await;
        let last = self.shared.last_observed();

        Statistics {
            last_pulse_id: last.map(|p| p.pulse_id),
            last_timestamp: last.map(|p| p.timestamp),
            rows_written: self.shared.rows_written.load(Ordering::Relaxed),
            ..Statistics::from_window(&window)
        }
    }

    /// Close the session if one is running and wait for the worker
    pub async fn shutdown(&self) {
        self.shared.running.store(false, Ordering::Release);

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Session worker ended abnormally: {}", e);
            }
        }
    }

    /// Close the session, then terminate the process
    pub async fn stop(&self) {
        info!("Stop requested, closing session");
        self.shutdown().await;
        let _ = self.terminator.send(Termination::Stopped);
    }

    /// Terminate the process without closing the session
    pub async fn kill(&self) {
        warn!("Kill requested");
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().await.take() {
            handle.abort();
        }
        let _ = self.terminator.send(Termination::Killed);
    }
}

enum SessionEnd {
    /// Stop boundary passed
    Completed,
    /// Running flag cleared from outside
    Stopped,
}

struct SessionWorker {
    connector: Arc<dyn StreamConnector>,
    store: ChannelSchemaStore,
    shared: Arc<SessionState>,
    receive_timeout: Duration,
    terminator: mpsc::UnboundedSender<Termination>,
}

impl SessionWorker {
    async fn run(mut self, ready: oneshot::Sender<()>) {
        match self.receive_loop(ready).await {
            Ok(SessionEnd::Completed) => {
                self.shared.set_state(RecorderState::Closed);
                info!(
                    "Recording completed with {} rows",
                    self.store.rows_written()
                );
                let _ = self.terminator.send(Termination::Completed);
            }
            Ok(SessionEnd::Stopped) => {
                self.shared.set_state(RecorderState::Closed);
                info!("Recording stopped with {} rows", self.store.rows_written());
            }
            Err(e) => {
                error!("Recording failed: {}", e);
                self.shared.running.store(false, Ordering::Release);
                self.shared.set_state(RecorderState::Failed);
                if let Err(close_err) = self.store.close().await {
                    error!("Failed to close output after fault: {}", close_err);
                }
                let _ = self.terminator.send(Termination::Fatal);
            }
        }
    }

    async fn receive_loop(&mut self, ready: oneshot::Sender<()>) -> RecorderResult<SessionEnd> {
        let mut source = self
            .connector
            .connect()
            .await
            .map_err(|e| RecorderError::Transport(format!("{:#}", e)))?;
        self.store.open().await?;

        self.shared.set_state(RecorderState::Recording);
        let _ = ready.send(());

        // Header carried by a discarded message, still owed to the store
        let mut pending_header: Option<SchemaHeader> = None;

        loop {
            if !self.shared.running.load(Ordering::Acquire) {
                self.store.close().await?;
                return Ok(SessionEnd::Stopped);
            }

            let received = source
                .receive(self.receive_timeout)
                .await
                .map_err(|e| RecorderError::Transport(format!("{:#}", e)))?;

            let Some(mut message) = received else {
                let window = *self.shared.window.read().await;
                let last = self.shared.last_observed();
                let now = Timestamp::now().as_f64();
                if window.should_stop_idle(last.as_ref(), now, self.receive_timeout) {
                    info!("Stream idle past the stop boundary");
                    self.store.finalize(window.stop).await?;
                    return Ok(SessionEnd::Completed);
                }
                continue;
            };

            let position = Position::of(&message);
            self.shared.observe(&position);

            let window = *self.shared.window.read().await;
            match window.classify(&position) {
                Classification::TooEarly => {
                    debug!("Discarding pulse_id {}: before start", position.pulse_id);
                    if let Some(header) = message.header {
                        pending_header = Some(header);
                    }
                }
                Classification::TooLate => {
                    info!(
                        "Received pulse_id {} after the stop boundary",
                        position.pulse_id
                    );
                    self.store.finalize(window.stop).await?;
                    return Ok(SessionEnd::Completed);
                }
                Classification::InWindow => {
                    if message.header.is_none() {
                        message.header = pending_header.take();
                    } else {
                        pending_header = None;
                    }
                    self.store.write(&message).await?;
                    self.shared
                        .rows_written
                        .store(self.store.rows_written(), Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChannelDefinition, ChannelType, Message};
    use crate::storage::MemoryEngine;
    use crate::stream::{memory_stream, MemoryConnector, MemorySink, StreamSource};
    use async_trait::async_trait;

    /// Connector whose connection attempt never finishes
    struct HangingConnector;

    #[async_trait]
    impl StreamConnector for HangingConnector {
        async fn connect(&self) -> anyhow::Result<Box<dyn StreamSource>> {
            std::future::pending().await
        }

        fn address(&self) -> String {
            "hanging".to_string()
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl StreamConnector for RefusingConnector {
        async fn connect(&self) -> anyhow::Result<Box<dyn StreamSource>> {
            anyhow::bail!("connection refused")
        }

        fn address(&self) -> String {
            "refusing".to_string()
        }
    }

    fn manager_with(
        connector: Arc<dyn StreamConnector>,
        settings: RecorderSettings,
    ) -> (RecorderManager, MemoryEngine, mpsc::UnboundedReceiver<Termination>) {
        let engine = MemoryEngine::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = RecorderManager::new(connector, Box::new(engine.clone()), settings, tx);
        (manager, engine, rx)
    }

    fn parameters() -> serde_json::Value {
        serde_json::json!({
            "general/created": "2024-01-01T00:00:00",
            "general/user": "p11057",
            "general/process": "test",
            "general/instrument": "bench",
        })
    }

    fn settings() -> RecorderSettings {
        RecorderSettings {
            receive_timeout: Duration::from_millis(20),
            startup_timeout: Duration::from_millis(500),
        }
    }

    fn manager() -> (
        RecorderManager,
        MemorySink,
        MemoryEngine,
        mpsc::UnboundedReceiver<Termination>,
    ) {
        let (sink, source) = memory_stream();
        let engine = MemoryEngine::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = RecorderManager::new(
            Arc::new(MemoryConnector::new(source)),
            Box::new(engine.clone()),
            settings(),
            tx,
        );
        (manager, sink, engine, rx)
    }

    fn message(pulse_id: u64) -> Message {
        Message::new(
            pulse_id,
            Timestamp::new(pulse_id as i64, 0),
            vec![Some((pulse_id as i64).into())],
        )
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(RecorderState::Idle.status(), WriterStatus::Waiting);
        assert_eq!(RecorderState::Starting.status(), WriterStatus::Writing);
        assert_eq!(RecorderState::Recording.status(), WriterStatus::Writing);
        assert_eq!(RecorderState::Closed.status(), WriterStatus::Finished);
        assert_eq!(RecorderState::Failed.status(), WriterStatus::Error);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Termination::Completed.exit_code(), 0);
        assert_eq!(Termination::Stopped.exit_code(), 0);
        assert_eq!(Termination::Killed.exit_code(), 0);
        assert_eq!(Termination::Fatal.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_start_requires_parameters() {
        let (manager, _sink, _engine, _rx) = manager();
        let result = manager.start(Some(Boundary::PulseId(0))).await;
        assert!(matches!(result, Err(RecorderError::MissingParameters { .. })));
        assert_eq!(manager.state(), RecorderState::Idle);
    }

    #[tokio::test]
    async fn test_start_only_from_idle() {
        let (manager, _sink, _engine, _rx) = manager();
        manager.set_parameters(parameters()).await.unwrap();
        manager.start(Some(Boundary::PulseId(0))).await.unwrap();
        assert_eq!(manager.get_status(), WriterStatus::Writing);

        let again = manager.start(Some(Boundary::PulseId(0))).await;
        assert!(matches!(again, Err(RecorderError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_stop_requires_session() {
        let (manager, _sink, _engine, _rx) = manager();
        let result = manager.request_stop(Some(Boundary::PulseId(3))).await;
        assert!(matches!(result, Err(RecorderError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_stop_boundary_completes_session() {
        let (manager, sink, engine, mut rx) = manager();
        manager.set_parameters(parameters()).await.unwrap();
        manager.start(Some(Boundary::PulseId(2))).await.unwrap();
        manager.request_stop(Some(Boundary::PulseId(4))).await.unwrap();

        let header = SchemaHeader::new(vec![ChannelDefinition::new(
            "A",
            ChannelType::Int64,
            vec![1],
        )]);
        sink.push(message(0).with_header(header)).unwrap();
        for pulse_id in 1..8 {
            sink.push(message(pulse_id)).unwrap();
        }

        assert_eq!(rx.recv().await, Some(Termination::Completed));
        assert_eq!(manager.get_status(), WriterStatus::Finished);

        let file = engine.snapshot().await;
        assert!(file.closed);
        assert_eq!(file.row_count("/data/A/data"), Some(3));

        let stats = manager.get_statistics().await;
        assert_eq!(stats.start_pulse_id, Some(2));
        assert_eq!(stats.stop_pulse_id, Some(4));
        assert_eq!(stats.last_pulse_id, Some(5));
        assert_eq!(stats.rows_written, 3);
    }

    #[tokio::test]
    async fn test_stop_command_closes_file() {
        let (manager, _sink, engine, mut rx) = manager();
        manager.set_parameters(parameters()).await.unwrap();
        manager.start(None).await.unwrap();

        manager.stop().await;
        assert_eq!(rx.recv().await, Some(Termination::Stopped));
        assert_eq!(manager.get_status(), WriterStatus::Finished);
        assert!(engine.snapshot().await.closed);
    }

    #[tokio::test]
    async fn test_transport_fault_is_fatal() {
        let (manager, sink, _engine, mut rx) = manager();
        manager.set_parameters(parameters()).await.unwrap();
        manager.start(Some(Boundary::PulseId(0))).await.unwrap();

        drop(sink);
        assert_eq!(rx.recv().await, Some(Termination::Fatal));
        assert_eq!(manager.get_status(), WriterStatus::Error);
    }

    #[tokio::test]
    async fn test_startup_timeout_is_fatal() {
        let settings = RecorderSettings {
            receive_timeout: Duration::from_millis(20),
            startup_timeout: Duration::from_millis(50),
        };
        let (manager, engine, mut rx) = manager_with(Arc::new(HangingConnector), settings);
        manager.set_parameters(parameters()).await.unwrap();

        let result = manager.start(Some(Boundary::PulseId(0))).await;
        assert!(matches!(result, Err(RecorderError::StartupTimeout(_))));
        assert_eq!(rx.recv().await, Some(Termination::Fatal));
        assert_eq!(manager.state(), RecorderState::Failed);
        assert_eq!(manager.get_status(), WriterStatus::Error);
        assert!(engine.snapshot().await.datasets.is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_before_ready_is_fatal() {
        let (manager, _engine, mut rx) = manager_with(Arc::new(RefusingConnector), settings());
        manager.set_parameters(parameters()).await.unwrap();

        let result = manager.start(Some(Boundary::PulseId(0))).await;
        assert!(matches!(result, Err(RecorderError::Transport(_))));
        assert_eq!(rx.recv().await, Some(Termination::Fatal));
        assert_eq!(manager.get_status(), WriterStatus::Error);
    }

    #[tokio::test]
    async fn test_malformed_payload_does_not_end_session() {
        let (manager, sink, engine, mut rx) = manager();
        manager.set_parameters(parameters()).await.unwrap();
        manager.start(Some(Boundary::PulseId(0))).await.unwrap();
        manager.request_stop(Some(Boundary::PulseId(2))).await.unwrap();

        let header = SchemaHeader::new(vec![ChannelDefinition::new(
            "A",
            ChannelType::Int64,
            vec![1],
        )]);
        sink.push(message(0).with_header(header)).unwrap();
        sink.push_payload(bytes::Bytes::from_static(b"\x00\x01 not a message"))
            .unwrap();
        for pulse_id in 1..4 {
            sink.push(message(pulse_id)).unwrap();
        }

        assert_eq!(rx.recv().await, Some(Termination::Completed));
        assert_eq!(engine.snapshot().await.row_count("/data/A/data"), Some(3));
    }
}
