//! Streaming execution client
//!
//! Runs one templated query at a time: validates and resolves variables,
//! renders the statement, submits it to an [`ExecutionBackend`] and folds the
//! streamed batches into a [`ResultSet`] while publishing coalesced
//! [`StreamUpdate`]s.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlstencil_core::{Batch, ColumnMeta, MissingVariable, ResultSet, ValidationWarning, Variable};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::backend::{ExecutionBackend, ExecutionRequest};
use super::frames::Frame;
use crate::error::{ExecutionError, ExecutionResult, StreamError};
use crate::variables::{Criteria, VariableResolver, scan};

/// A saved query: template text plus its variable definitions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    pub template: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl QueryDefinition {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            variables: Vec::new(),
        }
    }

    pub fn with_variables(mut self, variables: Vec<Variable>) -> Self {
        self.variables = variables;
        self
    }
}

/// Configuration options for the streaming client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Minimum spacing between batch updates after the first one
    pub flush_interval: Duration,
    /// How long to wait for the backend to start answering
    pub request_timeout: Duration,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(32),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Lifecycle of an execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// Nothing running; also the state of a run blocked by missing variables
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Errored,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Cancelled | ExecutionState::Errored
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Cancelled => "cancelled",
            ExecutionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Progress published while an execution runs
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    /// The rendered statement was submitted
    Started { sql: String },
    Columns(Vec<ColumnMeta>),
    /// Newly received batches since the previous update
    Batches { batches: Vec<Batch>, total_rows: u64 },
    Finished(ExecutionState),
}

/// Outcome of one execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub state: ExecutionState,
    /// The rendered statement (empty when rendering never happened)
    pub sql: String,
    pub result: ResultSet,
    pub missing: Vec<MissingVariable>,
    pub warnings: Vec<ValidationWarning>,
    pub error: Option<String>,
    /// Wall-clock duration, recorded only for completed runs
    pub execution_time: Option<Duration>,
}

impl ExecutionReport {
    /// Collapse the report into the result set or the reason there is none
    pub fn into_result(self) -> ExecutionResult<ResultSet> {
        match self.state {
            ExecutionState::Completed => Ok(self.result),
            ExecutionState::Cancelled => Err(ExecutionError::Cancelled),
            ExecutionState::Errored => Err(ExecutionError::Failed(self.error.unwrap_or_default())),
            ExecutionState::Idle | ExecutionState::Running => Err(ExecutionError::MissingVariables(
                self.missing.into_iter().map(|m| m.name).collect(),
            )),
        }
    }
}

#[derive(Debug, Default)]
struct ClientState {
    state: ExecutionState,
    token: Option<CancellationToken>,
}

/// Leaves the shared state consistent if an execution future is dropped
/// before it finishes.
struct RunGuard {
    shared: Arc<Mutex<ClientState>>,
}

impl RunGuard {
    fn finish(self, state: ExecutionState) {
        let mut shared = self.shared.lock();
        shared.state = state;
        shared.token = None;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        if shared.state == ExecutionState::Running {
            shared.state = ExecutionState::Cancelled;
            shared.token = None;
        }
    }
}

/// Streaming query client; one execution in flight at a time
pub struct StreamingClient {
    backend: Arc<dyn ExecutionBackend>,
    resolver: VariableResolver,
    options: ClientOptions,
    shared: Arc<Mutex<ClientState>>,
}

impl StreamingClient {
    pub fn new(backend: Arc<dyn ExecutionBackend>, options: ClientOptions) -> Self {
        Self {
            backend,
            resolver: VariableResolver::default(),
            options,
            shared: Arc::new(Mutex::new(ClientState::default())),
        }
    }

    pub fn with_resolver(mut self, resolver: VariableResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn state(&self) -> ExecutionState {
        self.shared.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ExecutionState::Running
    }

    /// Trigger the in-flight execution's token.
    ///
    /// Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        let shared = self.shared.lock();
        match &shared.token {
            Some(token) => {
                tracing::debug!("cancelling execution");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute a templated query.
    ///
    /// Missing required variables produce an `Idle` report without contacting
    /// the backend. Stream and transport failures are reported as `Errored`,
    /// unless `cancel` fired first, in which case the run is `Cancelled`.
    /// Only a concurrent run is returned as an error.
    #[tracing::instrument(skip(self, query, criteria, cancel, updates), fields(connection_id = %connection_id, session_id = %session_id))]
    pub async fn execute(
        &self,
        query: &QueryDefinition,
        criteria: &Criteria,
        connection_id: &str,
        session_id: &str,
        cancel: CancellationToken,
        updates: UnboundedSender<StreamUpdate>,
    ) -> ExecutionResult<ExecutionReport> {
        if self.is_running() {
            return Err(ExecutionError::AlreadyRunning);
        }

        let mut resolution = self.resolver.resolve_all(&query.variables, criteria);
        let referenced = scan(&query.template);
        resolution.missing.retain(|m| referenced.contains(&m.name));

        let mut report = ExecutionReport {
            warnings: resolution.warnings.clone(),
            ..ExecutionReport::default()
        };

        if !resolution.missing.is_empty() {
            tracing::debug!(missing = resolution.missing.len(), "execution blocked by missing variables");
            report.missing = resolution.missing;
            return Ok(report);
        }

        let rendered = self.resolver.renderer().render(&query.template, &resolution.context);
        if let Some(message) = rendered.error {
            tracing::warn!(error = %message, "template failed to render");
            {
                let mut shared = self.shared.lock();
                if shared.state == ExecutionState::Running {
                    return Err(ExecutionError::AlreadyRunning);
                }
                shared.state = ExecutionState::Errored;
            }
            report.state = ExecutionState::Errored;
            report.error = Some(ExecutionError::Render(message).to_string());
            let _ = updates.send(StreamUpdate::Finished(report.state));
            return Ok(report);
        }
        report.sql = rendered.sql;

        let guard = {
            let mut shared = self.shared.lock();
            if shared.state == ExecutionState::Running {
                return Err(ExecutionError::AlreadyRunning);
            }
            shared.state = ExecutionState::Running;
            shared.token = Some(cancel.clone());
            RunGuard {
                shared: self.shared.clone(),
            }
        };

        let request = ExecutionRequest {
            query: report.sql.clone(),
            criteria: resolution.criteria,
            connection_id: connection_id.to_string(),
            session_id: session_id.to_string(),
        };
        let _ = updates.send(StreamUpdate::Started {
            sql: report.sql.clone(),
        });

        let start = Instant::now();
        let outcome = self
            .consume(&request, &cancel, &mut report.result, &updates)
            .await;

        report.state = match outcome {
            Ok(true) => {
                report.execution_time = Some(start.elapsed());
                ExecutionState::Completed
            }
            Ok(false) => ExecutionState::Cancelled,
            Err(err) if cancel.is_cancelled() => {
                tracing::debug!(error = %err, "stream failed after cancellation");
                ExecutionState::Cancelled
            }
            Err(err) => {
                tracing::warn!(error = %err, "result stream failed");
                report.error = Some(err.to_string());
                ExecutionState::Errored
            }
        };

        guard.finish(report.state);
        let _ = updates.send(StreamUpdate::Finished(report.state));

        tracing::info!(
            state = %report.state,
            batches = report.result.batch_count(),
            rows = report.result.total_rows(),
            duration_ms = report.execution_time.map(|d| d.as_millis() as u64),
            "Execution finished"
        );
        Ok(report)
    }

    /// Drive the stream to its end. Returns `Ok(false)` when stopped by the
    /// token.
    async fn consume(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
        result: &mut ResultSet,
        updates: &UnboundedSender<StreamUpdate>,
    ) -> Result<bool, StreamError> {
        let source = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(false),
            source = self.backend.open(request) => source?,
        };

        let mut decoder = source.encoding.decoder();
        let mut body = source.body;
        let mut flusher = Flusher::new(self.options.flush_interval, updates);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    flusher.flush(result);
                    return Ok(false);
                }
                _ = sleep_until(flusher.deadline()), if flusher.has_pending() => {
                    flusher.flush(result);
                    continue;
                }
                chunk = body.next() => chunk,
            };

            let frames = match chunk {
                Some(bytes) => decoder.push(&bytes?)?,
                None => {
                    let frames = decoder.finish()?;
                    apply_frames(frames, result, &mut flusher)?;
                    break;
                }
            };
            apply_frames(frames, result, &mut flusher)?;
            if flusher.is_due() {
                flusher.flush(result);
            }
        }

        flusher.flush(result);
        Ok(true)
    }
}

fn apply_frames(frames: Vec<Frame>, result: &mut ResultSet, flusher: &mut Flusher<'_>) -> Result<(), StreamError> {
    for frame in frames {
        match frame {
            Frame::Meta(columns) => {
                result.set_columns(columns.clone());
                flusher.send(StreamUpdate::Columns(columns));
            }
            Frame::Batch(batch) => {
                result.push_batch(batch.clone());
                flusher.push(batch, result);
            }
            Frame::Error(message) => return Err(StreamError::Remote(message)),
        }
    }
    Ok(())
}

/// Coalesces batch updates: the first batch goes out at once, later ones at
/// most once per interval.
struct Flusher<'a> {
    interval: Duration,
    updates: &'a UnboundedSender<StreamUpdate>,
    pending: Vec<Batch>,
    last_flush: Option<Instant>,
}

impl<'a> Flusher<'a> {
    fn new(interval: Duration, updates: &'a UnboundedSender<StreamUpdate>) -> Self {
        Self {
            interval,
            updates,
            pending: Vec::new(),
            last_flush: None,
        }
    }

    fn send(&self, update: StreamUpdate) {
        // a dropped receiver only means nobody is watching
        let _ = self.updates.send(update);
    }

    fn push(&mut self, batch: Batch, result: &ResultSet) {
        self.pending.push(batch);
        if self.last_flush.is_none() {
            self.flush(result);
        }
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn deadline(&self) -> Instant {
        match self.last_flush {
            Some(at) => at + self.interval,
            None => Instant::now(),
        }
    }

    fn is_due(&self) -> bool {
        self.has_pending() && Instant::now() >= self.deadline()
    }

    fn flush(&mut self, result: &ResultSet) {
        if self.pending.is_empty() {
            return;
        }
        let batches = std::mem::take(&mut self.pending);
        self.send(StreamUpdate::Batches {
            batches,
            total_rows: result.total_rows(),
        });
        self.last_flush = Some(Instant::now());
    }
}
