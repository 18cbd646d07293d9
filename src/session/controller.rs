//! Session controller — drives one provider session end to end.
//!
//! ```text
//! Idle → Spawning → Discovering → Ready → Invoking → Aggregating → Querying → Closing → Closed
//!                     any unrecoverable error ─→ Failed → Closing → (Failed)
//! ```
//!
//! The provider is torn down on every path out of [`SessionController::run`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::aggregator::{ContextAggregator, EvidenceEntry};
use super::errors::SessionError;
use super::plan::{default_plan, select_invocations, PlannedCall};
use crate::config::{ConfigError, SessionSettings};
use crate::inference::ReasoningBackend;
use crate::mcp_client::{
    spawn_provider, CompletedInvocation, Connection, InvocationCorrelator, InvocationRequest,
    ManagedProvider, ServerConfig, TeardownReport, ToolDescriptor, ToolRegistry,
};

/// Reason given to waiters cancelled by the session deadline.
const DEADLINE_REASON: &str = "session deadline exceeded";

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Spawning,
    Discovering,
    Ready,
    Invoking,
    Aggregating,
    Querying,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Spawning => "spawning",
            SessionState::Discovering => "discovering",
            SessionState::Ready => "ready",
            SessionState::Invoking => "invoking",
            SessionState::Aggregating => "aggregating",
            SessionState::Querying => "querying",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ─── Options & Report ────────────────────────────────────────────────────────

/// Everything a session needs besides the backend.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub provider: ServerConfig,
    pub settings: SessionSettings,
    pub plan: Vec<PlannedCall>,
}

impl SessionOptions {
    /// Options with default settings and the default plan.
    pub fn new(provider: ServerConfig) -> Self {
        Self {
            provider,
            settings: SessionSettings::default(),
            plan: default_plan(),
        }
    }
}

/// What a successful session produced.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub response: String,
    pub evidence: Vec<EvidenceEntry>,
    /// `(tool, message)` for each failed call.
    pub failures: Vec<(String, String)>,
    pub invocations: usize,
    pub teardown: TeardownReport,
    pub final_state: SessionState,
}

// ─── SessionController ───────────────────────────────────────────────────────

pub struct SessionController {
    id: Uuid,
    options: SessionOptions,
    backend: Arc<dyn ReasoningBackend>,
    state: SessionState,
    history: Vec<SessionState>,
    registry: ToolRegistry,
    teardown: Option<TeardownReport>,
}

impl SessionController {
    pub fn new(options: SessionOptions, backend: Arc<dyn ReasoningBackend>) -> Self {
        Self {
            id: Uuid::new_v4(),
            options,
            backend,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            registry: ToolRegistry::new(),
            teardown: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// The discovered catalog. Empty until discovery succeeds.
    pub fn catalog(&self) -> Vec<&ToolDescriptor> {
        self.registry.all_tools()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// How the provider was shut down, once it has been.
    pub fn teardown(&self) -> Option<&TeardownReport> {
        self.teardown.as_ref()
    }

    /// Run the whole session once: spawn, discover, invoke the plan,
    /// aggregate, ask the backend, tear down.
    pub async fn run(&mut self, user_query: &str) -> Result<SessionReport, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Config(ConfigError {
                reason: format!("session {} already ran (state {})", self.id, self.state),
            }));
        }

        tracing::info!(session_id = %self.id, provider = %self.options.provider.display_name(), "session starting");

        self.transition(SessionState::Spawning);
        let launch = self.options.settings.launch_settings();
        let mut provider = match spawn_provider(&self.options.provider, launch).await {
            Ok(provider) => provider,
            Err(e) => {
                let err = SessionError::from_open(e);
                self.fail(&err);
                // spawn_provider never hands back a half-open process.
                self.transition(SessionState::Closing);
                self.finish(false);
                return Err(err);
            }
        };

        let result = self.drive(&mut provider, user_query).await;
        if let Err(e) = &result {
            self.fail(e);
        }

        self.transition(SessionState::Closing);
        let teardown = provider.shutdown().await;
        self.teardown = Some(teardown.clone());
        self.finish(result.is_ok());

        let (response, aggregator, invocations) = result?;
        Ok(SessionReport {
            session_id: self.id,
            response,
            evidence: aggregator.evidence().to_vec(),
            failures: aggregator.failures().to_vec(),
            invocations,
            teardown,
            final_state: self.state,
        })
    }

    // ─── Phases ──────────────────────────────────────────────────────────

    async fn drive(
        &mut self,
        provider: &mut ManagedProvider,
        user_query: &str,
    ) -> Result<(String, ContextAggregator, usize), SessionError> {
        let connection = provider.connection();

        self.transition(SessionState::Discovering);
        let discovery_timeout = self.options.settings.launch_settings().init_timeout;
        self.registry
            .discover(&connection, discovery_timeout)
            .await
            .map_err(SessionError::from_open)?;

        self.transition(SessionState::Ready);
        self.settle(provider, &connection).await?;

        let requests = select_invocations(&self.options.plan, &self.registry);
        let invocations = requests.len();

        self.transition(SessionState::Invoking);
        let completed = self.invoke(&connection, requests).await?;
        self.ensure_connected(provider, &connection)?;

        self.transition(SessionState::Aggregating);
        let mut aggregator = ContextAggregator::new();
        for done in &completed {
            aggregator.record(&done.outcome, &done.request.tool_name, &done.request.arguments);
        }
        let system_prompt = aggregator.system_prompt();
        tracing::info!(
            session_id = %self.id,
            evidence = aggregator.len(),
            failures = aggregator.failures().len(),
            "context aggregated"
        );

        self.transition(SessionState::Querying);
        tracing::info!(session_id = %self.id, backend = %self.backend.describe(), "querying backend");
        let response = self.backend.complete(&system_prompt, user_query).await?;

        Ok((response, aggregator, invocations))
    }

    async fn invoke(
        &self,
        connection: &Arc<Connection>,
        requests: Vec<InvocationRequest>,
    ) -> Result<Vec<CompletedInvocation>, SessionError> {
        let settings = &self.options.settings;
        let correlator = InvocationCorrelator::new(Arc::clone(connection), self.registry.clone())
            .with_call_timeout(settings.call_timeout())
            .with_max_concurrent(settings.max_concurrent_calls);

        let calls = correlator.invoke_all(requests);
        let Some(deadline) = settings.deadline() else {
            return Ok(calls.await);
        };

        tokio::pin!(calls);
        match tokio::time::timeout(deadline, &mut calls).await {
            Ok(completed) => Ok(completed),
            Err(_) => {
                tracing::warn!(
                    session_id = %self.id,
                    deadline_ms = deadline.as_millis() as u64,
                    "invoke phase ran past the session deadline, cancelling"
                );
                connection.cancel_all(DEADLINE_REASON);
                // Cancelled waiters resolve immediately; drain them so every
                // call still ends with an outcome.
                let drained = tokio::time::timeout(Duration::from_secs(1), calls).await;
                if drained.is_err() {
                    tracing::warn!(session_id = %self.id, "calls still unresolved after cancellation");
                }
                Err(SessionError::DeadlineExceeded {
                    deadline_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    /// Give a provider that dies right after `tools/list` the chance to be
    /// seen dying here, so nothing is dispatched to it. Returns early as
    /// soon as the connection closes.
    async fn settle(
        &self,
        provider: &mut ManagedProvider,
        connection: &Connection,
    ) -> Result<(), SessionError> {
        let window = self.options.settings.ready_settle();
        if !window.is_zero() {
            let _ = tokio::time::timeout(window, connection.closed()).await;
        }
        self.ensure_connected(provider, connection)
    }

    /// Fail the session if the provider exited or its channel closed.
    fn ensure_connected(
        &self,
        provider: &mut ManagedProvider,
        connection: &Connection,
    ) -> Result<(), SessionError> {
        if let Some(reason) = connection.close_reason() {
            return Err(SessionError::ConnectionLost { reason });
        }
        if !provider.is_alive() {
            let reason = "provider process exited".to_string();
            connection.cancel_all(&reason);
            return Err(SessionError::ConnectionLost { reason });
        }
        Ok(())
    }

    // ─── State bookkeeping ───────────────────────────────────────────────

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(session_id = %self.id, from = %self.state, to = %next, "session transition");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, err: &SessionError) {
        tracing::error!(session_id = %self.id, state = %self.state, error = %err, "session failed");
        self.transition(SessionState::Failed);
    }

    /// Settle on the terminal state once cleanup is done. A failed session
    /// stays `Failed`.
    fn finish(&mut self, ok: bool) {
        let terminal = if ok {
            SessionState::Closed
        } else {
            SessionState::Failed
        };
        self.state = terminal;
        if ok {
            self.history.push(terminal);
        }
        tracing::info!(session_id = %self.id, state = %terminal, "session finished");
    }
}
