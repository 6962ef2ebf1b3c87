//! Session supervisor — handshake, readiness gate, shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::protocol;
use crate::readiness::{self, ReadinessLatch};
use crate::transport::{StdioTransport, Transport};
use crate::types::{Readiness, SessionConfig};

/// Fatal startup failures. Anything recoverable is logged instead and the
/// session proceeds.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The server's capability set lacks a feature the session cannot run
    /// without. The process is presumed unusable; tear down and start a
    /// fresh session if desired.
    #[error("server does not advertise required capability '{0}'")]
    ProtocolViolation(&'static str),
    /// The server answered `initialize` with a JSON-RPC error.
    #[error("initialize request rejected: {0}")]
    InitializeRejected(String),
    /// The workspace root cannot be expressed as a file URI.
    #[error("workspace root is not usable as a file URI: {}", .0.display())]
    InvalidWorkspaceRoot(PathBuf),
    /// Spawning or talking to the server process failed.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Startup phases, in order. Terminal success is `Ready`; a fatal handshake
/// failure surfaces as an `Err` from `start` instead of a stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    HandlersInstalled,
    TransportStarted,
    HandshakeComplete,
    AwaitingReadiness,
    Ready,
}

fn advance(phase: &mut Phase, next: Phase) {
    tracing::debug!(from = ?phase, to = ?next, "session phase");
    *phase = next;
}

/// One logical connection to one analysis-server process for one workspace
/// root.
///
/// Holding a `Session` is proof that startup completed: the handshake was
/// validated and the readiness gate passed (genuinely or by timeout). There
/// is no half-started state to query.
pub struct Session<T: Transport = StdioTransport> {
    transport: T,
    workspace_root: PathBuf,
    capabilities: serde_json::Value,
    readiness: Readiness,
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("workspace_root", &self.workspace_root)
            .field("capabilities", &self.capabilities)
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

impl Session<StdioTransport> {
    /// Launch the configured server for `workspace_root` and run the full
    /// startup sequence.
    pub async fn start(
        config: SessionConfig,
        workspace_root: &Path,
    ) -> Result<Self, StartError> {
        let transport = StdioTransport::new(&config.command, &config.args, workspace_root);
        Self::start_with(transport, config, workspace_root).await
    }
}

impl<T: Transport> Session<T> {
    /// Run the startup sequence over an already-constructed transport.
    ///
    /// Order is load-bearing: handlers go in before the transport starts (a
    /// message arriving before its handler would be lost), and
    /// `initialized` is only sent after the `initialize` response has been
    /// validated.
    pub async fn start_with(
        mut transport: T,
        config: SessionConfig,
        workspace_root: &Path,
    ) -> Result<Self, StartError> {
        let mut phase = Phase::NotStarted;
        let latch = Arc::new(ReadinessLatch::new());

        readiness::install_handlers(&mut transport, &latch, &config.keywords);
        advance(&mut phase, Phase::HandlersInstalled);

        transport.start().await?;
        advance(&mut phase, Phase::TransportStarted);

        let capabilities = handshake(&mut transport, &config, workspace_root).await?;
        advance(&mut phase, Phase::HandshakeComplete);

        advance(&mut phase, Phase::AwaitingReadiness);
        let timeout = Duration::from_secs(config.readiness_timeout_secs);
        tracing::info!(
            timeout_secs = config.readiness_timeout_secs,
            "waiting for initial workspace analysis"
        );
        let readiness = if latch.wait(timeout).await {
            tracing::info!("initial workspace analysis complete, session ready");
            Readiness::Ready
        } else if latch.try_set() {
            tracing::warn!(
                timeout_secs = config.readiness_timeout_secs,
                "no analysis-complete signal within the timeout, proceeding anyway"
            );
            Readiness::ReadyByTimeout
        } else {
            // A genuine signal landed exactly at the deadline.
            Readiness::Ready
        };
        advance(&mut phase, Phase::Ready);

        Ok(Self {
            transport,
            workspace_root: workspace_root.to_path_buf(),
            capabilities,
            readiness,
        })
    }

    /// How the session became usable: a genuine analysis-complete signal or
    /// the timeout fallback. Semantic queries are allowed either way; this
    /// and the log trail are the only record of the difference.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    /// The server's capability set, as returned by `initialize`.
    #[must_use]
    pub fn capabilities(&self) -> &serde_json::Value {
        &self.capabilities
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Gracefully shut the server down. Consumes the session; dropping one
    /// without calling this still terminates the child via kill-on-drop.
    pub async fn shutdown(mut self) {
        if let Ok(response) = self.transport.request("shutdown", None).await
            && response.get("error").is_none()
        {
            let _ = self.transport.notify("exit", None).await;
        }
        self.transport.stop().await;
    }
}

async fn handshake<T: Transport>(
    transport: &mut T,
    config: &SessionConfig,
    workspace_root: &Path,
) -> Result<serde_json::Value, StartError> {
    let params = protocol::initialize_params(workspace_root, config)
        .map_err(|_| StartError::InvalidWorkspaceRoot(workspace_root.to_path_buf()))?;

    tracing::info!(
        command = %config.command,
        root = %workspace_root.display(),
        "sending initialize"
    );
    let response = transport.request("initialize", Some(params)).await?;

    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(StartError::InitializeRejected(message.to_string()));
    }

    let capabilities = response
        .get("result")
        .and_then(|result| result.get("capabilities"))
        .cloned()
        .ok_or(StartError::ProtocolViolation("capabilities"))?;

    if capabilities.get("textDocumentSync").is_none() {
        return Err(StartError::ProtocolViolation("textDocumentSync"));
    }
    // Optional features degrade semantic queries but do not invalidate the
    // session.
    for optional in ["completionProvider", "definitionProvider"] {
        if capabilities.get(optional).is_none() {
            tracing::warn!(
                capability = optional,
                "server did not advertise optional capability"
            );
        }
    }

    transport
        .notify("initialized", Some(serde_json::json!({})))
        .await?;

    Ok(capabilities)
}
