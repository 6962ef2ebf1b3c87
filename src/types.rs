//! Public configuration and session state types.

use serde::Deserialize;

/// Configuration for one analysis-server session.
///
/// Everything has a SourceKit-LSP-shaped default; deserializing `{}` yields
/// a working configuration for a Swift package workspace.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Executable to launch (resolved on PATH).
    pub command: String,
    /// Extra arguments for the server process.
    pub args: Vec<String>,
    /// Ask the server to index in the background after startup.
    pub background_indexing: bool,
    /// Cap on completion results, advertised in initializationOptions.
    pub completion_max_results: u32,
    /// How long to wait for a readiness signal before proceeding anyway.
    pub readiness_timeout_secs: u64,
    /// Keyword tables driving readiness inference.
    pub keywords: ReadinessKeywords,
    /// Directory patterns appended to the built-in ignore list.
    pub extra_ignored_dirs: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: "sourcekit-lsp".to_string(),
            args: Vec::new(),
            background_indexing: true,
            completion_max_results: 200,
            readiness_timeout_secs: 15,
            keywords: ReadinessKeywords::default(),
            extra_ignored_dirs: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// The directory-ignore matcher for this configuration.
    #[must_use]
    pub fn ignore_set(&self) -> IgnoreSet {
        IgnoreSet::with_extra(&self.extra_ignored_dirs)
    }
}

/// Keyword tables for the readiness classifier, one per message channel.
///
/// These encode one server family's vocabulary, not protocol semantics —
/// override them to target a different server. Matching is case-insensitive
/// substring, any keyword triggers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadinessKeywords {
    /// Matched against `window/logMessage` text.
    pub log: Vec<String>,
    /// Matched against `window/showMessage` text.
    pub message: Vec<String>,
    /// Matched against `$/progress` end-event text.
    pub progress: Vec<String>,
}

impl Default for ReadinessKeywords {
    fn default() -> Self {
        Self {
            log: [
                "indexing complete",
                "finished indexing",
                "build complete",
                "compilation finished",
                "swift package resolved",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            message: [
                "package resolution complete",
                "build succeeded",
                "indexing finished",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            progress: ["indexing", "building", "resolving"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// How the session came to be usable.
///
/// Callers of semantic queries cannot distinguish the two ready states at
/// the API they block on; this tri-state and the log trail are the only
/// record of a timeout fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Readiness {
    /// Startup has not finished waiting yet.
    #[default]
    Pending,
    /// A heuristic match confirmed background analysis finished.
    Ready,
    /// No signal arrived in time; the session proceeded optimistically.
    ReadyByTimeout,
}

impl Readiness {
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready | Self::ReadyByTimeout)
    }
}

/// Build products and editor metadata SourceKit-LSP workspaces accumulate.
const DEFAULT_IGNORED_DIRS: &[&str] = &[
    ".build",
    ".swiftpm",
    "build",
    "DerivedData",
    ".DS_Store",
    "xcuserdata",
    "*.xcworkspace",
    "*.xcodeproj",
];

/// Directory names and globs excluded from workspace file discovery.
///
/// The session core does not enumerate files itself; whatever does must use
/// this matcher so discovery and the server agree on what the workspace is.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    patterns: globset::GlobSet,
}

impl IgnoreSet {
    /// Build the matcher from the built-in list plus `extra` patterns.
    /// Invalid extra patterns are logged and skipped.
    #[must_use]
    pub fn with_extra(extra: &[String]) -> Self {
        let mut builder = globset::GlobSetBuilder::new();
        for pattern in DEFAULT_IGNORED_DIRS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
        {
            match globset::Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => tracing::warn!(pattern, "skipping invalid ignore pattern: {e}"),
            }
        }
        let patterns = match builder.build() {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!("ignore patterns failed to compile, ignoring nothing: {e}");
                globset::GlobSet::empty()
            }
        };
        Self { patterns }
    }

    /// Whether a directory name should be excluded from discovery.
    #[must_use]
    pub fn is_ignored_dirname(&self, name: &str) -> bool {
        self.patterns.is_match(name)
    }
}
