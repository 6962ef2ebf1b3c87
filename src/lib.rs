//! Supervised LSP client session for SourceKit-LSP.
//!
//! Spawns the server, runs the initialize/initialized handshake, and infers
//! when initial workspace analysis has finished from the server's log,
//! message, and progress traffic — SourceKit-LSP emits no discrete
//! "analysis complete" event, so readiness is heuristic, with a bounded
//! timeout fallback. A [`Session`] only exists once that gate has passed.

pub mod codec;
pub mod transport;
pub mod types;

pub(crate) mod protocol;
pub(crate) mod readiness;

mod session;

pub use session::{Session, StartError};
pub use transport::{NotificationHandler, RequestHandler, StdioTransport, Transport};
pub use types::{IgnoreSet, Readiness, ReadinessKeywords, SessionConfig};
