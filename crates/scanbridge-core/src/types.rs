// SPDX-License-Identifier: MIT
//
// Core domain types for the Scanbridge hand-off server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a scan session.
///
/// The id is the sole authorization token for a session: anyone who knows it
/// can read and write the session's images. It is therefore generated from a
/// version-4 UUID (122 bits of OS-sourced randomness), making guessing
/// infeasible within a session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id received from a client. Returns `None` for anything that
    /// is not a well-formed UUID (mistyped links, truncated codes).
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consistent point-in-time view of a session, as returned to polling
/// clients. The desktop page treats `images` ordering as the final page
/// order of the assembled PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    /// Opaque encoded image payloads in capture order.
    pub images: Vec<String>,
    pub image_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Status of the embedded scan hand-off server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}
