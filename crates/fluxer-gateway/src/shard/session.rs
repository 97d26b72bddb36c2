//! Resumable session record

use serde::{Deserialize, Serialize};

/// What a shard needs to resume its session after a disconnect.
///
/// Serializable so callers can persist it and hand it back through
/// `GatewayConfig::with_session` after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub session_id: Option<String>,

    /// Gateway URL the server asked resumes to use
    #[serde(default)]
    pub resume_url: Option<String>,

    #[serde(default)]
    pub last_sequence: Option<u64>,
}

impl SessionState {
    #[must_use]
    pub fn new(session_id: impl Into<String>, last_sequence: u64) -> Self {
        Self {
            session_id: Some(session_id.into()),
            resume_url: None,
            last_sequence: Some(last_sequence),
        }
    }

    #[must_use]
    pub fn with_resume_url(mut self, url: impl Into<String>) -> Self {
        self.resume_url = Some(url.into());
        self
    }

    /// Both a session id and a sequence are known
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.last_sequence.is_some()
    }

    /// Record a dispatch sequence; never moves backwards.
    pub fn observe_sequence(&mut self, sequence: u64) {
        self.last_sequence = Some(self.last_sequence.map_or(sequence, |s| s.max(sequence)));
    }

    /// Record the session established by READY
    pub fn establish(&mut self, session_id: String, resume_url: Option<String>) {
        self.session_id = Some(session_id);
        if resume_url.is_some() {
            self.resume_url = resume_url;
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
