// Recognition of the upstream's "session not recognized" reply

/// Status codes and/or a body substring identifying a rejected session.
///
/// When both parts are configured both must match; a single configured part
/// decides alone. The body pattern is matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSessionSignature {
    statuses: Vec<u16>,
    pattern: Option<String>,
}

impl InvalidSessionSignature {
    pub fn new(statuses: Vec<u16>, pattern: Option<String>) -> Self {
        Self {
            statuses,
            pattern: pattern
                .map(|p| p.to_lowercase())
                .filter(|p| !p.is_empty()),
        }
    }

    /// Does this upstream reply say the session is unknown?
    pub fn matches(&self, status: u16, body: &[u8]) -> bool {
        let status_hit = (!self.statuses.is_empty()).then(|| self.statuses.contains(&status));
        let body_hit = self
            .pattern
            .as_ref()
            .map(|pattern| String::from_utf8_lossy(body).to_lowercase().contains(pattern));

        match (status_hit, body_hit) {
            (Some(status), Some(body)) => status && body,
            (Some(status), None) => status,
            (None, Some(body)) => body,
            (None, None) => false,
        }
    }
}
