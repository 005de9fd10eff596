//! Registry of the event types webhooks can subscribe to.
//!
//! The set is closed: subscribing to or triggering a name outside of it is a
//! validation error rather than a silent no-op.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Event emitted when a clip is submitted for review.
pub const CLIP_SUBMITTED: &str = "clip.submitted";
/// Event emitted when a submitted clip is approved.
pub const CLIP_APPROVED: &str = "clip.approved";
/// Event emitted when a submitted clip is rejected.
pub const CLIP_REJECTED: &str = "clip.rejected";

/// A webhook event type from the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SupportedEvent {
    #[serde(rename = "clip.submitted")]
    ClipSubmitted,
    #[serde(rename = "clip.approved")]
    ClipApproved,
    #[serde(rename = "clip.rejected")]
    ClipRejected,
}

impl SupportedEvent {
    /// Every supported event, in registry order.
    pub const ALL: [SupportedEvent; 3] = [
        SupportedEvent::ClipSubmitted,
        SupportedEvent::ClipApproved,
        SupportedEvent::ClipRejected,
    ];

    /// Returns the wire name (e.g. "clip.approved").
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedEvent::ClipSubmitted => CLIP_SUBMITTED,
            SupportedEvent::ClipApproved => CLIP_APPROVED,
            SupportedEvent::ClipRejected => CLIP_REJECTED,
        }
    }

    /// Parses a list of names, failing on the first unsupported one.
    pub fn parse_all<S: AsRef<str>>(names: &[S]) -> Result<Vec<SupportedEvent>, EventError> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }
}

impl FromStr for SupportedEvent {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SupportedEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventType(s.to_string()))
    }
}

impl fmt::Display for SupportedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_events() {
        assert_eq!("clip.submitted".parse::<SupportedEvent>().unwrap(), SupportedEvent::ClipSubmitted);
        assert_eq!("clip.approved".parse::<SupportedEvent>().unwrap(), SupportedEvent::ClipApproved);
        assert_eq!("clip.rejected".parse::<SupportedEvent>().unwrap(), SupportedEvent::ClipRejected);
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let err = "clip.deleted".parse::<SupportedEvent>().unwrap_err();
        assert!(matches!(err, EventError::UnknownEventType(name) if name == "clip.deleted"));
    }

    #[test]
    fn test_parse_all_stops_at_first_unknown() {
        assert!(SupportedEvent::parse_all(&["clip.approved", "user.created"]).is_err());
        let parsed = SupportedEvent::parse_all(&["clip.approved", "clip.rejected"]).unwrap();
        assert_eq!(parsed, vec![SupportedEvent::ClipApproved, SupportedEvent::ClipRejected]);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&SupportedEvent::ClipApproved).unwrap();
        assert_eq!(json, "\"clip.approved\"");

        let back: SupportedEvent = serde_json::from_str("\"clip.rejected\"").unwrap();
        assert_eq!(back, SupportedEvent::ClipRejected);
    }
}
