//! Numeric event type codes shared verbatim by producer and consumer

use std::fmt;

use serde::{Deserialize, Serialize};

/// Event category carried in position 1 of every token array.
///
/// Codes are part of the wire contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventType {
    Metric,
    Dimension,
    Upload,
    Upgrade,
    Baseline,
    Discover,
    Mutation,
    Region,
    Document,
    Log,
    Summary,
    Snapshot,
}

impl EventType {
    /// Wire code of this event type.
    pub fn code(&self) -> u8 {
        match self {
            EventType::Metric => 0,
            EventType::Dimension => 1,
            EventType::Upload => 2,
            EventType::Upgrade => 3,
            EventType::Baseline => 4,
            EventType::Discover => 5,
            EventType::Mutation => 6,
            EventType::Region => 7,
            EventType::Document => 8,
            EventType::Log => 33,
            EventType::Summary => 36,
            EventType::Snapshot => 43,
        }
    }

    /// Look up an event type by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        let event = match code {
            0 => EventType::Metric,
            1 => EventType::Dimension,
            2 => EventType::Upload,
            3 => EventType::Upgrade,
            4 => EventType::Baseline,
            5 => EventType::Discover,
            6 => EventType::Mutation,
            7 => EventType::Region,
            8 => EventType::Document,
            33 => EventType::Log,
            36 => EventType::Summary,
            43 => EventType::Snapshot,
            _ => return None,
        };
        Some(event)
    }

    /// Whether arrays of this type describe the node tree.
    pub fn is_dom(&self) -> bool {
        matches!(
            self,
            EventType::Discover | EventType::Mutation | EventType::Snapshot
        )
    }
}

impl From<EventType> for u8 {
    fn from(event: EventType) -> Self {
        event.code()
    }
}

impl TryFrom<u8> for EventType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        EventType::from_code(code).ok_or_else(|| format!("unknown event type {}", code))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
