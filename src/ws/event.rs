//! Gateway application events carried in [Event](super::packet::Packet::Event) packets.

use serde::{Deserialize, Serialize};

/// Event payload.
///
/// Content semantics are the host's business; the keeper only orders and
/// forwards them.
pub type Event = serde_json::Value;

/// Event data: a sequence number plus the opaque payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// serial number
    pub sn: u64,

    /// event body
    #[serde(rename = "d")]
    pub event: Event,
}

// ordering is by sequence number only, for the reorder buffer

impl PartialEq for EventData {
    fn eq(&self, other: &Self) -> bool {
        self.sn == other.sn
    }
}

impl Eq for EventData {}

impl PartialOrd for EventData {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventData {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sn.cmp(&other.sn)
    }
}
