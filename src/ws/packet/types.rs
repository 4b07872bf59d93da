use serde::{Deserialize, Serialize};

/// A util structure to hold the `d` payload field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload<D> {
    /// payload field
    #[serde(rename = "d")]
    pub data: D,
}

/// Hello packet payload, the gateway's handshake acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    /// status code, zero for success
    pub code: i64,
    /// session id, exists only when code is zero
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A util structure to hold only the sequence number field
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Sn {
    /// serial number
    pub sn: u64,
}

/// Reconnect packet payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconnect {
    /// status code for why the gateway demands a reconnect
    pub code: i64,
    /// reason for human read
    pub err: String,
}

/// ResumeAck packet payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeAck {
    /// session id of the resumed session
    pub session_id: String,
}
