//! Connection keeper configuration.

/// Timing and backoff configuration for one logical connection.
///
/// The defaults match the gateway's documented expectations: a 6 second
/// hello window, 30 second heartbeats with a 6 second pong window, and a
/// 1..=30 second exponential reconnect backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// how long to wait for the server hello after the socket opens
    pub hello_timeout_millis: u64,
    /// interval between liveness pings
    pub heartbeat_interval_millis: u64,
    /// how long to wait for a pong after a ping
    pub heartbeat_timeout_millis: u64,
    /// reconnect backoff multiplier
    pub backoff_factor: u64,
    /// reconnect backoff floor in milliseconds
    pub backoff_min_millis: u64,
    /// reconnect backoff ceiling in milliseconds
    pub backoff_max_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hello_timeout_millis: 6000,
            heartbeat_interval_millis: 30000,
            heartbeat_timeout_millis: 6000,
            backoff_factor: 2,
            backoff_min_millis: 1000,
            backoff_max_millis: 30000,
        }
    }
}
