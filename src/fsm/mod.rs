//! Connection lifecycle state machine.
//!
//! [`transition`] is a pure function from an [`Action`] and the current
//! [`State`] to the next state plus an ordered list of [`Effect`]s. It does
//! no I/O; the [source](crate::ws::Source) executes the effects and feeds
//! the resulting socket events, API responses and timer firings back in as
//! new actions.

mod backoff;

pub use backoff::backoff_delay;

use crate::config::Config;

/// Connection data threaded through every state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    /// whether server->client payloads are compressed, fixed at construction
    pub compress: bool,
    /// resumable session identity, present after a successful handshake
    pub session_id: Option<String>,
    /// consecutive reconnect attempts since the last successful open
    pub retry_count: u32,
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

impl Context {
    /// Build the initial context from configuration.
    pub fn new(compress: bool, config: &Config) -> Self {
        Self {
            compress,
            session_id: None,
            retry_count: 0,
            hello_timeout_millis: config.hello_timeout_millis,
            heartbeat_interval_millis: config.heartbeat_interval_millis,
            heartbeat_timeout_millis: config.heartbeat_timeout_millis,
            backoff_factor: config.backoff_factor,
            backoff_min_millis: config.backoff_min_millis,
            backoff_max_millis: config.backoff_max_millis,
        }
    }
}

/// Connection state, exactly one active at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// constructed, nothing started yet
    Initial(Context),
    /// waiting for the discovery api to return a gateway url
    PullingGateway(Context),
    /// socket opening, hello not yet accepted
    Connecting(Context),
    /// handshake accepted, heartbeat cycle running
    Open(Context),
    /// torn down, timers cleared
    Closed(Context),
    /// fault detected, about to re-enter the gateway pull
    Reconnecting(Context),
}

impl State {
    /// the context carried by this state
    pub fn context(&self) -> &Context {
        match self {
            Self::Initial(ctx)
            | Self::PullingGateway(ctx)
            | Self::Connecting(ctx)
            | Self::Open(ctx)
            | Self::Closed(ctx)
            | Self::Reconnecting(ctx) => ctx,
        }
    }

    pub(crate) fn context_mut(&mut self) -> &mut Context {
        match self {
            Self::Initial(ctx)
            | Self::PullingGateway(ctx)
            | Self::Connecting(ctx)
            | Self::Open(ctx)
            | Self::Closed(ctx)
            | Self::Reconnecting(ctx) => ctx,
        }
    }

    /// state name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initial(_) => "INITIAL",
            Self::PullingGateway(_) => "PULLING_GATEWAY",
            Self::Connecting(_) => "CONNECTING",
            Self::Open(_) => "OPEN",
            Self::Closed(_) => "CLOSED",
            Self::Reconnecting(_) => "RECONNECTING",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An event requesting a transition, the only input to the state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    /// fetch a fresh gateway url
    PullGateway,
    /// gateway url known, open the socket
    ConnectGateway,
    /// handshake accepted (also: socket opened, pong received)
    Open,
    /// tear the connection down
    Close,
    /// server hello did not arrive in time
    HelloTimeout,
    /// heartbeat cycle stalled
    PingTimeout,
    /// pong did not arrive in time
    PongTimeout,
    /// time to send the next ping
    Heartbeat,
    /// re-enter the gateway pull after a fault
    Reconnect,
}

/// Named timer slots. At most one timer per key may be armed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TimeoutKey {
    /// hello wait after the socket opens
    Hello,
    /// gateway pull watchdog
    Gateway,
    /// next heartbeat ping
    Ping,
    /// pong wait after a ping
    Pong,
    /// reconnect backoff delay
    Connect,
}

impl TimeoutKey {
    /// every key, for clear-all sweeps
    pub const ALL: [Self; 5] = [
        Self::Hello,
        Self::Gateway,
        Self::Ping,
        Self::Pong,
        Self::Connect,
    ];
}

/// A side-effect request emitted by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// fetch a fresh gateway url from the discovery api
    PullGateway {
        /// request a compressed-payload gateway
        compress: bool,
    },
    /// open a websocket to the known gateway url
    ConnectWs {
        /// decompress inbound binary frames
        compress: bool,
        /// action to feed when the socket opens
        on_open: Action,
        /// action to feed when the socket closes
        on_close: Action,
        /// action to feed when a pong packet arrives
        on_pong: Action,
    },
    /// arm a named timer
    ScheduleTimeout {
        /// timer slot
        key: TimeoutKey,
        /// delay before firing
        timeout_millis: u64,
        /// action to feed when the timer fires
        on_timeout: Action,
    },
    /// disarm a named timer if armed
    ClearTimeout {
        /// timer slot
        key: TimeoutKey,
    },
    /// transmit a liveness probe over the live socket
    SendPing,
    /// re-enter the transition step with this action, within the same turn
    TriggerAction {
        /// the chained action
        action: Action,
    },
}

fn clear_all_timeouts() -> Vec<Effect> {
    TimeoutKey::ALL
        .into_iter()
        .map(|key| Effect::ClearTimeout { key })
        .collect()
}

/// The transition function.
///
/// Total over every (action, state) pair: anything not listed below keeps
/// the current state and emits no effects.
pub fn transition(action: Action, state: &State) -> (State, Vec<Effect>) {
    use Action as A;
    use State as S;

    match (action, state) {
        // gateway pull, either the very first one or a backoff-timer refire;
        // also the fallback when a connect attempt finds no url recorded
        (A::PullGateway, S::Initial(ctx) | S::PullingGateway(ctx) | S::Connecting(ctx)) => (
            S::PullingGateway(ctx.clone()),
            vec![Effect::PullGateway {
                compress: ctx.compress,
            }],
        ),

        (A::ConnectGateway, S::PullingGateway(ctx)) => (
            S::Connecting(ctx.clone()),
            vec![
                Effect::ConnectWs {
                    compress: ctx.compress,
                    on_open: A::Open,
                    on_close: A::Close,
                    on_pong: A::Open,
                },
                Effect::ScheduleTimeout {
                    key: TimeoutKey::Hello,
                    timeout_millis: ctx.hello_timeout_millis,
                    on_timeout: A::HelloTimeout,
                },
            ],
        ),

        // connection established
        (A::Open, S::Connecting(ctx)) => {
            let mut ctx = ctx.clone();
            ctx.retry_count = 0;
            let interval = ctx.heartbeat_interval_millis;
            (
                S::Open(ctx),
                vec![
                    Effect::ClearTimeout {
                        key: TimeoutKey::Hello,
                    },
                    Effect::ScheduleTimeout {
                        key: TimeoutKey::Ping,
                        timeout_millis: interval,
                        on_timeout: A::Heartbeat,
                    },
                ],
            )
        }

        // pong received while open: disarm the pong watchdog and re-arm the
        // heartbeat clock
        (A::Open, S::Open(ctx)) => {
            let mut ctx = ctx.clone();
            ctx.retry_count = 0;
            let interval = ctx.heartbeat_interval_millis;
            (
                S::Open(ctx),
                vec![
                    Effect::ClearTimeout {
                        key: TimeoutKey::Pong,
                    },
                    Effect::ScheduleTimeout {
                        key: TimeoutKey::Ping,
                        timeout_millis: interval,
                        on_timeout: A::Heartbeat,
                    },
                ],
            )
        }

        (A::HelloTimeout, S::Connecting(ctx) | S::Open(ctx)) => (
            S::Reconnecting(ctx.clone()),
            vec![
                Effect::ClearTimeout {
                    key: TimeoutKey::Hello,
                },
                Effect::TriggerAction {
                    action: A::Reconnect,
                },
            ],
        ),

        (A::Heartbeat, S::Open(ctx)) => (
            S::Open(ctx.clone()),
            vec![
                Effect::SendPing,
                Effect::ScheduleTimeout {
                    key: TimeoutKey::Pong,
                    timeout_millis: ctx.heartbeat_timeout_millis,
                    on_timeout: A::PongTimeout,
                },
            ],
        ),

        (A::PingTimeout | A::PongTimeout, S::Open(ctx)) => (
            S::Reconnecting(ctx.clone()),
            vec![Effect::TriggerAction {
                action: A::Reconnect,
            }],
        ),

        (A::Close, state) => (S::Closed(state.context().clone()), clear_all_timeouts()),

        (A::Reconnect, S::Closed(ctx) | S::Reconnecting(ctx)) => {
            let mut ctx = ctx.clone();
            ctx.retry_count += 1;
            let delay = backoff_delay(
                ctx.backoff_factor,
                ctx.retry_count,
                ctx.backoff_min_millis,
                ctx.backoff_max_millis,
            );
            let effects = if delay == 0 {
                vec![Effect::TriggerAction {
                    action: A::PullGateway,
                }]
            } else {
                vec![Effect::ScheduleTimeout {
                    key: TimeoutKey::Connect,
                    timeout_millis: delay,
                    on_timeout: A::PullGateway,
                }]
            };
            (S::PullingGateway(ctx), effects)
        }

        // everything else is an ignored action
        (_, state) => (state.clone(), vec![]),
    }
}
