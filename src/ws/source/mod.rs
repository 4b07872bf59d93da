//! The effect executor and its host-facing handle.

mod buffer;
mod executor;
mod stream;
mod timers;

pub use stream::EventStream;

use tokio::sync::{mpsc, watch};
use tokio_tungstenite as websocket;

use crate::{
    api,
    config::Config,
    fsm::{Action, State, TimeoutKey},
};

pub(crate) type WebsocketClient =
    websocket::WebSocketStream<websocket::MaybeTlsStream<tokio::net::TcpStream>>;

/// Everything that can wake the executor, serialized into one queue.
///
/// Socket inputs carry the epoch of the socket that produced them so
/// stragglers from a torn-down socket are ignored; timer fires carry the
/// arming generation for the same reason.
#[derive(Debug)]
pub(crate) enum Input {
    /// an action requested by the host or a background task
    Act(Action),
    /// a named timer fired
    Timer {
        key: TimeoutKey,
        generation: u64,
        on_timeout: Action,
    },
    /// the discovery api returned
    Gateway(api::Result<String>),
    /// a socket connect attempt succeeded
    SocketReady {
        epoch: u64,
        ws: Box<WebsocketClient>,
    },
    /// a socket connect attempt failed twice
    SocketFailed { epoch: u64 },
    /// a frame arrived on the live socket
    Frame {
        epoch: u64,
        frame: websocket::tungstenite::Message,
    },
    /// the live socket ended
    SocketClosed { epoch: u64 },
}

/// Handle to one logical gateway connection and its recovery loop.
///
/// The connection machinery runs in a background task; this handle only
/// kicks it off and observes it. Dropping the handle (and it alone) stops
/// the background task and releases the socket and timers.
#[derive(Debug)]
pub struct Source {
    input_tx: mpsc::UnboundedSender<Input>,
    state_rx: watch::Receiver<State>,
}

impl Source {
    /// Start the connection keeper on the current tokio runtime.
    ///
    /// Returns the handle and the stream of decoded gateway events. The
    /// keeper stays idle until [`connect`](Self::connect) is called.
    pub fn spawn(api: api::Client, compress: bool, config: Config) -> (Self, EventStream) {
        let (input_tx, state_rx, events) = executor::Executor::launch(api, compress, config);
        (Self { input_tx, state_rx }, events)
    }

    /// Start the connection keeper with a fresh api client for `token`.
    pub fn with_bot_token<S: AsRef<str> + ?Sized>(
        token: &S,
        compress: bool,
        config: Config,
    ) -> crate::Result<(Self, EventStream)> {
        use snafu::prelude::*;

        let api = api::Client::new_from_bot_token(token).context(crate::error::CreateApiClient)?;
        Ok(Self::spawn(api, compress, config))
    }

    /// Kick off gateway discovery and connection.
    ///
    /// Idempotent: while discovery or a connection is already in flight
    /// the request is absorbed by the state machine. Returns false only
    /// when the background task is gone.
    pub fn connect(&self) -> bool {
        self.input_tx.send(Input::Act(Action::PullGateway)).is_ok()
    }

    /// Read-only snapshot of the current connection state.
    pub fn current_state(&self) -> State {
        self.state_rx.borrow().clone()
    }
}
