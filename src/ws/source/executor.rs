use bytes::Bytes;
use futures_util::{future::BoxFuture, stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite as websocket;
use websocket::tungstenite::Message as WsFrame;

use super::{buffer::EventBuffer, timers::TimerSet, EventStream, Input, WebsocketClient};
use crate::{
    api::{self, types::GatewayUrl},
    config::Config,
    fsm::{transition, Action, Context, Effect, State},
    ws::{
        event::{Event, EventData},
        packet::{Hello, Packet, Sn},
    },
};

/// Follow-up actions bound to socket events at connect time.
#[derive(Debug, Copy, Clone)]
struct Bindings {
    on_open: Action,
    on_close: Action,
    on_pong: Action,
}

/// The at-most-one socket the executor holds.
///
/// `sink` and `reader` stay empty while the connect attempt is in flight.
#[derive(Debug)]
struct Socket {
    epoch: u64,
    compress: bool,
    bindings: Bindings,
    sink: Option<SplitSink<WebsocketClient, WsFrame>>,
    reader: Option<JoinHandle<()>>,
}

/// Owns every impure resource of one logical connection: the socket, the
/// timer set, the resume identity and the event reorder buffer.
///
/// All inputs funnel through one queue and are processed to completion one
/// at a time, including the synchronously chained follow-up actions of
/// each transition, so no two transitions ever interleave.
#[derive(Debug)]
pub(crate) struct Executor {
    api: api::Client,
    state: State,
    state_tx: watch::Sender<State>,
    input_tx: mpsc::UnboundedSender<Input>,
    timers: TimerSet,
    url: Option<GatewayUrl>,
    session_id: Option<String>,
    sn: u64,
    buffer: EventBuffer,
    events_tx: mpsc::UnboundedSender<Event>,
    socket: Option<Socket>,
    epoch: u64,
}

impl Executor {
    pub fn launch(
        api: api::Client,
        compress: bool,
        config: Config,
    ) -> (
        mpsc::UnboundedSender<Input>,
        watch::Receiver<State>,
        EventStream,
    ) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let state = State::Initial(Context::new(compress, &config));
        let (state_tx, state_rx) = watch::channel(state.clone());

        let executor = Self {
            api,
            state,
            state_tx,
            input_tx: input_tx.clone(),
            timers: TimerSet::new(input_tx.clone()),
            url: None,
            session_id: None,
            sn: 0,
            buffer: EventBuffer::default(),
            events_tx,
            socket: None,
            epoch: 0,
        };

        tokio::spawn(executor.run(input_rx));

        (input_tx, state_rx, EventStream { rx: events_rx })
    }

    async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<Input>) {
        log::debug!("Connection keeper task start");

        loop {
            let input = tokio::select! {
                biased;

                _ = self.state_tx.closed() => {
                    log::debug!("Keeper handle dropped");
                    break;
                }

                input = input_rx.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };

            self.handle_input(input).await;
        }

        self.timers.clear_all();
        self.teardown_socket();

        log::debug!("Connection keeper task stop");
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Act(action) => self.step(action).await,
            Input::Timer {
                key,
                generation,
                on_timeout,
            } => {
                if self.timers.acknowledge(key, generation) {
                    self.step(on_timeout).await;
                }
            }
            Input::Gateway(result) => self.handle_gateway_result(result).await,
            Input::SocketReady { epoch, ws } => self.handle_socket_ready(epoch, *ws).await,
            Input::SocketFailed { epoch } => self.handle_socket_gone(epoch, "connect failed").await,
            Input::Frame { epoch, frame } => self.handle_frame(epoch, frame).await,
            Input::SocketClosed { epoch } => self.handle_socket_gone(epoch, "stream ended").await,
        }
    }

    /// One transition step: run the pure transition, publish the new
    /// state, execute the effects in order.
    ///
    /// Boxed because `TRIGGER_ACTION` re-enters it recursively within the
    /// same processing turn.
    fn step(&mut self, action: Action) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let (next, effects) = transition(action, &self.state);

            if next.name() != self.state.name() {
                log::debug!("Connection state changed: {} -> {}", self.state, next);
            }

            self.state = next;
            self.state_tx.send_replace(self.state.clone());

            for effect in effects {
                self.perform(effect).await;
            }
        })
    }

    async fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::PullGateway { compress } => {
                log::info!("Getting gateway url...");

                let api = self.api.clone();
                let tx = self.input_tx.clone();
                tokio::spawn(async move {
                    let result = api.gateway_url(compress).await;
                    let _ = tx.send(Input::Gateway(result));
                });
            }

            Effect::ConnectWs {
                compress,
                on_open,
                on_close,
                on_pong,
            } => {
                self.connect_ws(
                    compress,
                    Bindings {
                        on_open,
                        on_close,
                        on_pong,
                    },
                )
                .await;
            }

            Effect::ScheduleTimeout {
                key,
                timeout_millis,
                on_timeout,
            } => self.timers.schedule(key, timeout_millis, on_timeout),

            Effect::ClearTimeout { key } => self.timers.clear(key),

            Effect::SendPing => self.send_ping().await,

            Effect::TriggerAction { action } => self.step(action).await,
        }
    }

    async fn connect_ws(&mut self, compress: bool, bindings: Bindings) {
        if self.socket.is_some() {
            log::debug!("A socket is already held, tear it down first");
            self.teardown_socket();
            self.timers.clear_all();
        }

        let Some(gateway) = self.url.clone() else {
            log::debug!("No gateway url recorded, pull one first");
            self.step(Action::PullGateway).await;
            return;
        };

        self.epoch += 1;
        let epoch = self.epoch;
        self.socket = Some(Socket {
            epoch,
            compress,
            bindings,
            sink: None,
            reader: None,
        });

        let url = gateway.connect_url(self.session_id.as_deref(), self.sn);

        log::debug!("Connecting gateway: {}", url);

        let tx = self.input_tx.clone();
        tokio::spawn(async move {
            let mut result = websocket::connect_async(url.as_str()).await;
            if result.is_err() {
                log::warn!("First try to connect gateway failed, start second try");
                result = websocket::connect_async(url.as_str()).await;
            }

            match result {
                Ok((ws, _)) => {
                    let _ = tx.send(Input::SocketReady {
                        epoch,
                        ws: Box::new(ws),
                    });
                }
                Err(err) => {
                    log::warn!("Connect gateway failed: {}", err);
                    let _ = tx.send(Input::SocketFailed { epoch });
                }
            }
        });
    }

    async fn handle_socket_ready(&mut self, epoch: u64, ws: WebsocketClient) {
        let Some(sock) = self.socket.as_mut() else {
            log::debug!("Socket became ready after teardown, drop it");
            return;
        };
        if sock.epoch != epoch {
            log::debug!("A replaced socket became ready, drop it");
            return;
        }

        let (sink, mut stream) = ws.split();
        sock.sink = Some(sink);

        let tx = self.input_tx.clone();
        sock.reader = Some(tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(frame) => {
                        if tx.send(Input::Frame { epoch, frame }).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        log::warn!("Websocket stream broken: {}", err);
                        break;
                    }
                }
            }
            let _ = tx.send(Input::SocketClosed { epoch });
        }));

        log::debug!("Socket open");

        let on_open = sock.bindings.on_open;
        self.step(on_open).await;
    }

    async fn handle_socket_gone(&mut self, epoch: u64, reason: &str) {
        let Some(sock) = self.socket.as_ref() else {
            return;
        };
        if sock.epoch != epoch {
            return;
        }

        log::warn!("Socket gone ({}), reconnect", reason);

        let on_close = sock.bindings.on_close;
        self.teardown_socket();

        self.step(on_close).await;
        self.step(Action::Reconnect).await;
    }

    fn teardown_socket(&mut self) {
        if let Some(mut sock) = self.socket.take() {
            if let Some(reader) = sock.reader.take() {
                reader.abort();
            }
            if let Some(mut sink) = sock.sink.take() {
                // close politely off the processing loop
                tokio::spawn(async move {
                    let _ = sink.close().await;
                });
            }
        }
    }

    async fn handle_gateway_result(&mut self, result: api::Result<String>) {
        match result {
            Ok(raw) => match raw.parse::<GatewayUrl>() {
                Ok(gateway) => {
                    log::debug!("Got gateway url: {}", gateway);
                    self.url = Some(gateway);
                    self.step(Action::ConnectGateway).await;
                }
                Err(err) => {
                    log::warn!("Received invalid gateway url {}: {}", raw, err);
                    self.fail_over().await;
                }
            },
            Err(err) => {
                log::warn!("Getting gateway failed: {}", err);
                self.fail_over().await;
            }
        }
    }

    /// The single recovery path: tear down, then re-enter the gateway
    /// pull with backoff.
    async fn fail_over(&mut self) {
        self.step(Action::Close).await;
        self.step(Action::Reconnect).await;
    }

    async fn handle_frame(&mut self, epoch: u64, frame: WsFrame) {
        let Some(sock) = self.socket.as_ref() else {
            return;
        };
        if sock.epoch != epoch {
            return;
        }
        let compress = sock.compress;

        match frame {
            WsFrame::Binary(data) => self.handle_packet_data(data.into(), compress).await,
            // text frames are never compressed
            WsFrame::Text(text) => {
                self.handle_packet_data(Bytes::from(text.into_bytes()), false).await
            }
            // protocol-level ping/pong is tungstenite's business; a close
            // frame is followed by the reader reporting the stream end
            _ => {}
        }
    }

    async fn handle_packet_data(&mut self, data: Bytes, compressed: bool) {
        match Packet::decode(data, compressed) {
            Ok(packet) => self.handle_packet(packet).await,
            Err(err) if err.is_fatal() => {
                log::warn!("Parsing frame failed: {}, reconnect", err);
                self.fail_over().await;
            }
            Err(err) => {
                log::warn!("Ignore undecodable frame: {}", err);
            }
        }
    }

    async fn handle_packet(&mut self, packet: Packet) {
        log::trace!("Received {} packet", packet.type_name());

        match packet {
            Packet::Hello(hello) => self.handle_hello(hello.data).await,

            Packet::Event(data) => self.deliver_event(data),

            Packet::Ping(_) | Packet::Resume(_) => {
                log::warn!("Received wrong direction packet, ignore");
            }

            Packet::Pong => {
                let Some(sock) = self.socket.as_ref() else {
                    return;
                };
                let on_pong = sock.bindings.on_pong;
                self.step(on_pong).await;
            }

            Packet::Reconnect(reconnect) => {
                log::warn!(
                    "Received reconnect packet, code {}: {}",
                    reconnect.data.code,
                    reconnect.data.err
                );
                self.reset_session();
                self.fail_over().await;
            }

            Packet::ResumeAck(ack) => {
                log::debug!("Session {} resumed", ack.data.session_id);
            }
        }
    }

    /// Handshake acceptance.
    ///
    /// Code zero adopts the session; a replaced session id discards the
    /// sequence number and any buffered events. A fatal code clears the
    /// session entirely and reconnects. Everything else is not ours to
    /// judge and is ignored.
    async fn handle_hello(&mut self, hello: Hello) {
        match hello.code {
            0 => {
                if self.session_id != hello.session_id {
                    log::debug!("Session replaced, reset sequence and buffered events");
                    self.sn = 0;
                    self.buffer.clear();
                }
                self.set_session(hello.session_id);
                self.step(Action::Open).await;
            }
            40100..=40103 => {
                log::warn!(
                    "Hello failed with fatal code {}, reconnect with a fresh session",
                    hello.code
                );
                self.reset_session();
                self.fail_over().await;
            }
            code => {
                log::warn!("Hello returned code {}, ignored", code);
            }
        }
    }

    fn set_session(&mut self, session_id: Option<String>) {
        self.session_id = session_id.clone();
        self.state.context_mut().session_id = session_id;
        self.state_tx.send_replace(self.state.clone());
    }

    fn reset_session(&mut self) {
        self.sn = 0;
        self.buffer.clear();
        self.set_session(None);
    }

    fn deliver_event(&mut self, data: EventData) {
        log::trace!("Received event sn = {}", data.sn);

        self.buffer.put(self.sn, data);
        while let Some(ready) = self.buffer.pop_ready(self.sn) {
            self.sn = ready.sn;
            if self.events_tx.send(ready.event).is_err() {
                log::debug!("Event stream receiver dropped, event discarded");
            }
        }
    }

    async fn send_ping(&mut self) {
        let sn = self.sn;
        let Some(sink) = self.socket.as_mut().and_then(|sock| sock.sink.as_mut()) else {
            log::debug!("Send ping requested without a live socket, skip");
            return;
        };

        log::trace!("Send ping with sn {}", sn);

        let frame = WsFrame::Binary(Packet::Ping(Sn { sn }).encode());
        if let Err(err) = sink.send(frame).await {
            log::warn!("Send ping failed: {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ws::packet::Payload;
    use serde_json::json;

    struct Fixture {
        executor: Executor,
        #[allow(dead_code)]
        input_rx: mpsc::UnboundedReceiver<Input>,
        events_rx: mpsc::UnboundedReceiver<Event>,
        state_rx: watch::Receiver<State>,
    }

    fn fixture(state: State) -> Fixture {
        let api = api::Client::new_from_bot_token("test-token").unwrap();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(state.clone());

        let executor = Executor {
            api,
            state,
            state_tx,
            input_tx: input_tx.clone(),
            timers: TimerSet::new(input_tx),
            url: None,
            session_id: None,
            sn: 0,
            buffer: EventBuffer::default(),
            events_tx,
            socket: None,
            epoch: 0,
        };

        Fixture {
            executor,
            input_rx,
            events_rx,
            state_rx,
        }
    }

    fn context() -> Context {
        Context::new(false, &Config::default())
    }

    fn dummy_socket(epoch: u64) -> Socket {
        Socket {
            epoch,
            compress: false,
            bindings: Bindings {
                on_open: Action::Open,
                on_close: Action::Close,
                on_pong: Action::Open,
            },
            sink: None,
            reader: None,
        }
    }

    fn hello(code: i64, session_id: Option<&str>) -> Hello {
        Hello {
            code,
            session_id: session_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_hello_success_adopts_session_and_opens() {
        let mut f = fixture(State::Connecting(context()));

        f.executor.handle_hello(hello(0, Some("fresh"))).await;

        assert!(matches!(f.executor.state, State::Open(_)));
        assert_eq!(f.executor.session_id.as_deref(), Some("fresh"));
        assert_eq!(
            f.state_rx.borrow().context().session_id.as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test]
    async fn test_hello_with_changed_session_resets_sequence() {
        let mut f = fixture(State::Connecting(context()));
        f.executor.session_id = Some("old".to_string());
        f.executor.sn = 17;

        f.executor.handle_hello(hello(0, Some("new"))).await;

        assert_eq!(f.executor.sn, 0);
        assert_eq!(f.executor.session_id.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_hello_with_same_session_keeps_sequence() {
        let mut f = fixture(State::Connecting(context()));
        f.executor.session_id = Some("keep".to_string());
        f.executor.sn = 17;

        f.executor.handle_hello(hello(0, Some("keep"))).await;

        assert_eq!(f.executor.sn, 17);
        assert!(matches!(f.executor.state, State::Open(_)));
    }

    #[tokio::test]
    async fn test_hello_fatal_code_clears_session_and_reconnects() {
        let mut f = fixture(State::Open(context()));
        f.executor.session_id = Some("doomed".to_string());
        f.executor.sn = 9;

        f.executor.handle_hello(hello(40100, None)).await;

        // CLOSE collapsed straight into the reconnect path
        assert!(matches!(f.executor.state, State::PullingGateway(_)));
        assert_eq!(f.executor.state.context().retry_count, 1);
        assert_eq!(f.executor.session_id, None);
        assert_eq!(f.executor.sn, 0);
    }

    #[tokio::test]
    async fn test_hello_unknown_code_is_ignored() {
        let mut f = fixture(State::Connecting(context()));

        f.executor.handle_hello(hello(40144, None)).await;

        assert!(matches!(f.executor.state, State::Connecting(_)));
        assert_eq!(f.executor.session_id, None);
    }

    #[tokio::test]
    async fn test_pong_timeout_enters_reconnect_with_backoff() {
        let mut f = fixture(State::Open(context()));

        f.executor.step(Action::PongTimeout).await;

        assert!(matches!(f.executor.state, State::PullingGateway(_)));
        assert_eq!(f.executor.state.context().retry_count, 1);
    }

    #[tokio::test]
    async fn test_wrong_direction_ping_changes_nothing() {
        let mut f = fixture(State::Open(context()));
        f.executor.socket = Some(dummy_socket(1));

        f.executor.handle_packet(Packet::Ping(Sn { sn: 3 })).await;

        assert!(matches!(f.executor.state, State::Open(_)));
    }

    #[tokio::test]
    async fn test_pong_packet_drives_bound_action() {
        let mut f = fixture(State::Open(context()));
        f.executor.socket = Some(dummy_socket(1));

        f.executor.handle_packet(Packet::Pong).await;

        // OPEN in OPEN: still open, heartbeat re-armed
        assert!(matches!(f.executor.state, State::Open(_)));
    }

    #[tokio::test]
    async fn test_reconnect_packet_resets_session() {
        let mut f = fixture(State::Open(context()));
        f.executor.session_id = Some("stale".to_string());
        f.executor.sn = 40;

        f.executor
            .handle_packet(Packet::Reconnect(Payload {
                data: crate::ws::packet::Reconnect {
                    code: 41008,
                    err: "Missing params".to_string(),
                },
            }))
            .await;

        assert!(matches!(f.executor.state, State::PullingGateway(_)));
        assert_eq!(f.executor.session_id, None);
        assert_eq!(f.executor.sn, 0);
    }

    #[tokio::test]
    async fn test_fatal_frame_decode_reconnects() {
        let mut f = fixture(State::Open(context()));

        f.executor
            .handle_packet_data(Bytes::from_static(b"\x00garbage"), false)
            .await;

        assert!(matches!(f.executor.state, State::PullingGateway(_)));
    }

    #[tokio::test]
    async fn test_unknown_opcode_frame_is_ignored() {
        let mut f = fixture(State::Open(context()));
        let data: Bytes = serde_json::to_vec(&json!({ "s": 42 })).unwrap().into();

        f.executor.handle_packet_data(data, false).await;

        assert!(matches!(f.executor.state, State::Open(_)));
    }

    #[tokio::test]
    async fn test_events_flow_out_in_sequence_order() {
        let mut f = fixture(State::Open(context()));

        for sn in [2u64, 1, 3] {
            f.executor.deliver_event(EventData {
                sn,
                event: json!({ "sn": sn }),
            });
        }

        for expected in 1u64..=3 {
            let event = f.events_rx.try_recv().unwrap();
            assert_eq!(event["sn"], expected);
        }
        assert!(f.events_rx.try_recv().is_err());
        assert_eq!(f.executor.sn, 3);
    }

    #[tokio::test]
    async fn test_stale_socket_inputs_are_ignored() {
        let mut f = fixture(State::Open(context()));
        f.executor.socket = Some(dummy_socket(2));

        // frame and close report from a torn-down predecessor
        f.executor
            .handle_frame(1, WsFrame::Text("{\"s\":3}".to_string()))
            .await;
        f.executor.handle_socket_gone(1, "stream ended").await;

        assert!(matches!(f.executor.state, State::Open(_)));
        assert!(f.executor.socket.is_some());
    }

    #[tokio::test]
    async fn test_socket_gone_collapses_to_reconnect() {
        let mut f = fixture(State::Open(context()));
        f.executor.socket = Some(dummy_socket(1));

        f.executor.handle_socket_gone(1, "stream ended").await;

        assert!(f.executor.socket.is_none());
        assert!(matches!(f.executor.state, State::PullingGateway(_)));
        assert_eq!(f.executor.state.context().retry_count, 1);
    }

    #[tokio::test]
    async fn test_discovery_failure_collapses_to_reconnect() {
        let mut f = fixture(State::PullingGateway(context()));

        f.executor
            .handle_gateway_result(Err(api::Error::GatewayCode {
                code: 401,
                message: "unauthorized".to_string(),
            }))
            .await;

        assert!(matches!(f.executor.state, State::PullingGateway(_)));
        assert_eq!(f.executor.state.context().retry_count, 1);
    }

    #[tokio::test]
    async fn test_discovery_success_moves_to_connecting() {
        let mut f = fixture(State::PullingGateway(context()));

        f.executor
            .handle_gateway_result(Ok("wss://gateway.example/ws?compress=0".to_string()))
            .await;

        assert!(matches!(f.executor.state, State::Connecting(_)));
        assert!(f.executor.socket.is_some());
    }
}
