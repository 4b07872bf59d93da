use std::task::Poll;

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::ws::Event;

/// Stream of decoded gateway events, in ascending sequence order.
///
/// The keeper never surfaces faults here; a broken connection heals itself
/// and the stream simply pauses until events flow again. Observe
/// [`Source::current_state`](super::Source::current_state) for diagnostics.
#[derive(Debug)]
pub struct EventStream {
    pub(crate) rx: mpsc::UnboundedReceiver<Event>,
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
