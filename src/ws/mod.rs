//! Gateway websocket connection keeper.

pub mod event;
pub mod packet;

mod source;

pub use event::{Event, EventData};
pub use source::{EventStream, Source};
