use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashSet},
};

use crate::ws::event::EventData;

/// Reorder buffer for inbound events.
///
/// Events may arrive out of order after a resume; they are held here until
/// the sequence is contiguous again. Duplicates and already-delivered
/// sequence numbers are dropped on entry.
#[derive(Debug, Default)]
pub(crate) struct EventBuffer {
    held: HashSet<u64>,
    heap: BinaryHeap<Reverse<EventData>>,
}

impl EventBuffer {
    /// Insert an event, `delivered_sn` being the last sequence number
    /// already handed to the host.
    pub fn put(&mut self, delivered_sn: u64, item: EventData) {
        if item.sn <= delivered_sn || self.held.contains(&item.sn) {
            log::trace!("Duplicated event {} received, drop it", item.sn);
            return;
        }
        self.held.insert(item.sn);
        self.heap.push(Reverse(item));
    }

    /// Pop the event directly following `delivered_sn`, if buffered.
    pub fn pop_ready(&mut self, delivered_sn: u64) -> Option<EventData> {
        if self.heap.peek()?.0.sn != delivered_sn + 1 {
            return None;
        }
        let item = self.heap.pop()?.0;
        self.held.remove(&item.sn);
        Some(item)
    }

    /// Drop everything, for session replacement.
    pub fn clear(&mut self) {
        self.held.clear();
        self.heap.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn event(sn: u64) -> EventData {
        EventData {
            sn,
            event: json!({ "sn": sn }),
        }
    }

    #[test]
    fn test_buffer_delivers_contiguous_run() {
        let mut buffer = EventBuffer::default();
        buffer.put(0, event(2));
        buffer.put(0, event(3));

        assert!(buffer.pop_ready(0).is_none());

        buffer.put(0, event(1));

        assert_eq!(buffer.pop_ready(0).unwrap().sn, 1);
        assert_eq!(buffer.pop_ready(1).unwrap().sn, 2);
        assert_eq!(buffer.pop_ready(2).unwrap().sn, 3);
        assert!(buffer.pop_ready(3).is_none());
    }

    #[test]
    fn test_buffer_drops_duplicates() {
        let mut buffer = EventBuffer::default();
        buffer.put(0, event(1));
        buffer.put(0, event(1));

        assert_eq!(buffer.pop_ready(0).unwrap().sn, 1);
        assert!(buffer.pop_ready(1).is_none());
    }

    #[test]
    fn test_buffer_drops_already_delivered() {
        let mut buffer = EventBuffer::default();
        buffer.put(5, event(3));

        assert!(buffer.pop_ready(2).is_none());
        assert!(buffer.pop_ready(5).is_none());
    }

    #[test]
    fn test_buffer_clear_forgets_everything() {
        let mut buffer = EventBuffer::default();
        buffer.put(0, event(1));
        buffer.clear();

        assert!(buffer.pop_ready(0).is_none());

        // a cleared sn can be buffered again
        buffer.put(0, event(1));
        assert_eq!(buffer.pop_ready(0).unwrap().sn, 1);
    }
}
