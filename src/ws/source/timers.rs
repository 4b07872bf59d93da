use std::{collections::HashMap, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};

use super::Input;
use crate::fsm::{Action, TimeoutKey};

/// Named timer slots, at most one armed timer per key.
///
/// A firing timer enqueues its bound action instead of running it, so the
/// executor may observe a fire from a timer that was cleared or re-armed
/// in the meantime. Every arming therefore gets a generation number, and a
/// fire only counts when [`TimerSet::acknowledge`] matches it against the
/// currently armed generation.
#[derive(Debug)]
pub(crate) struct TimerSet {
    input_tx: mpsc::UnboundedSender<Input>,
    armed: HashMap<TimeoutKey, (u64, JoinHandle<()>)>,
    generation: u64,
}

impl TimerSet {
    pub fn new(input_tx: mpsc::UnboundedSender<Input>) -> Self {
        Self {
            input_tx,
            armed: HashMap::new(),
            generation: 0,
        }
    }

    /// Arm `key` to enqueue `on_timeout` after `timeout_millis`.
    ///
    /// An already-armed key is disarmed first.
    pub fn schedule(&mut self, key: TimeoutKey, timeout_millis: u64, on_timeout: Action) {
        self.clear(key);

        self.generation += 1;
        let generation = self.generation;

        log::trace!(
            "Arm {:?} timer for {}ms, generation {}",
            key,
            timeout_millis,
            generation
        );

        let tx = self.input_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_millis)).await;
            let _ = tx.send(Input::Timer {
                key,
                generation,
                on_timeout,
            });
        });

        self.armed.insert(key, (generation, handle));
    }

    /// Disarm `key`. A no-op when the key is not armed.
    pub fn clear(&mut self, key: TimeoutKey) {
        if let Some((generation, handle)) = self.armed.remove(&key) {
            log::trace!("Disarm {:?} timer, generation {}", key, generation);
            handle.abort();
        }
    }

    /// Disarm every key.
    pub fn clear_all(&mut self) {
        for (key, (_, handle)) in self.armed.drain() {
            log::trace!("Disarm {:?} timer", key);
            handle.abort();
        }
    }

    /// Whether a fire with this generation is still the armed one for
    /// `key`; if so the key is disarmed and the fire should be processed.
    pub fn acknowledge(&mut self, key: TimeoutKey, generation: u64) -> bool {
        match self.armed.get(&key) {
            Some((armed, _)) if *armed == generation => {
                self.armed.remove(&key);
                true
            }
            _ => {
                log::trace!("Ignore stale {:?} timer fire, generation {}", key, generation);
                false
            }
        }
    }
}
