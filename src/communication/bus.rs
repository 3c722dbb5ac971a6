// bus.rs
//
// Publish/subscribe boundary. The dashboard only talks to `MessageBus`; the
// AMQP transport and the in-memory one used by tests both implement it.

use std::sync::{Arc, Mutex};

use crate::communication::messages::topic_matches;
use crate::error::BusError;

/// Lifecycle and inbound traffic reported by a bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
}

/// Receives every `BusEvent`. Called from the transport's own thread.
pub type BusEventSink = Arc<dyn Fn(BusEvent) + Send + Sync>;

pub trait MessageBus {
    /// Opens the connection; lifecycle changes and messages go to `sink`.
    fn connect(&mut self, sink: BusEventSink) -> Result<(), BusError>;

    /// Adds a topic pattern (AMQP `*`/`#` wildcards). Takes effect
    /// immediately when connected and survives reconnects.
    fn subscribe(&mut self, pattern: &str) -> Result<(), BusError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Unsubscribes and releases the connection.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

#[derive(Default)]
struct InMemoryState {
    connected: bool,
    subscriptions: Vec<String>,
    sink: Option<BusEventSink>,
    published: Vec<(String, Vec<u8>)>,
}

/// Loopback bus: published messages are delivered straight back to the
/// subscriber. Clones share the same state, so a test can hold one handle
/// while the dashboard owns another.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a message as if it came from the broker. Returns whether a
    /// subscription matched.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        let sink = {
            let state = self.lock();
            if !state.connected || !state.subscriptions.iter().any(|p| topic_matches(p, topic)) {
                return false;
            }
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink(BusEvent::Message {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
        }
        true
    }

    /// Simulates the broker dropping the link.
    pub fn drop_link(&self) {
        let sink = {
            let mut state = self.lock();
            state.connected = false;
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink(BusEvent::Disconnected);
        }
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().published.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        // A poisoned lock only means a test panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MessageBus for InMemoryBus {
    fn connect(&mut self, sink: BusEventSink) -> Result<(), BusError> {
        {
            let mut state = self.lock();
            state.connected = true;
            state.sink = Some(Arc::clone(&sink));
        }
        sink(BusEvent::Connected);
        Ok(())
    }

    fn subscribe(&mut self, pattern: &str) -> Result<(), BusError> {
        let mut state = self.lock();
        if !state.subscriptions.iter().any(|p| p == pattern) {
            state.subscriptions.push(pattern.to_string());
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        {
            let mut state = self.lock();
            if !state.connected {
                return Err(BusError::NotConnected);
            }
            state.published.push((topic.to_string(), payload.to_vec()));
        }
        self.inject(topic, payload);
        Ok(())
    }

    fn disconnect(&mut self) {
        let sink = {
            let mut state = self.lock();
            let was_connected = state.connected;
            state.connected = false;
            state.subscriptions.clear();
            state.sink.take().filter(|_| was_connected)
        };
        if let Some(sink) = sink {
            sink(BusEvent::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}
