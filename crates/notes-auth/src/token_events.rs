//! Token event bus.
//!
//! Decouples whoever notices that the session can no longer be refreshed
//! (the refresh coordinator) from whoever tears the session down (the
//! session controller). Events are fire-and-forget: nothing is queued, and a
//! subscriber added after an emission never sees it.

use crate::listeners::{ListenerRegistry, Subscription};
use tracing::debug;

/// Events published on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TokenEvent {
    /// The access token is expired and could not be refreshed.
    Expired,
}

/// Publish/subscribe channel for [`TokenEvent`]s. Cloning shares the channel.
#[derive(Clone)]
pub struct TokenEventBus {
    listeners: ListenerRegistry<TokenEvent>,
}

impl Default for TokenEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEventBus {
    pub fn new() -> Self {
        Self {
            listeners: ListenerRegistry::new(),
        }
    }

    /// Subscribe to every event. Handlers run synchronously on the emitting
    /// task; anything asynchronous should be spawned.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TokenEvent) + Send + Sync + 'static,
    {
        self.listeners.add(handler)
    }

    /// Subscribe to [`TokenEvent::Expired`] only.
    pub fn on_token_expired<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if matches!(event, TokenEvent::Expired) {
                handler();
            }
        })
    }

    pub fn emit(&self, event: TokenEvent) {
        debug!(event = ?event, subscribers = self.listeners.len(), "Emitting token event");
        self.listeners.notify(&event);
    }

    pub fn emit_token_expired(&self) {
        self.emit(TokenEvent::Expired);
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}
