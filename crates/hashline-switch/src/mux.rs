//! Channel type multiplexer
//!
//! Routes remote-opened channels to a handler registered for their type,
//! falling back to a catch-all handler when one is installed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use hashline_channel::{Channel, ChannelHandler};
use tracing::debug;

/// Type-keyed registry of channel handlers
#[derive(Default)]
pub struct SwitchMux {
    handlers: RwLock<HashMap<String, Arc<dyn ChannelHandler>>>,
    fallback: RwLock<Option<Arc<dyn ChannelHandler>>>,
}

impl SwitchMux {
    /// Create an empty mux
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one channel type
    pub fn handle(&self, typ: &str, handler: Arc<dyn ChannelHandler>) {
        self.handlers
            .write()
            .unwrap()
            .insert(typ.to_string(), handler);
    }

    /// Register the handler for types nothing else claims
    pub fn handle_fallback(&self, handler: Arc<dyn ChannelHandler>) {
        *self.fallback.write().unwrap() = Some(handler);
    }

    fn lookup(&self, typ: &str) -> Option<Arc<dyn ChannelHandler>> {
        if let Some(handler) = self.handlers.read().unwrap().get(typ) {
            return Some(handler.clone());
        }
        self.fallback.read().unwrap().clone()
    }
}

#[async_trait]
impl ChannelHandler for SwitchMux {
    async fn serve(&self, channel: Channel) {
        match self.lookup(channel.typ()) {
            Some(handler) => handler.serve(channel).await,
            None => {
                debug!("no handler for channel type {:?}", channel.typ());
                let _ = channel.close_with_error("unknown channel type").await;
            }
        }
    }
}
