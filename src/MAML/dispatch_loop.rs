use super::compression;
use super::error::{Error, Result};
use super::shared::Shared;
use std::sync::Arc;

/// Drains the inbox and hands each message to its channel's handler.
pub(crate) struct DispatchLoop {
    shared: Arc<Shared>,
}

impl DispatchLoop {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Returns whether any message was dispatched.
    pub fn iterate(&self) -> Result<bool> {
        let incoming = self.shared.inbox.drain_all();
        if incoming.is_empty() {
            return Ok(false);
        }

        for mut message in incoming {
            let channel = message.channel().ok_or(Error::Unaddressed {
                channel: None,
                peer: message.peer(),
            })?;
            // Lookup clones the handler out so the registry lock is not held
            // across the call.
            let handler = self
                .shared
                .handler_for(channel)
                .ok_or(Error::NoHandler(channel))?;

            if self.shared.config.compress_messages {
                compression::decompress(&mut message, self.shared.stats())?;
            }
            handler.incoming(message);
        }
        Ok(true)
    }
}
