use super::message::Message;

/// Receives messages dispatched for the channel it is registered on.
///
/// The handler takes ownership of each message. Calls happen on the dispatch
/// loop, one at a time; a handler that blocks stalls delivery for every
/// channel, so it should return promptly.
pub trait MessageHandler: Send + Sync {
    fn incoming(&self, message: Message);
}

impl<F> MessageHandler for F
where
    F: Fn(Message) + Send + Sync,
{
    fn incoming(&self, message: Message) {
        self(message)
    }
}
