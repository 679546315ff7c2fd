use super::error::Result;
use crate::Transport::Transport;

/// An operation involving several peers (barrier, broadcast, gather, ...)
/// that runs on the transport loop next to point-to-point traffic.
///
/// Queued with [`Context::queue_collective`]. The loop calls [`start`] once,
/// then [`finished`] on every pass until it returns `true`; the operation is
/// dropped afterwards, so results leave through whatever the implementation
/// captured (a channel, a shared slot). Both calls must return promptly.
/// Collectives are never compressed.
///
/// [`Context::queue_collective`]: super::Context::queue_collective
/// [`start`]: Collective::start
/// [`finished`]: Collective::finished
pub trait Collective: Send {
    fn start(&mut self, transport: &dyn Transport) -> Result<()>;

    fn finished(&mut self, transport: &dyn Transport) -> Result<bool>;
}
