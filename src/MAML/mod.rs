// Asynchronous message layer: outbox/inbox queues, a transport loop that
// drives non-blocking sends and receives, and a dispatch loop that runs the
// registered handlers.

mod compression;
mod dispatch_loop;
mod pending;
mod shared;
mod transport_loop;

pub mod collective;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod mailbox;
pub mod message;
pub mod stats;

pub use collective::Collective;
pub use config::Config;
pub use context::{Context, PendingCounts};
pub use error::{Error, Result};
pub use handler::MessageHandler;
pub use mailbox::Mailbox;
pub use message::Message;
pub use stats::{Distribution, MessageStats, StatsSummary};
