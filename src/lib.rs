// Module naming follows project convention (MAML = asynchronous message layer, Core = runtime plumbing)
#[allow(non_snake_case)]
pub mod MAML;

#[allow(non_snake_case)]
pub mod Core;

#[allow(non_snake_case)]
pub mod Transport;

pub use Core::LaunchMode;
pub use MAML::{Collective, Config, Context, Error, Message, MessageHandler, Result};
pub use Transport::{Channel, Peer, Tag};
