pub mod SharedMemory;
pub mod async_loop;
pub mod futex;

pub use async_loop::{AsyncLoop, LaunchMode};
pub use SharedMemory::{
    create_shared_memory, open_shared_memory, remove_shared_memory, SharedMemoryBackend,
};
