//! Modem transport: UDP channel and its worker pool.

mod channel;
mod pool;

pub use channel::{handler_prefix, FrameHandler, TransportChannel};
pub use pool::{Job, Submit, WorkerPool};
