//! Event fanout

mod dispatcher;
mod replay;

pub use dispatcher::Dispatcher;
pub use replay::{ReplayWrite, ReplayWriter};
