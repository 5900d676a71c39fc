pub mod auth_cmd;
pub mod common;
pub mod completions;
pub mod log;
pub mod queue;
pub mod sync;
