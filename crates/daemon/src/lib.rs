// confsync-daemon library entry point.

pub mod config;
pub mod cursor;
pub mod events;
pub mod git;
pub mod platform;
pub mod process;
pub mod runtime;
pub mod sync;
