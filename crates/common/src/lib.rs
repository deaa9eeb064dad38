// confsync-common: shared types and parsing for the confsync workspace

pub mod identity;
pub mod report;
pub mod types;
