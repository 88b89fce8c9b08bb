//! Lead ingestion module - functional pipeline from CSV export to remote table

pub mod dates;
pub mod fetch;
pub mod filter;
pub mod mapping;
pub mod parse;
pub mod pipeline;
pub mod remote;
pub mod types;
pub mod write;

pub use types::*;
