//! Type definitions shared by the store and the bootstrap engine

mod bootstrap_config;
mod record;

pub use bootstrap_config::*;
pub use record::*;
