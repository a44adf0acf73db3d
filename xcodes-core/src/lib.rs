//! xcodes-core library exports

pub mod catalog;
pub mod config;
pub mod curl;
pub mod error;
pub mod install;
pub mod inventory;
pub mod simulator;
pub mod version;

pub use config::Config;
pub use error::{Error, Result};
