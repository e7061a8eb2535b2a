//! Core building blocks shared by datavault binaries.
//!
//! Configuration, the provisioning workflow, and supporting services live
//! here so downstream crates can focus on operator surfaces instead of
//! reimplementing orchestration.

pub mod config;
pub mod error;
pub mod keyfile;
pub mod logging;
pub mod mounts;
pub mod token;
pub mod workflow;

pub use config::{ConfigFormat, CryptoCfg, DatavaultConfig, LayoutDir, Tools, Volume};
pub use error::{DatavaultError, DatavaultResult};
pub use token::Token;
