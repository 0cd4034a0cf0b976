// SPDX-License-Identifier: MIT
//
// Scanbridge -- Core types, errors, and configuration shared across all crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::ScanbridgeError;
pub use types::*;
