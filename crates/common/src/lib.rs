//! Common utilities and types shared across the simple-netlink crates.

pub mod error;
pub mod logging;

pub use error::{Error, KernelErrorKind, Result};
