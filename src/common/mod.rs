//! Common utilities and types

pub mod error;
pub mod net;

pub use error::{Error, Result};
pub use net::Authority;
