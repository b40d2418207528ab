//! DNS-over-HTTPS resolver module

mod resolver;

pub use resolver::{Resolver, DEFAULT_DOH_ENDPOINT, DEFAULT_DOH_TIMEOUT_SECS};
