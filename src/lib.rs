//! filevault library
//!
//! Minimal remote file store: a daemon serves PUT/GET/DELETE over a small
//! binary protocol, one request per connection.

pub mod blob;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod logger;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod store;

/// Install the fmt subscriber; `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
