//! Network subsystem
//!
//! Components:
//! - `proxy_listener`: accepts connections and runs them through the capture pipeline.
//! - `http_sniffer`: best-effort HTTP request detection for the archive target URI.
//! - `forward_handler`: next handler relaying bytes to the real destination.

pub mod forward_handler;
pub mod http_sniffer;
pub mod proxy_listener;

pub use forward_handler::ForwardHandler;
pub use proxy_listener::ProxyListener;
