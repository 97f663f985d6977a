//! HTTP/1.1 connection driver: one request/response exchange per connection.

pub mod codec;
mod connect;
mod exchange;

pub use connect::Connector;
pub use exchange::{ExchangeSettings, WireRequest, exchange};
