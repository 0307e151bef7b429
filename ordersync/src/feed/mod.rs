//! External feed access.
//!
//! Everything that talks to the upstream market feed lives here: the transport
//! abstraction ([`client::MarketFeed`]), the HTTP implementation, the process-wide
//! rate gate, and the conditional fetcher that layers validator caching and retry
//! handling on top of the raw transport.

pub mod client;
pub mod fetcher;
pub mod http;
pub mod rate_gate;
