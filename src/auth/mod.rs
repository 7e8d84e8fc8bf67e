//! Request authentication for the HTTP adapter.
//!
//! Access tokens arrive as `Authorization: Bearer` headers and are checked by
//! the session service. The client address used as the rate-limit key comes
//! from the socket or, behind a proxy, from a configured header.

mod extractors;
mod ip;
mod state;

pub use extractors::{Authenticated, BearerToken, ClientAddress, bearer_token};
pub use ip::{IpSource, extract_client_ip};
pub use state::AuthState;
