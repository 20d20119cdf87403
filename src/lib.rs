//! The Gatehouse reverse proxy, which places an [`AuthGate`](gatehouse_ext_auth::AuthGate) in front of a
//! protected service.

mod proxy;
mod upstream;

pub use proxy::*;
pub use upstream::*;
