//! Provides Gatehouse's delegated-authorization gate.
//!
//! Every inbound request is described to an external verification service with a `GET` request. A `200 OK`
//! lets the request through, enriched with the verification response's headers and cookies. Anything else,
//! including every failure to reach the service, is answered with `401 Unauthorized`.

mod addressing;
mod builder;
pub mod cookies;
mod errors;
mod gate;
mod transport;

pub use addressing::*;
pub use builder::*;
pub use errors::*;
pub use gate::*;
pub use transport::*;
