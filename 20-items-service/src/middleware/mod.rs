//! Request processing shared by every API route.
//!
//! - [`input`] parses JSON bodies and strips store operator keys from
//!   everything the client sends.
//! - [`rate_limit`] enforces a fixed request quota per client and window.
//! - [`errors`] decides how much of an internal failure the client sees.
//!
//! The body-size cap, panic catching and access logging come from
//! `tower-http` and are assembled with these in [`crate::routes`].

pub mod errors;
pub mod input;
pub mod rate_limit;

pub use errors::{panic_response, render_internal_errors};
pub use input::{Payload, parse_and_sanitize};
pub use rate_limit::{RateLimiter, rate_limit};
