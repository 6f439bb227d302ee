//! HTTP service exposing CRUD operations over a collection of items kept in
//! an external document store.
//!
//! Each module focuses on a concrete responsibility:
//!
//! - [`cli`] parses flags and environment variables into settings.
//! - [`item`] and [`validation`] define items and normalize client payloads.
//! - [`store`] is the contract with the document store, with an in-memory
//!   backend and, behind the `mongo` feature, a MongoDB one.
//! - [`handlers`] and [`error`] map HTTP requests onto store calls and
//!   failures onto status codes.
//! - [`middleware`] and [`routes`] assemble the request pipeline.
//! - [`server`] owns startup ordering, the store connect retry loop and
//!   graceful shutdown.
//! - [`provision`] creates the store user the service runs as.
//!
//! Integration tests drive the router and the full server through this
//! crate directly.

pub mod cli;
pub mod error;
pub mod handlers;
pub mod item;
pub mod middleware;
pub mod provision;
pub mod routes;
pub mod server;
pub mod store;
pub mod validation;
