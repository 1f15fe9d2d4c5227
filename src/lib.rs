//! Typed data access and a client-side query cache for a CRM backend.
//!
//! - [`backend`]: the REST transport and its request descriptors
//! - [`crm`]: records, per-resource API functions and the cached facade
//! - [`cache`]: query keys, the shared [`cache::QueryClient`] and mutations
//! - [`query`]: observed queries with polling and an enabled gate

pub mod backend;
pub mod cache;
pub mod config;
pub mod crm;
pub mod error;
pub mod logging;
pub mod notify;
pub mod query;

pub use error::{ApiError, ApiResult};
