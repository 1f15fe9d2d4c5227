//! Access to the hosted relational backend.
//!
//! The [`Backend`] trait is the seam between the typed CRM API and the
//! transport; [`RestClient`] speaks the backend's REST dialect over HTTPS.

mod api_types;
mod client;
mod filter;
#[cfg(test)]
pub mod memory;

pub use client::{Backend, RestClient, Rows};
pub use filter::{Order, Page, Pagination, Predicate, Select, SortDirection};
