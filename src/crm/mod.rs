//! CRM resources over the hosted backend.
//!
//! [`CrmApi`] is the uncached, one-round-trip-per-call layer;
//! [`CachedCrm`] puts it behind the query cache and mutation protocol.

mod api;
mod cached;
pub mod calendar;
pub mod keys;
mod resource;
mod types;

pub use api::{CrmApi, DashboardApi, ReportsApi};
pub use cached::CachedCrm;
pub use calendar::CalendarEvent;
pub use resource::{
  Activities, Automations, Companies, Contacts, Conversations, Opportunities, Resource,
  ResourceApi,
};
pub use types::*;
