//! Cache key factories.
//!
//! Keys are `[namespace, discriminator, ...]`. Everything a resource owns
//! sits under its namespace so one prefix invalidation reaches all of it.

use serde::Serialize;

use super::resource::{Activities, Conversations, Resource};
use super::types::DateRange;
use crate::backend::Pagination;
use crate::cache::QueryKey;

pub const DASHBOARD: &str = "dashboard";
pub const REPORTS: &str = "reports";

#[derive(Serialize)]
struct ListParams<'a, F> {
  filters: &'a F,
  pagination: &'a Pagination,
}

/// `[name]`
pub fn all<R: Resource>() -> QueryKey {
  QueryKey::new(R::NAME)
}

/// `[name, "list"]`
pub fn lists<R: Resource>() -> QueryKey {
  all::<R>().with("list")
}

/// `[name, "list", {filters, pagination}]`
pub fn list<R: Resource>(filters: &R::Filters, pagination: &Pagination) -> QueryKey {
  lists::<R>().with_value(&ListParams {
    filters,
    pagination,
  })
}

pub fn details<R: Resource>() -> QueryKey {
  all::<R>().with("detail")
}

pub fn detail<R: Resource>(id: &str) -> QueryKey {
  details::<R>().with(id)
}

pub fn counts<R: Resource>() -> QueryKey {
  all::<R>().with("counts")
}

pub fn count<R: Resource>(filters: &R::Filters) -> QueryKey {
  counts::<R>().with_value(filters)
}

/// Messages of one conversation, nested under the conversations namespace.
pub fn messages(conversation_id: &str) -> QueryKey {
  all::<Conversations>().with("messages").with(conversation_id)
}

pub fn calendars() -> QueryKey {
  all::<Activities>().with("calendar")
}

pub fn calendar(range: Option<&DateRange>) -> QueryKey {
  calendars().with_value(&range)
}

pub fn dashboard_stats() -> QueryKey {
  QueryKey::new(DASHBOARD).with("stats")
}

pub fn upcoming() -> QueryKey {
  QueryKey::new(DASHBOARD).with("upcoming")
}

pub fn upcoming_activities(limit: u32) -> QueryKey {
  upcoming().with_value(&limit)
}

pub fn pipeline_report(range: Option<&DateRange>) -> QueryKey {
  QueryKey::new(REPORTS).with("pipeline").with_value(&range)
}

pub fn activity_report(range: Option<&DateRange>) -> QueryKey {
  QueryKey::new(REPORTS).with("activities").with_value(&range)
}
