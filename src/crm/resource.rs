//! Generic CRUD over one backend table.
//!
//! Each [`Resource`] names a table (which doubles as its cache namespace)
//! and the record, input and filter types that go with it. A
//! [`ResourceApi`] turns those into single round trips against the
//! [`Backend`]; it never caches.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use super::keys;
use super::types::*;
use crate::backend::{Backend, Page, Pagination, Predicate, Select};
use crate::cache::QueryKey;
use crate::error::{ApiError, ApiResult};

/// A named remote collection.
pub trait Resource: Send + Sync + 'static {
  /// Table name and cache namespace
  const NAME: &'static str;
  /// Singular name for messages ("Contact")
  const LABEL: &'static str;
  /// Column list for reads, including embedded relations
  const SELECT: &'static str = "*";
  /// Sort column when a page request names none
  const DEFAULT_SORT: &'static str = "created_at";

  type Record: Record;
  type Create: Serialize + Send + Sync;
  type Patch: Serialize + Send + Sync;
  type Filters: ListFilters;

  /// Prefixes of derived reads that go stale with any write to this
  /// resource, beyond its `list` and `counts` keys.
  fn dependent_keys() -> Vec<QueryKey> {
    Vec::new()
  }
}

pub struct Contacts;
pub struct Companies;
pub struct Opportunities;
pub struct Activities;
pub struct Conversations;
pub struct Automations;

impl Resource for Contacts {
  const NAME: &'static str = "contacts";
  const LABEL: &'static str = "Contact";
  type Record = Contact;
  type Create = NewContact;
  type Patch = ContactPatch;
  type Filters = ContactFilters;
}

impl Resource for Companies {
  const NAME: &'static str = "companies";
  const LABEL: &'static str = "Company";
  const DEFAULT_SORT: &'static str = "name";
  type Record = Company;
  type Create = NewCompany;
  type Patch = CompanyPatch;
  type Filters = CompanyFilters;
}

impl Resource for Opportunities {
  const NAME: &'static str = "opportunities";
  const LABEL: &'static str = "Opportunity";
  type Record = Opportunity;
  type Create = NewOpportunity;
  type Patch = OpportunityPatch;
  type Filters = OpportunityFilters;
}

impl Resource for Activities {
  const NAME: &'static str = "activities";
  const LABEL: &'static str = "Activity";
  const DEFAULT_SORT: &'static str = "due_date";
  type Record = Activity;
  type Create = NewActivity;
  type Patch = ActivityPatch;
  type Filters = ActivityFilters;

  fn dependent_keys() -> Vec<QueryKey> {
    vec![keys::calendars(), keys::upcoming()]
  }
}

impl Resource for Conversations {
  const NAME: &'static str = "conversations";
  const LABEL: &'static str = "Conversation";
  const SELECT: &'static str = "*,contact:contacts(first_name,last_name,email)";
  const DEFAULT_SORT: &'static str = "last_message_at";
  type Record = Conversation;
  type Create = NewConversation;
  type Patch = ConversationPatch;
  type Filters = ConversationFilters;
}

impl Resource for Automations {
  const NAME: &'static str = "automations";
  const LABEL: &'static str = "Automation";
  type Record = Automation;
  type Create = NewAutomation;
  type Patch = AutomationPatch;
  type Filters = AutomationFilters;
}

pub(crate) fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> ApiResult<Vec<T>> {
  rows
    .into_iter()
    .map(|row| serde_json::from_value(row).map_err(ApiError::from))
    .collect()
}

fn to_body<T: Serialize + ?Sized>(input: &T) -> ApiResult<Value> {
  serde_json::to_value(input).map_err(ApiError::from)
}

/// Reject empty ids before any request is made.
pub(crate) fn require_id<'a>(resource: &'static str, id: &'a str) -> ApiResult<&'a str> {
  if id.trim().is_empty() {
    return Err(ApiError::MissingId { resource });
  }
  Ok(id)
}

/// Typed access to one resource's table.
pub struct ResourceApi<R> {
  pub(crate) backend: Arc<dyn Backend>,
  _resource: PhantomData<fn() -> R>,
}

impl<R> Clone for ResourceApi<R> {
  fn clone(&self) -> Self {
    Self {
      backend: Arc::clone(&self.backend),
      _resource: PhantomData,
    }
  }
}

impl<R: Resource> ResourceApi<R> {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self {
      backend,
      _resource: PhantomData,
    }
  }

  /// One page of rows matching `filters`, with the exact total.
  pub async fn list(
    &self,
    filters: &R::Filters,
    pagination: &Pagination,
  ) -> ApiResult<Page<R::Record>> {
    let query = Select::new(R::NAME)
      .columns(R::SELECT)
      .filters(filters.predicates())
      .paginate(pagination, R::DEFAULT_SORT)
      .with_count();

    let result = self.backend.select(&query).await?;
    let total = result.total.unwrap_or(result.rows.len() as u64);
    let items = decode_rows(result.rows)?;
    debug!(resource = R::NAME, total, "listed rows");

    Ok(Page {
      items,
      total,
      page: pagination.page,
      page_size: pagination.page_size,
    })
  }

  pub async fn get(&self, id: &str) -> ApiResult<R::Record> {
    let id = require_id(R::NAME, id)?;
    let query = Select::new(R::NAME)
      .columns(R::SELECT)
      .filter(Predicate::eq("id", id))
      .limit(1);

    let result = self.backend.select(&query).await?;
    decode_rows(result.rows)?
      .into_iter()
      .next()
      .ok_or_else(|| ApiError::NotFound {
        resource: R::NAME,
        id: id.to_string(),
      })
  }

  pub async fn create(&self, input: &R::Create) -> ApiResult<R::Record> {
    let rows = self.backend.insert(R::NAME, to_body(input)?).await?;
    decode_rows(rows)?
      .into_iter()
      .next()
      .ok_or_else(|| ApiError::decode(format!("insert into {} returned no row", R::NAME)))
  }

  pub async fn update(&self, id: &str, patch: &R::Patch) -> ApiResult<R::Record> {
    self.patch_row(id, to_body(patch)?).await
  }

  /// Deleting a row that is already gone succeeds.
  pub async fn delete(&self, id: &str) -> ApiResult<()> {
    let id = require_id(R::NAME, id)?;
    let deleted = self
      .backend
      .delete(R::NAME, &[Predicate::eq("id", id)])
      .await?;
    debug!(resource = R::NAME, id, deleted = deleted.len(), "deleted row");
    Ok(())
  }

  /// Number of rows matching `filters`.
  pub async fn count(&self, filters: &R::Filters) -> ApiResult<u64> {
    let query = Select::new(R::NAME)
      .columns("id")
      .filters(filters.predicates())
      .limit(0)
      .with_count();

    let result = self.backend.select(&query).await?;
    result
      .total
      .ok_or_else(|| ApiError::decode(format!("no row count returned for {}", R::NAME)))
  }

  /// Apply a raw JSON patch to one row and return it.
  pub(crate) async fn patch_row(&self, id: &str, patch: Value) -> ApiResult<R::Record> {
    let id = require_id(R::NAME, id)?;
    let rows = self
      .backend
      .update(R::NAME, &[Predicate::eq("id", id)], patch)
      .await?;
    decode_rows(rows)?
      .into_iter()
      .next()
      .ok_or_else(|| ApiError::NotFound {
        resource: R::NAME,
        id: id.to_string(),
      })
  }
}
