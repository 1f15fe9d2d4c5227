//! Typed CRM API: one function per remote round trip, no caching.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::resource::{
  decode_rows, require_id, Activities, Automations, Companies, Contacts, Conversations,
  Opportunities, Resource, ResourceApi,
};
use super::types::*;
use crate::backend::{Backend, Predicate, Select, SortDirection};
use crate::error::{ApiError, ApiResult};

const MESSAGES_TABLE: &str = "messages";

/// Entry point to every resource.
#[derive(Clone)]
pub struct CrmApi {
  backend: Arc<dyn Backend>,
}

impl CrmApi {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self { backend }
  }

  pub fn resource<R: Resource>(&self) -> ResourceApi<R> {
    ResourceApi::new(Arc::clone(&self.backend))
  }

  pub fn contacts(&self) -> ResourceApi<Contacts> {
    self.resource()
  }

  pub fn companies(&self) -> ResourceApi<Companies> {
    self.resource()
  }

  pub fn opportunities(&self) -> ResourceApi<Opportunities> {
    self.resource()
  }

  pub fn activities(&self) -> ResourceApi<Activities> {
    self.resource()
  }

  pub fn conversations(&self) -> ResourceApi<Conversations> {
    self.resource()
  }

  pub fn automations(&self) -> ResourceApi<Automations> {
    self.resource()
  }

  pub fn dashboard(&self) -> DashboardApi {
    DashboardApi {
      backend: Arc::clone(&self.backend),
    }
  }

  pub fn reports(&self) -> ReportsApi {
    ReportsApi {
      backend: Arc::clone(&self.backend),
    }
  }
}

impl ResourceApi<Contacts> {
  /// Delete several contacts in one request. Returns how many were
  /// requested; the batch succeeds or fails as a whole.
  pub async fn delete_many(&self, ids: &[String]) -> ApiResult<usize> {
    if ids.is_empty() {
      return Ok(0);
    }
    for id in ids {
      require_id(Contacts::NAME, id)?;
    }

    let deleted = self
      .backend
      .delete(Contacts::NAME, &[Predicate::is_in("id", ids)])
      .await?;
    if deleted.len() < ids.len() {
      warn!(
        requested = ids.len(),
        deleted = deleted.len(),
        "some contacts were already gone"
      );
    }
    Ok(ids.len())
  }
}

impl ResourceApi<Opportunities> {
  pub async fn move_to_stage(&self, id: &str, stage: OpportunityStage) -> ApiResult<Opportunity> {
    self.patch_row(id, json!({ "stage": stage })).await
  }
}

impl ResourceApi<Activities> {
  pub async fn set_completed(&self, id: &str, completed: bool) -> ApiResult<Activity> {
    self.patch_row(id, json!({ "completed": completed })).await
  }

  /// Activities to place on the calendar, earliest first. Without a range
  /// every activity is returned, including undated ones.
  pub async fn calendar_source(&self, range: Option<&DateRange>) -> ApiResult<Vec<Activity>> {
    let mut query = Select::new(Activities::NAME).order("due_date", SortDirection::Asc);
    if let Some(range) = range {
      query = query.filters(range.predicates("due_date"));
    }
    let result = self.backend.select(&query).await?;
    decode_rows(result.rows)
  }
}

impl ResourceApi<Conversations> {
  /// Messages of one conversation, oldest first.
  pub async fn messages(&self, conversation_id: &str) -> ApiResult<Vec<Message>> {
    let conversation_id = require_id(Conversations::NAME, conversation_id)?;
    let query = Select::new(MESSAGES_TABLE)
      .filter(Predicate::eq("conversation_id", conversation_id))
      .order("created_at", SortDirection::Asc);
    let result = self.backend.select(&query).await?;
    decode_rows(result.rows)
  }

  /// Post an outbound message. The backend stamps the conversation's
  /// `last_message_at`.
  pub async fn send_message(&self, conversation_id: &str, body: &str) -> ApiResult<Message> {
    let conversation_id = require_id(Conversations::NAME, conversation_id)?;
    let row = NewMessage {
      conversation_id,
      direction: MessageDirection::Outbound,
      body,
    };
    let rows = self
      .backend
      .insert(MESSAGES_TABLE, serde_json::to_value(&row)?)
      .await?;
    decode_rows(rows)?
      .into_iter()
      .next()
      .ok_or_else(|| ApiError::decode("message insert returned no row"))
  }

  pub async fn mark_read(&self, id: &str) -> ApiResult<Conversation> {
    self.patch_row(id, json!({ "unread_count": 0 })).await
  }

  pub async fn set_status(&self, id: &str, status: ConversationStatus) -> ApiResult<Conversation> {
    self.patch_row(id, json!({ "status": status })).await
  }
}

impl ResourceApi<Automations> {
  pub async fn toggle(&self, id: &str, is_active: bool) -> ApiResult<Automation> {
    self.patch_row(id, json!({ "is_active": is_active })).await
  }
}

/// Aggregates for the landing page.
#[derive(Clone)]
pub struct DashboardApi {
  backend: Arc<dyn Backend>,
}

impl DashboardApi {
  pub async fn stats(&self) -> ApiResult<DashboardStats> {
    let value = self.backend.rpc("dashboard_stats", json!({})).await?;
    decode_single(value)
  }

  /// Open activities due from now on, soonest first.
  pub async fn upcoming_activities(&self, limit: u32) -> ApiResult<Vec<Activity>> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let query = Select::new(Activities::NAME)
      .filter(Predicate::eq("completed", false))
      .filter(Predicate::gte("due_date", now))
      .order("due_date", SortDirection::Asc)
      .limit(u64::from(limit));
    let result = self.backend.select(&query).await?;
    decode_rows(result.rows)
  }
}

/// Server-side aggregations, optionally bounded in time.
#[derive(Clone)]
pub struct ReportsApi {
  backend: Arc<dyn Backend>,
}

impl ReportsApi {
  pub async fn pipeline_by_stage(
    &self,
    range: Option<&DateRange>,
  ) -> ApiResult<Vec<PipelineStageReport>> {
    self.call("pipeline_by_stage", range).await
  }

  pub async fn activities_by_type(
    &self,
    range: Option<&DateRange>,
  ) -> ApiResult<Vec<ActivityTypeReport>> {
    self.call("activities_by_type", range).await
  }

  async fn call<T: serde::de::DeserializeOwned>(
    &self,
    function: &str,
    range: Option<&DateRange>,
  ) -> ApiResult<Vec<T>> {
    let args = range.map(DateRange::rpc_args).unwrap_or_else(|| json!({}));
    let value = self.backend.rpc(function, args).await?;
    debug!(function, "report fetched");
    match value {
      Value::Array(rows) => decode_rows(rows),
      Value::Null => Ok(Vec::new()),
      other => Err(ApiError::decode(format!("{} returned {}", function, other))),
    }
  }
}

/// Functions returning a set yield a one-element array; accept both shapes.
fn decode_single<T: serde::de::DeserializeOwned>(value: Value) -> ApiResult<T> {
  let value = match value {
    Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
    other => other,
  };
  Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::memory::MemoryBackend;

  fn api(backend: &Arc<MemoryBackend>) -> CrmApi {
    CrmApi::new(backend.clone())
  }

  fn activity(id: &str, due: Option<&str>, completed: bool) -> Value {
    json!({
      "id": id,
      "activity_type": "meeting",
      "subject": format!("Meeting {}", id),
      "due_date": due,
      "duration_minutes": 30,
      "completed": completed,
      "created_at": "2024-01-01T00:00:00Z",
      "updated_at": "2024-01-01T00:00:00Z",
    })
  }

  #[tokio::test]
  async fn test_delete_many_is_one_request() {
    let backend = Arc::new(MemoryBackend::new().with_rows(
      "contacts",
      vec![
        json!({ "id": "c-1" }),
        json!({ "id": "c-2" }),
        json!({ "id": "c-3" }),
      ],
    ));

    let ids = vec!["c-1".to_string(), "c-3".to_string()];
    let deleted = api(&backend).contacts().delete_many(&ids).await.unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(backend.requests(), vec!["delete contacts"]);
    assert_eq!(backend.rows("contacts"), vec![json!({ "id": "c-2" })]);
  }

  #[tokio::test]
  async fn test_delete_many_rejects_empty_id() {
    let backend = Arc::new(MemoryBackend::new());
    let ids = vec!["c-1".to_string(), String::new()];
    let err = api(&backend).contacts().delete_many(&ids).await.unwrap_err();

    assert!(matches!(err, ApiError::MissingId { resource: "contacts" }));
    assert_eq!(backend.request_count(), 0);
  }

  #[tokio::test]
  async fn test_move_to_stage_returns_updated_row() {
    let backend = Arc::new(MemoryBackend::new().with_rows(
      "opportunities",
      vec![json!({
        "id": "o-1",
        "title": "Renewal",
        "value": 1200.0,
        "stage": "proposal",
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z",
      })],
    ));

    let moved = api(&backend)
      .opportunities()
      .move_to_stage("o-1", OpportunityStage::Won)
      .await
      .unwrap();
    assert_eq!(moved.stage, OpportunityStage::Won);
    assert_eq!(backend.rows("opportunities")[0]["stage"], "won");
  }

  #[tokio::test]
  async fn test_calendar_source_filters_by_range() {
    let backend = Arc::new(MemoryBackend::new().with_rows(
      "activities",
      vec![
        activity("a-1", Some("2024-01-15T10:00:00Z"), false),
        activity("a-2", Some("2024-02-15T10:00:00Z"), false),
        activity("a-3", Some("2024-01-05T10:00:00Z"), true),
      ],
    ));
    let range = DateRange::new(
      "2024-01-01T00:00:00Z".parse().unwrap(),
      "2024-01-31T23:59:59Z".parse().unwrap(),
    );

    let source = api(&backend)
      .activities()
      .calendar_source(Some(&range))
      .await
      .unwrap();
    let ids: Vec<&str> = source.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["a-3", "a-1"]);
  }

  #[tokio::test]
  async fn test_send_message_inserts_outbound_row() {
    let backend = Arc::new(MemoryBackend::new());
    let message = api(&backend)
      .conversations()
      .send_message("conv-1", "Thanks, talk soon")
      .await
      .unwrap();

    assert_eq!(message.conversation_id, "conv-1");
    assert_eq!(message.direction, MessageDirection::Outbound);
    assert_eq!(backend.requests(), vec!["insert messages"]);
  }

  #[tokio::test]
  async fn test_messages_are_oldest_first() {
    let backend = Arc::new(MemoryBackend::new().with_rows(
      "messages",
      vec![
        json!({ "id": "m-2", "conversation_id": "conv-1", "direction": "outbound", "body": "Hi!", "created_at": "2024-03-01T10:05:00Z" }),
        json!({ "id": "m-1", "conversation_id": "conv-1", "direction": "inbound", "body": "Hello", "created_at": "2024-03-01T10:00:00Z" }),
        json!({ "id": "m-3", "conversation_id": "conv-2", "direction": "inbound", "body": "Other", "created_at": "2024-03-01T09:00:00Z" }),
      ],
    ));

    let messages = api(&backend).conversations().messages("conv-1").await.unwrap();
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m-1", "m-2"]);
  }

  #[tokio::test]
  async fn test_dashboard_stats_accepts_set_result() {
    let backend = Arc::new(MemoryBackend::new().with_function(
      "dashboard_stats",
      json!([{ "total_contacts": 42, "pipeline_value": 125000.5, "open_conversations": 3 }]),
    ));

    let stats = api(&backend).dashboard().stats().await.unwrap();
    assert_eq!(stats.total_contacts, 42);
    assert_eq!(stats.pipeline_value, 125000.5);
    assert_eq!(stats.total_companies, 0);
  }

  #[tokio::test]
  async fn test_upcoming_activities_skips_completed_and_past() {
    let backend = Arc::new(MemoryBackend::new().with_rows(
      "activities",
      vec![
        activity("a-1", Some("2999-01-02T10:00:00Z"), false),
        activity("a-2", Some("2999-01-01T10:00:00Z"), false),
        activity("a-3", Some("2999-01-01T09:00:00Z"), true),
        activity("a-4", Some("2000-01-01T09:00:00Z"), false),
      ],
    ));

    let upcoming = api(&backend).dashboard().upcoming_activities(5).await.unwrap();
    let ids: Vec<&str> = upcoming.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["a-2", "a-1"]);
  }

  #[tokio::test]
  async fn test_missing_report_function_surfaces_backend_message() {
    let backend = Arc::new(MemoryBackend::new());
    let err = api(&backend).reports().pipeline_by_stage(None).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(
      err.to_string(),
      "Could not find the function public.pipeline_by_stage"
    );
  }

  #[tokio::test]
  async fn test_report_rows_are_decoded() {
    let backend = Arc::new(MemoryBackend::new().with_function(
      "activities_by_type",
      json!([
        { "activity_type": "call", "total": 10, "completed": 7 },
        { "activity_type": "email", "total": 4, "completed": 4 }
      ]),
    ));

    let rows = api(&backend).reports().activities_by_type(None).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].activity_type, ActivityType::Call);
    assert_eq!(rows[0].completed, 7);
  }
}
