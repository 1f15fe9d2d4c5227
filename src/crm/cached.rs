//! CRM access through the query cache.
//!
//! Reads go through [`QueryClient`] under the keys in [`keys`]; writes run
//! as [`Mutation`]s whose effects invalidate or patch the affected keys and
//! raise a notification.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::api::CrmApi;
use super::calendar::{self, CalendarEvent};
use super::keys;
use super::resource::{
  require_id, Activities, Automations, Contacts, Conversations, Opportunities, Resource,
};
use super::types::*;
use crate::backend::{Page, Pagination};
use crate::cache::{Effects, Mutation, QueryClient, QueryOptions};
use crate::config::PollingConfig;
use crate::error::ApiResult;
use crate::notify::Notifier;
use crate::query::Query;

/// Cached CRM client.
///
/// Cheap to clone; clones share the cache and notifier.
#[derive(Clone)]
pub struct CachedCrm {
  api: CrmApi,
  client: QueryClient,
  notifier: Arc<dyn Notifier>,
  polling: PollingConfig,
}

impl CachedCrm {
  pub fn new(
    api: CrmApi,
    client: QueryClient,
    notifier: Arc<dyn Notifier>,
    polling: PollingConfig,
  ) -> Self {
    Self {
      api,
      client,
      notifier,
      polling,
    }
  }

  pub fn api(&self) -> &CrmApi {
    &self.api
  }

  pub fn client(&self) -> &QueryClient {
    &self.client
  }

  fn options(&self) -> QueryOptions {
    self.client.default_options()
  }

  // --- Reads ---

  pub async fn list<R: Resource>(
    &self,
    filters: &R::Filters,
    pagination: &Pagination,
  ) -> ApiResult<Page<R::Record>> {
    let key = keys::list::<R>(filters, pagination);
    let api = self.api.resource::<R>();
    let (filters, pagination) = (filters.clone(), pagination.clone());
    self
      .client
      .fetch_query(&key, self.options().stale_time, move || async move {
        api.list(&filters, &pagination).await
      })
      .await
  }

  pub async fn get<R: Resource>(&self, id: &str) -> ApiResult<R::Record> {
    require_id(R::NAME, id)?;
    let key = keys::detail::<R>(id);
    let api = self.api.resource::<R>();
    let id = id.to_string();
    self
      .client
      .fetch_query(&key, self.options().stale_time, move || async move {
        api.get(&id).await
      })
      .await
  }

  pub async fn count<R: Resource>(&self, filters: &R::Filters) -> ApiResult<u64> {
    let key = keys::count::<R>(filters);
    let api = self.api.resource::<R>();
    let filters = filters.clone();
    self
      .client
      .fetch_query(&key, self.options().stale_time, move || async move {
        api.count(&filters).await
      })
      .await
  }

  pub async fn messages(&self, conversation_id: &str) -> ApiResult<Vec<Message>> {
    require_id(Conversations::NAME, conversation_id)?;
    let key = keys::messages(conversation_id);
    let api = self.api.conversations();
    let id = conversation_id.to_string();
    self
      .client
      .fetch_query(&key, self.options().stale_time, move || async move {
        api.messages(&id).await
      })
      .await
  }

  /// Calendar events for `range`. The activity rows are cached; the
  /// projection is recomputed against `now` on every call.
  pub async fn calendar_events(
    &self,
    range: Option<&DateRange>,
    now: DateTime<Utc>,
  ) -> ApiResult<Vec<CalendarEvent>> {
    let key = keys::calendar(range);
    let api = self.api.activities();
    let range = range.copied();
    let source: Vec<Activity> = self
      .client
      .fetch_query(&key, self.options().stale_time, move || async move {
        api.calendar_source(range.as_ref()).await
      })
      .await?;
    Ok(calendar::project(&source, now))
  }

  pub async fn dashboard_stats(&self) -> ApiResult<DashboardStats> {
    let api = self.api.dashboard();
    self
      .client
      .fetch_query(&keys::dashboard_stats(), self.options().stale_time, move || async move {
        api.stats().await
      })
      .await
  }

  pub async fn upcoming_activities(&self, limit: u32) -> ApiResult<Vec<Activity>> {
    let api = self.api.dashboard();
    self
      .client
      .fetch_query(&keys::upcoming_activities(limit), self.options().stale_time, move || async move {
        api.upcoming_activities(limit).await
      })
      .await
  }

  pub async fn pipeline_report(
    &self,
    range: Option<&DateRange>,
  ) -> ApiResult<Vec<PipelineStageReport>> {
    let key = keys::pipeline_report(range);
    let stale_time = self.polling.reports(self.options()).stale_time;
    let api = self.api.reports();
    let range = range.copied();
    self
      .client
      .fetch_query(&key, stale_time, move || async move {
        api.pipeline_by_stage(range.as_ref()).await
      })
      .await
  }

  pub async fn activity_report(
    &self,
    range: Option<&DateRange>,
  ) -> ApiResult<Vec<ActivityTypeReport>> {
    let key = keys::activity_report(range);
    let stale_time = self.polling.reports(self.options()).stale_time;
    let api = self.api.reports();
    let range = range.copied();
    self
      .client
      .fetch_query(&key, stale_time, move || async move {
        api.activities_by_type(range.as_ref()).await
      })
      .await
  }

  // --- Observed queries ---

  pub fn list_query<R: Resource>(
    &self,
    filters: &R::Filters,
    pagination: &Pagination,
  ) -> Query<Page<R::Record>> {
    self.list_query_with::<R>(filters, pagination, self.options())
  }

  fn list_query_with<R: Resource>(
    &self,
    filters: &R::Filters,
    pagination: &Pagination,
    options: QueryOptions,
  ) -> Query<Page<R::Record>> {
    let key = keys::list::<R>(filters, pagination);
    let api = self.api.resource::<R>();
    let (filters, pagination) = (filters.clone(), pagination.clone());
    Query::new(self.client.clone(), key, options, move || {
      let (api, filters, pagination) = (api.clone(), filters.clone(), pagination.clone());
      async move { api.list(&filters, &pagination).await }
    })
  }

  /// Detail query; disabled while `id` is empty.
  pub fn detail_query<R: Resource>(&self, id: &str) -> Query<R::Record> {
    let key = keys::detail::<R>(id);
    let options = self.options().enabled(!id.trim().is_empty());
    let api = self.api.resource::<R>();
    let id = id.to_string();
    Query::new(self.client.clone(), key, options, move || {
      let (api, id) = (api.clone(), id.clone());
      async move { api.get(&id).await }
    })
  }

  /// Conversation list, refreshed in the background.
  pub fn conversations_query(
    &self,
    filters: &ConversationFilters,
    pagination: &Pagination,
  ) -> Query<Page<Conversation>> {
    let options = self.polling.conversations(self.options());
    self.list_query_with::<Conversations>(filters, pagination, options)
  }

  /// Messages of the open conversation, refreshed in the background;
  /// disabled while no conversation is selected.
  pub fn messages_query(&self, conversation_id: &str) -> Query<Vec<Message>> {
    let key = keys::messages(conversation_id);
    let options = self
      .polling
      .messages(self.options())
      .enabled(!conversation_id.trim().is_empty());
    let api = self.api.conversations();
    let id = conversation_id.to_string();
    Query::new(self.client.clone(), key, options, move || {
      let (api, id) = (api.clone(), id.clone());
      async move { api.messages(&id).await }
    })
  }

  /// Activity rows behind the calendar; project them with
  /// [`calendar::project`].
  pub fn calendar_query(&self, range: Option<DateRange>) -> Query<Vec<Activity>> {
    let key = keys::calendar(range.as_ref());
    let api = self.api.activities();
    Query::new(self.client.clone(), key, self.options(), move || {
      let api = api.clone();
      async move { api.calendar_source(range.as_ref()).await }
    })
  }

  pub fn dashboard_query(&self) -> Query<DashboardStats> {
    let options = self.polling.dashboard(self.options());
    let api = self.api.dashboard();
    Query::new(self.client.clone(), keys::dashboard_stats(), options, move || {
      let api = api.clone();
      async move { api.stats().await }
    })
  }

  pub fn pipeline_report_query(&self, range: Option<DateRange>) -> Query<Vec<PipelineStageReport>> {
    let options = self.polling.reports(self.options());
    let api = self.api.reports();
    Query::new(self.client.clone(), keys::pipeline_report(range.as_ref()), options, move || {
      let api = api.clone();
      async move { api.pipeline_by_stage(range.as_ref()).await }
    })
  }

  pub fn activity_report_query(&self, range: Option<DateRange>) -> Query<Vec<ActivityTypeReport>> {
    let options = self.polling.reports(self.options());
    let api = self.api.reports();
    Query::new(self.client.clone(), keys::activity_report(range.as_ref()), options, move || {
      let api = api.clone();
      async move { api.activities_by_type(range.as_ref()).await }
    })
  }

  // --- Mutations ---

  fn mutation<T: Clone>(&self, action: impl Into<String>) -> Mutation<T> {
    Mutation::new(action, self.client.clone(), Arc::clone(&self.notifier))
  }

  pub async fn create<R: Resource>(&self, input: &R::Create) -> ApiResult<R::Record> {
    let mut mutation = self.mutation(format!("create {}", R::LABEL.to_lowercase()));
    mutation
      .run(self.api.resource::<R>().create(input), |_| {
        namespace_effects::<R>().notify(format!("{} created", R::LABEL))
      })
      .await
  }

  pub async fn update<R: Resource>(&self, id: &str, patch: &R::Patch) -> ApiResult<R::Record> {
    let mut mutation = self.mutation(format!("update {}", R::LABEL.to_lowercase()));
    mutation
      .run(self.api.resource::<R>().update(id, patch), |record| {
        row_effects::<R>(record).notify(format!("{} updated", R::LABEL))
      })
      .await
  }

  pub async fn delete<R: Resource>(&self, id: &str) -> ApiResult<()> {
    let mut mutation = self.mutation(format!("delete {}", R::LABEL.to_lowercase()));
    mutation
      .run(self.api.resource::<R>().delete(id), |_| {
        namespace_effects::<R>().notify(format!("{} deleted", R::LABEL))
      })
      .await
  }

  /// Delete a batch of contacts. The contacts namespace is invalidated
  /// once for the whole batch.
  pub async fn delete_contacts(&self, ids: &[String]) -> ApiResult<usize> {
    if ids.is_empty() {
      return Ok(0);
    }
    let mut mutation = self.mutation("delete contacts");
    mutation
      .run(self.api.contacts().delete_many(ids), |deleted| {
        let noun = if *deleted == 1 { "contact" } else { "contacts" };
        Effects::new()
          .invalidate(keys::all::<Contacts>())
          .notify(format!("{} {} deleted", deleted, noun))
      })
      .await
  }

  pub async fn move_opportunity(
    &self,
    id: &str,
    stage: OpportunityStage,
  ) -> ApiResult<Opportunity> {
    let mut mutation = self.mutation("move opportunity");
    mutation
      .run(self.api.opportunities().move_to_stage(id, stage), |record| {
        row_effects::<Opportunities>(record)
          .notify(format!("Opportunity moved to {}", label(&record.stage)))
      })
      .await
  }

  pub async fn set_activity_completed(&self, id: &str, completed: bool) -> ApiResult<Activity> {
    let mut mutation = self.mutation("update activity");
    mutation
      .run(self.api.activities().set_completed(id, completed), |record| {
        let message = if record.completed {
          "Activity completed"
        } else {
          "Activity reopened"
        };
        row_effects::<Activities>(record).notify(message)
      })
      .await
  }

  pub async fn toggle_automation(&self, id: &str, is_active: bool) -> ApiResult<Automation> {
    let mut mutation = self.mutation("toggle automation");
    mutation
      .run(self.api.automations().toggle(id, is_active), |record| {
        let message = if record.is_active {
          "Automation activated"
        } else {
          "Automation deactivated"
        };
        row_effects::<Automations>(record).notify(message)
      })
      .await
  }

  /// Clear the unread counter. Silent on success.
  pub async fn mark_conversation_read(&self, id: &str) -> ApiResult<Conversation> {
    let mut mutation = self.mutation("mark conversation as read");
    mutation
      .run(self.api.conversations().mark_read(id), |record| {
        self.conversation_effects(record)
      })
      .await
  }

  pub async fn set_conversation_status(
    &self,
    id: &str,
    status: ConversationStatus,
  ) -> ApiResult<Conversation> {
    let mut mutation = self.mutation("update conversation");
    mutation
      .run(self.api.conversations().set_status(id, status), |record| {
        self
          .conversation_effects(record)
          .notify(format!("Conversation marked {}", label(&record.status)))
      })
      .await
  }

  /// Send a reply. The message is appended to the cached thread, the
  /// conversation moves to the front of cached list pages, and the
  /// conversations namespace is invalidated.
  pub async fn send_message(&self, conversation_id: &str, body: &str) -> ApiResult<Message> {
    let mut mutation = self.mutation("send message");
    mutation
      .run(self.api.conversations().send_message(conversation_id, body), |message| {
        let sent_at = message.created_at;
        let appended = message.clone();
        let bumped = message.conversation_id.clone();
        Effects::new()
          .patch::<Vec<Message>, _>(keys::messages(&message.conversation_id), move |mut thread| {
            if !thread.iter().any(|m| m.id == appended.id) {
              thread.push(appended.clone());
            }
            thread
          })
          .patch::<Page<Conversation>, _>(keys::lists::<Conversations>(), move |page| {
            bump_conversation(page, &bumped, sent_at)
          })
          .patch::<Conversation, _>(
            keys::detail::<Conversations>(&message.conversation_id),
            move |mut conversation| {
              conversation.last_message_at = Some(sent_at);
              conversation
            },
          )
          .invalidate(keys::all::<Conversations>())
          .notify("Message sent")
      })
      .await
  }

  /// Write-through for conversation rows, keeping the embedded contact
  /// that writes do not return.
  fn conversation_effects(&self, record: &Conversation) -> Effects {
    let mut record = record.clone();
    if record.contact.is_none() {
      record.contact = self
        .client
        .get_query_data::<Conversation>(&keys::detail::<Conversations>(&record.id))
        .and_then(|cached| cached.contact);
    }
    row_effects::<Conversations>(&record)
  }
}

/// Mark the whole namespace and its dependent reads stale.
fn namespace_effects<R: Resource>() -> Effects {
  R::dependent_keys()
    .into_iter()
    .fold(Effects::new().invalidate(keys::all::<R>()), Effects::invalidate)
}

/// Store the returned row under its detail key and mark lists, counts and
/// dependent reads stale.
fn row_effects<R: Resource>(record: &R::Record) -> Effects {
  let effects = Effects::new()
    .write(keys::detail::<R>(record.id()), record)
    .invalidate(keys::lists::<R>())
    .invalidate(keys::counts::<R>());
  R::dependent_keys().into_iter().fold(effects, Effects::invalidate)
}

fn bump_conversation(
  mut page: Page<Conversation>,
  id: &str,
  at: DateTime<Utc>,
) -> Page<Conversation> {
  if let Some(pos) = page.items.iter().position(|c| c.id == id) {
    let mut conversation = page.items.remove(pos);
    conversation.last_message_at = Some(at);
    page.items.insert(0, conversation);
  }
  page
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::memory::MemoryBackend;
  use crate::cache::{CacheConfig, CacheEvent, QueryKey};
  use crate::error::ApiError;
  use crate::notify::{Notification, NotificationKind, RecordingNotifier};
  use crate::query::QueryState;
  use serde_json::{json, Value};
  use std::time::Duration;

  struct Harness {
    crm: CachedCrm,
    backend: Arc<MemoryBackend>,
    notifier: Arc<RecordingNotifier>,
  }

  fn harness(backend: MemoryBackend) -> Harness {
    let backend = Arc::new(backend);
    let notifier = Arc::new(RecordingNotifier::new());
    let crm = CachedCrm::new(
      CrmApi::new(backend.clone()),
      QueryClient::new(CacheConfig::default()),
      notifier.clone(),
      PollingConfig::default(),
    );
    Harness {
      crm,
      backend,
      notifier,
    }
  }

  fn contact(id: &str, last_name: &str) -> Value {
    json!({
      "id": id,
      "first_name": "Test",
      "last_name": last_name,
      "status": "lead",
      "created_at": "2024-01-01T00:00:00Z",
      "updated_at": "2024-01-01T00:00:00Z",
    })
  }

  fn contacts_backend() -> MemoryBackend {
    MemoryBackend::new().with_rows(
      "contacts",
      vec![
        contact("c-1", "Lovelace"),
        contact("c-2", "Hopper"),
        contact("c-3", "Turing"),
      ],
    )
  }

  fn conversation(id: &str, last_message_at: &str) -> Value {
    json!({
      "id": id,
      "contact_id": "c-1",
      "channel": "email",
      "status": "open",
      "unread_count": 1,
      "last_message_at": last_message_at,
      "created_at": "2024-01-01T00:00:00Z",
    })
  }

  fn invalidations_of(events: &mut tokio::sync::broadcast::Receiver<CacheEvent>, prefix: &QueryKey) -> usize {
    let mut count = 0;
    while let Ok(event) = events.try_recv() {
      if matches!(&event, CacheEvent::Invalidated { prefix: p, .. } if p == prefix) {
        count += 1;
      }
    }
    count
  }

  #[tokio::test]
  async fn test_list_is_served_from_cache() {
    let h = harness(contacts_backend());
    let filters = ContactFilters::default();
    let pagination = Pagination::default();

    let first = h.crm.list::<Contacts>(&filters, &pagination).await.unwrap();
    let second = h.crm.list::<Contacts>(&filters, &pagination).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.total, 3);
    assert_eq!(h.backend.request_count(), 1);
  }

  #[tokio::test]
  async fn test_concurrent_reads_share_one_request() {
    let h = harness(contacts_backend().with_delay(Duration::from_millis(20)));

    let (a, b) = tokio::join!(h.crm.get::<Contacts>("c-1"), h.crm.get::<Contacts>("c-1"));

    assert_eq!(a.unwrap().last_name, "Lovelace");
    assert_eq!(b.unwrap().last_name, "Lovelace");
    assert_eq!(h.backend.request_count(), 1);
  }

  #[tokio::test]
  async fn test_empty_id_never_reaches_backend() {
    let h = harness(contacts_backend());

    let err = h.crm.get::<Contacts>("").await.unwrap_err();
    assert!(matches!(err, ApiError::MissingId { resource: "contacts" }));

    let mut query = h.crm.detail_query::<Contacts>("");
    assert!(!query.is_enabled());
    query.fetch();
    assert!(!query.tick());
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();

    assert!(matches!(query.state(), QueryState::Idle));
    assert_eq!(h.backend.request_count(), 0);
  }

  #[tokio::test]
  async fn test_create_invalidates_resource_namespace() {
    let h = harness(contacts_backend());
    let filters = ContactFilters::default();
    let list_key = keys::list::<Contacts>(&filters, &Pagination::default());
    let detail_key = keys::detail::<Contacts>("c-1");
    let count_key = keys::count::<Contacts>(&filters);
    h.crm.list::<Contacts>(&filters, &Pagination::default()).await.unwrap();
    h.crm.get::<Contacts>("c-1").await.unwrap();
    h.crm.count::<Contacts>(&filters).await.unwrap();
    h.crm
      .client()
      .set_query_data(&keys::dashboard_stats(), &DashboardStats::default());

    let input = NewContact {
      first_name: "Katherine".to_string(),
      last_name: "Johnson".to_string(),
      ..Default::default()
    };
    h.crm.create::<Contacts>(&input).await.unwrap();

    let client = h.crm.client();
    assert!(client.is_invalidated(&list_key));
    assert!(client.is_invalidated(&detail_key));
    assert!(client.is_invalidated(&count_key));
    assert!(!client.is_invalidated(&keys::dashboard_stats()));
    assert_eq!(h.notifier.notifications(), vec![Notification::success("Contact created")]);

    // Next read goes back to the backend
    let page = h.crm.list::<Contacts>(&filters, &Pagination::default()).await.unwrap();
    assert_eq!(page.total, 4);
  }

  #[tokio::test]
  async fn test_update_writes_detail_and_invalidates_lists() {
    let h = harness(contacts_backend());
    let filters = ContactFilters::default();
    h.crm.list::<Contacts>(&filters, &Pagination::default()).await.unwrap();
    h.crm.get::<Contacts>("c-2").await.unwrap();
    let requests = h.backend.request_count();

    let patch = ContactPatch {
      status: Some(ContactStatus::Customer),
      ..Default::default()
    };
    h.crm.update::<Contacts>("c-2", &patch).await.unwrap();

    let client = h.crm.client();
    let detail_key = keys::detail::<Contacts>("c-2");
    assert!(!client.is_invalidated(&detail_key));
    assert!(client.is_invalidated(&keys::list::<Contacts>(&filters, &Pagination::default())));

    // Detail is served from the write-through, no extra request
    let detail = h.crm.get::<Contacts>("c-2").await.unwrap();
    assert_eq!(detail.status, ContactStatus::Customer);
    assert_eq!(h.backend.request_count(), requests + 1);
  }

  #[tokio::test]
  async fn test_failed_mutation_leaves_cache_and_notifies() {
    let h = harness(contacts_backend());
    let list_key = keys::list::<Contacts>(&ContactFilters::default(), &Pagination::default());
    h.crm.list::<Contacts>(&ContactFilters::default(), &Pagination::default()).await.unwrap();

    h.backend.fail_next(ApiError::Backend {
      status: 409,
      code: Some("23503".to_string()),
      message: "update or delete on table \"contacts\" violates foreign key constraint".to_string(),
      details: None,
      hint: None,
    });
    let result = h.crm.delete::<Contacts>("c-1").await;

    assert!(result.is_err());
    assert!(!h.crm.client().is_invalidated(&list_key));
    let notifications = h.notifier.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Error);
    assert_eq!(notifications[0].title, "Failed to delete contact");
    assert_eq!(
      notifications[0].description.as_deref(),
      Some("update or delete on table \"contacts\" violates foreign key constraint")
    );
    assert_eq!(h.backend.rows("contacts").len(), 3);
  }

  #[tokio::test]
  async fn test_bulk_delete_invalidates_once_and_reports_count() {
    let h = harness(contacts_backend());
    h.crm.list::<Contacts>(&ContactFilters::default(), &Pagination::default()).await.unwrap();
    let mut events = h.crm.client().subscribe();

    let ids: Vec<String> = ["c-1", "c-2", "c-3"].iter().map(|s| s.to_string()).collect();
    let deleted = h.crm.delete_contacts(&ids).await.unwrap();

    assert_eq!(deleted, 3);
    assert_eq!(invalidations_of(&mut events, &keys::all::<Contacts>()), 1);
    assert_eq!(h.notifier.notifications(), vec![Notification::success("3 contacts deleted")]);
    assert_eq!(h.backend.requests().last().map(String::as_str), Some("delete contacts"));
  }

  #[tokio::test]
  async fn test_send_message_updates_thread_and_conversation_list() {
    let h = harness(
      MemoryBackend::new()
        .with_rows(
          "conversations",
          vec![
            conversation("conv-1", "2024-01-01T08:00:00Z"),
            conversation("conv-2", "2024-01-01T09:00:00Z"),
          ],
        )
        .with_rows(
          "messages",
          vec![json!({
            "id": "m-1",
            "conversation_id": "conv-1",
            "direction": "inbound",
            "body": "Can we talk tomorrow?",
            "created_at": "2024-01-01T08:00:00Z",
          })],
        ),
    );
    let filters = ConversationFilters::default();
    let pagination = Pagination::default();
    let before = h.crm.list::<Conversations>(&filters, &pagination).await.unwrap();
    assert_eq!(before.items[0].id, "conv-2");
    h.crm.messages("conv-1").await.unwrap();

    let sent = h.crm.send_message("conv-1", "Sure, 10am works").await.unwrap();

    let client = h.crm.client();
    let thread: Vec<Message> = client.get_query_data(&keys::messages("conv-1")).unwrap();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[1], sent);

    let list_key = keys::list::<Conversations>(&filters, &pagination);
    let page: Page<Conversation> = client.get_query_data(&list_key).unwrap();
    assert_eq!(page.items[0].id, "conv-1");
    assert_eq!(page.items[0].last_message_at, Some(sent.created_at));
    assert!(client.is_invalidated(&list_key));
    assert!(client.is_invalidated(&keys::messages("conv-1")));
  }

  #[tokio::test]
  async fn test_toggle_automation_notifies_new_state() {
    let h = harness(MemoryBackend::new().with_rows(
      "automations",
      vec![json!({
        "id": "auto-1",
        "name": "Welcome email",
        "trigger_type": "contact_created",
        "actions": [{ "type": "send_email", "template": "welcome" }],
        "is_active": true,
        "run_count": 12,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z",
      })],
    ));

    let automation = h.crm.toggle_automation("auto-1", false).await.unwrap();

    assert!(!automation.is_active);
    assert_eq!(
      h.crm.client().get_query_data::<Automation>(&keys::detail::<Automations>("auto-1")),
      Some(automation)
    );
    assert_eq!(
      h.notifier.notifications(),
      vec![Notification::success("Automation deactivated")]
    );
  }

  #[tokio::test]
  async fn test_status_change_keeps_embedded_contact() {
    let h = harness(MemoryBackend::new().with_rows(
      "conversations",
      vec![conversation("conv-1", "2024-01-01T08:00:00Z")],
    ));
    let detail_key = keys::detail::<Conversations>("conv-1");
    let mut cached: Conversation = h.crm.get::<Conversations>("conv-1").await.unwrap();
    cached.contact = Some(ContactSummary {
      first_name: "Ada".to_string(),
      last_name: "Lovelace".to_string(),
      email: None,
    });
    h.crm.client().set_query_data(&detail_key, &cached);

    h.crm
      .set_conversation_status("conv-1", ConversationStatus::Closed)
      .await
      .unwrap();

    let detail: Conversation = h.crm.client().get_query_data(&detail_key).unwrap();
    assert_eq!(detail.status, ConversationStatus::Closed);
    assert_eq!(detail.contact.map(|c| c.first_name), Some("Ada".to_string()));
    assert_eq!(
      h.notifier.notifications(),
      vec![Notification::success("Conversation marked closed")]
    );
  }

  #[tokio::test]
  async fn test_completing_activity_refreshes_calendar() {
    let h = harness(MemoryBackend::new().with_rows(
      "activities",
      vec![json!({
        "id": "a-1",
        "activity_type": "meeting",
        "subject": "Quarterly review",
        "due_date": "2024-01-01T10:00:00Z",
        "duration_minutes": 30,
        "completed": false,
        "created_at": "2023-12-01T00:00:00Z",
        "updated_at": "2023-12-01T00:00:00Z",
      })],
    ));
    let now: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();

    let events = h.crm.calendar_events(None, now).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].completed);
    assert_eq!(events[0].end - events[0].start, chrono::Duration::minutes(30));

    h.crm.set_activity_completed("a-1", true).await.unwrap();
    assert!(h.crm.client().is_invalidated(&keys::calendar(None)));

    let events = h.crm.calendar_events(None, now).await.unwrap();
    assert!(events[0].completed);
  }

  #[tokio::test]
  async fn test_rescheduling_activity_refreshes_calendar() {
    let h = harness(MemoryBackend::new().with_rows(
      "activities",
      vec![json!({
        "id": "a-1",
        "activity_type": "call",
        "subject": "Follow up",
        "due_date": "2024-01-01T10:00:00Z",
        "duration_minutes": 30,
        "completed": false,
        "created_at": "2023-12-01T00:00:00Z",
        "updated_at": "2023-12-01T00:00:00Z",
      })],
    ));
    let now: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
    let client = h.crm.client().clone();

    h.crm.calendar_events(None, now).await.unwrap();
    client.set_query_data(&keys::upcoming_activities(5), &Vec::<Activity>::new());

    let moved: DateTime<Utc> = "2024-02-02T09:00:00Z".parse().unwrap();
    let patch = ActivityPatch {
      due_date: Some(moved),
      ..Default::default()
    };
    h.crm.update::<Activities>("a-1", &patch).await.unwrap();

    assert!(client.is_invalidated(&keys::calendar(None)));
    assert!(client.is_invalidated(&keys::upcoming_activities(5)));

    let events = h.crm.calendar_events(None, now).await.unwrap();
    assert_eq!(events[0].start, moved);
    assert_eq!(events[0].end, moved + chrono::Duration::minutes(30));
  }

  #[tokio::test]
  async fn test_live_views_declare_polling() {
    let h = harness(MemoryBackend::new());

    let dashboard = h.crm.dashboard_query();
    assert_eq!(dashboard.options().refetch_interval, Some(Duration::from_secs(60)));

    let conversations =
      h.crm.conversations_query(&ConversationFilters::default(), &Pagination::default());
    assert_eq!(conversations.options().refetch_interval, Some(Duration::from_secs(30)));

    let messages = h.crm.messages_query("conv-1");
    assert_eq!(messages.options().refetch_interval, Some(Duration::from_secs(10)));
    assert!(!h.crm.messages_query("").is_enabled());

    let report = h.crm.pipeline_report_query(None);
    assert_eq!(report.options().refetch_interval, None);
    assert_eq!(report.options().stale_time, Duration::from_secs(300));
  }
}
