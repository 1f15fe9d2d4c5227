//! CRM records, their create/patch inputs and list filters.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Predicate;
use crate::cache::Cacheable;

/// A stored row with a backend-generated id.
pub trait Record: Cacheable {
  fn id(&self) -> &str;
}

/// Filter object for list and count reads. The default value means "no
/// restriction"; unset fields are left out of cache keys.
pub trait ListFilters: Serialize + Default + Clone + Send + Sync + 'static {
  fn predicates(&self) -> Vec<Predicate>;
}

fn timestamp(at: &DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Inclusive time window for calendar and report reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
  pub from: DateTime<Utc>,
  pub to: DateTime<Utc>,
}

impl DateRange {
  pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
    Self { from, to }
  }

  /// `from <= column <= to`
  pub fn predicates(&self, column: &str) -> [Predicate; 2] {
    [
      Predicate::gte(column, timestamp(&self.from)),
      Predicate::lte(column, timestamp(&self.to)),
    ]
  }

  /// Arguments for the report functions.
  pub fn rpc_args(&self) -> Value {
    serde_json::json!({
      "start_date": timestamp(&self.from),
      "end_date": timestamp(&self.to),
    })
  }
}

// --- Contacts ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
  #[default]
  Lead,
  Prospect,
  Customer,
  Churned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
  pub id: String,
  pub first_name: String,
  pub last_name: String,
  pub email: Option<String>,
  pub phone: Option<String>,
  pub company_id: Option<String>,
  #[serde(default)]
  pub status: ContactStatus,
  #[serde(default)]
  pub tags: Vec<String>,
  pub notes: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Contact {
  pub fn full_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name)
  }
}

impl Record for Contact {
  fn id(&self) -> &str {
    &self.id
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewContact {
  pub first_name: String,
  pub last_name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub company_id: Option<String>,
  pub status: ContactStatus,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub first_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub company_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<ContactStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tags: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFilters {
  /// Substring of first name, last name or email
  #[serde(skip_serializing_if = "Option::is_none")]
  pub search: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<ContactStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub company_id: Option<String>,
}

impl ListFilters for ContactFilters {
  fn predicates(&self) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
      predicates.push(Predicate::any_ilike(
        &["first_name", "last_name", "email"],
        search,
      ));
    }
    if let Some(status) = self.status {
      predicates.push(Predicate::eq("status", label(&status)));
    }
    if let Some(company_id) = &self.company_id {
      predicates.push(Predicate::eq("company_id", company_id));
    }
    predicates
  }
}

// --- Companies ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
  pub id: String,
  pub name: String,
  pub domain: Option<String>,
  pub industry: Option<String>,
  pub size: Option<String>,
  pub website: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Record for Company {
  fn id(&self) -> &str {
    &self.id
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCompany {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub domain: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub industry: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub size: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub website: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub domain: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub industry: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub size: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub website: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyFilters {
  /// Substring of name or domain
  #[serde(skip_serializing_if = "Option::is_none")]
  pub search: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub industry: Option<String>,
}

impl ListFilters for CompanyFilters {
  fn predicates(&self) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
      predicates.push(Predicate::any_ilike(&["name", "domain"], search));
    }
    if let Some(industry) = &self.industry {
      predicates.push(Predicate::ilike("industry", industry.as_str()));
    }
    predicates
  }
}

// --- Opportunities ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStage {
  #[default]
  Lead,
  Qualified,
  Proposal,
  Negotiation,
  Won,
  Lost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub value: f64,
  #[serde(default)]
  pub stage: OpportunityStage,
  pub probability: Option<u8>,
  pub contact_id: Option<String>,
  pub company_id: Option<String>,
  pub expected_close_date: Option<NaiveDate>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Record for Opportunity {
  fn id(&self) -> &str {
    &self.id
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewOpportunity {
  pub title: String,
  pub value: f64,
  pub stage: OpportunityStage,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub probability: Option<u8>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub contact_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub company_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expected_close_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub value: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stage: Option<OpportunityStage>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub probability: Option<u8>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub contact_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub company_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expected_close_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityFilters {
  /// Substring of the title
  #[serde(skip_serializing_if = "Option::is_none")]
  pub search: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stage: Option<OpportunityStage>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub contact_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub company_id: Option<String>,
}

impl ListFilters for OpportunityFilters {
  fn predicates(&self) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
      predicates.push(Predicate::ilike("title", search));
    }
    if let Some(stage) = self.stage {
      predicates.push(Predicate::eq("stage", label(&stage)));
    }
    if let Some(contact_id) = &self.contact_id {
      predicates.push(Predicate::eq("contact_id", contact_id));
    }
    if let Some(company_id) = &self.company_id {
      predicates.push(Predicate::eq("company_id", company_id));
    }
    predicates
  }
}

// --- Activities ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
  Call,
  Email,
  Meeting,
  #[default]
  Task,
  Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
  pub id: String,
  pub activity_type: ActivityType,
  pub subject: String,
  pub description: Option<String>,
  pub due_date: Option<DateTime<Utc>>,
  pub duration_minutes: Option<u32>,
  #[serde(default)]
  pub completed: bool,
  pub contact_id: Option<String>,
  pub opportunity_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Record for Activity {
  fn id(&self) -> &str {
    &self.id
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewActivity {
  pub activity_type: ActivityType,
  pub subject: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub duration_minutes: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub contact_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub opportunity_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub activity_type: Option<ActivityType>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub duration_minutes: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFilters {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub activity_type: Option<ActivityType>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub contact_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub opportunity_id: Option<String>,
}

impl ListFilters for ActivityFilters {
  fn predicates(&self) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    if let Some(activity_type) = self.activity_type {
      predicates.push(Predicate::eq("activity_type", label(&activity_type)));
    }
    if let Some(completed) = self.completed {
      predicates.push(Predicate::eq("completed", completed));
    }
    if let Some(contact_id) = &self.contact_id {
      predicates.push(Predicate::eq("contact_id", contact_id));
    }
    if let Some(opportunity_id) = &self.opportunity_id {
      predicates.push(Predicate::eq("opportunity_id", opportunity_id));
    }
    predicates
  }
}

// --- Conversations ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
  #[default]
  Email,
  Sms,
  Chat,
  Whatsapp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
  #[default]
  Open,
  Pending,
  Closed,
}

/// Contact fields embedded in conversation reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSummary {
  pub first_name: String,
  pub last_name: String,
  pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
  pub id: String,
  pub contact_id: Option<String>,
  #[serde(default)]
  pub channel: Channel,
  pub subject: Option<String>,
  #[serde(default)]
  pub status: ConversationStatus,
  #[serde(default)]
  pub unread_count: u32,
  pub last_message_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  /// Present on reads; writes return the bare row
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub contact: Option<ContactSummary>,
}

impl Record for Conversation {
  fn id(&self) -> &str {
    &self.id
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewConversation {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub contact_id: Option<String>,
  pub channel: Channel,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<ConversationStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unread_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationFilters {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<ConversationStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub channel: Option<Channel>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub contact_id: Option<String>,
}

impl ListFilters for ConversationFilters {
  fn predicates(&self) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    if let Some(status) = self.status {
      predicates.push(Predicate::eq("status", label(&status)));
    }
    if let Some(channel) = self.channel {
      predicates.push(Predicate::eq("channel", label(&channel)));
    }
    if let Some(contact_id) = &self.contact_id {
      predicates.push(Predicate::eq("contact_id", contact_id));
    }
    predicates
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
  Inbound,
  Outbound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  pub id: String,
  pub conversation_id: String,
  pub direction: MessageDirection,
  pub body: String,
  pub created_at: DateTime<Utc>,
}

impl Record for Message {
  fn id(&self) -> &str {
    &self.id
  }
}

/// Row written when the user replies.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct NewMessage<'a> {
  pub conversation_id: &'a str,
  pub direction: MessageDirection,
  pub body: &'a str,
}

// --- Automations ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub trigger_type: String,
  /// Action list, stored as the backend's JSON document
  #[serde(default)]
  pub actions: Value,
  #[serde(default)]
  pub is_active: bool,
  #[serde(default)]
  pub run_count: u64,
  pub last_run_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Record for Automation {
  fn id(&self) -> &str {
    &self.id
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewAutomation {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub trigger_type: String,
  pub actions: Value,
  pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomationPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub trigger_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub actions: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationFilters {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub trigger_type: Option<String>,
}

impl ListFilters for AutomationFilters {
  fn predicates(&self) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    if let Some(is_active) = self.is_active {
      predicates.push(Predicate::eq("is_active", is_active));
    }
    if let Some(trigger_type) = &self.trigger_type {
      predicates.push(Predicate::eq("trigger_type", trigger_type));
    }
    predicates
  }
}

// --- Dashboard and reports ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardStats {
  pub total_contacts: u64,
  pub total_companies: u64,
  pub open_opportunities: u64,
  pub pipeline_value: f64,
  pub won_value: f64,
  pub activities_due_today: u64,
  pub open_conversations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStageReport {
  pub stage: OpportunityStage,
  pub count: u64,
  pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTypeReport {
  pub activity_type: ActivityType,
  pub total: u64,
  pub completed: u64,
}

/// Wire name of a unit enum variant (`OpportunityStage::Won` -> `"won"`).
pub fn label<T: Serialize>(value: &T) -> String {
  match serde_json::to_value(value) {
    Ok(Value::String(s)) => s,
    Ok(other) => other.to_string(),
    Err(_) => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_empty_filters_have_no_predicates() {
    assert!(ContactFilters::default().predicates().is_empty());
    assert!(ConversationFilters::default().predicates().is_empty());
    assert_eq!(serde_json::to_value(ContactFilters::default()).unwrap(), json!({}));
  }

  #[test]
  fn test_contact_search_spans_name_and_email() {
    let filters = ContactFilters {
      search: Some("ada".to_string()),
      status: Some(ContactStatus::Customer),
      ..Default::default()
    };
    assert_eq!(
      filters.predicates(),
      vec![
        Predicate::any_ilike(&["first_name", "last_name", "email"], "ada"),
        Predicate::eq("status", "customer"),
      ]
    );
  }

  #[test]
  fn test_patch_omits_unset_fields() {
    let patch = OpportunityPatch {
      stage: Some(OpportunityStage::Negotiation),
      ..Default::default()
    };
    assert_eq!(serde_json::to_value(&patch).unwrap(), json!({ "stage": "negotiation" }));
  }

  #[test]
  fn test_conversation_reads_embedded_contact() {
    let row = json!({
      "id": "conv-1",
      "contact_id": "c-1",
      "channel": "whatsapp",
      "subject": null,
      "status": "pending",
      "unread_count": 2,
      "last_message_at": "2024-03-01T09:30:00Z",
      "created_at": "2024-02-28T12:00:00Z",
      "contact": { "first_name": "Ada", "last_name": "Lovelace", "email": null }
    });
    let conversation: Conversation = serde_json::from_value(row).unwrap();
    assert_eq!(conversation.channel, Channel::Whatsapp);
    assert_eq!(conversation.contact.unwrap().last_name, "Lovelace");
  }

  #[test]
  fn test_date_range_predicates() {
    let range = DateRange::new(
      "2024-01-01T00:00:00Z".parse().unwrap(),
      "2024-01-31T23:59:59Z".parse().unwrap(),
    );
    assert_eq!(
      range.predicates("due_date"),
      [
        Predicate::gte("due_date", "2024-01-01T00:00:00Z"),
        Predicate::lte("due_date", "2024-01-31T23:59:59Z"),
      ]
    );
  }
}
