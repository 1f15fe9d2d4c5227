//! Calendar view over activities.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Activity, ActivityType};

/// Length given to activities without a positive duration.
pub const DEFAULT_DURATION_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
  pub id: String,
  pub title: String,
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  pub all_day: bool,
  pub activity_type: ActivityType,
  pub completed: bool,
  pub contact_id: Option<String>,
}

/// Place one activity on the calendar. Undated activities become all-day
/// events starting at `now`.
pub fn to_event(activity: &Activity, now: DateTime<Utc>) -> CalendarEvent {
  let minutes = activity
    .duration_minutes
    .map(i64::from)
    .filter(|m| *m > 0)
    .unwrap_or(DEFAULT_DURATION_MINUTES);
  let start = activity.due_date.unwrap_or(now);

  CalendarEvent {
    id: activity.id.clone(),
    title: activity.subject.clone(),
    start,
    end: start + Duration::minutes(minutes),
    all_day: activity.due_date.is_none(),
    activity_type: activity.activity_type,
    completed: activity.completed,
    contact_id: activity.contact_id.clone(),
  }
}

pub fn project(activities: &[Activity], now: DateTime<Utc>) -> Vec<CalendarEvent> {
  activities.iter().map(|a| to_event(a, now)).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn activity(due_date: Option<&str>, duration_minutes: Option<u32>) -> Activity {
    let created: DateTime<Utc> = "2023-12-01T00:00:00Z".parse().unwrap();
    Activity {
      id: "a-1".to_string(),
      activity_type: ActivityType::Call,
      subject: "Intro call".to_string(),
      description: None,
      due_date: due_date.map(|d| d.parse().unwrap()),
      duration_minutes,
      completed: false,
      contact_id: Some("c-1".to_string()),
      opportunity_id: None,
      created_at: created,
      updated_at: created,
    }
  }

  fn now() -> DateTime<Utc> {
    "2024-06-01T08:15:00Z".parse().unwrap()
  }

  #[test]
  fn test_undated_activity_is_all_day_hour() {
    let event = to_event(&activity(None, None), now());
    assert!(event.all_day);
    assert_eq!(event.start, now());
    assert_eq!(event.end - event.start, Duration::minutes(60));
  }

  #[test]
  fn test_dated_activity_uses_its_duration() {
    let event = to_event(&activity(Some("2024-01-01T10:00:00Z"), Some(30)), now());
    assert!(!event.all_day);
    assert_eq!(event.start, "2024-01-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap());
    assert_eq!(event.end, "2024-01-01T10:30:00Z".parse::<DateTime<Utc>>().unwrap());
    assert_eq!(event.title, "Intro call");
    assert_eq!(event.contact_id.as_deref(), Some("c-1"));
  }

  #[test]
  fn test_zero_duration_falls_back_to_default() {
    let event = to_event(&activity(Some("2024-01-01T10:00:00Z"), Some(0)), now());
    assert_eq!(event.end - event.start, Duration::minutes(60));
  }

  #[test]
  fn test_projection_leaves_source_untouched() {
    let source = vec![activity(None, None), activity(Some("2024-01-01T10:00:00Z"), Some(45))];
    let before = source.clone();

    let first = project(&source, now());
    let second = project(&source, now());

    assert_eq!(first, second);
    assert_eq!(source, before);
    assert_eq!(first.len(), 2);
  }
}
