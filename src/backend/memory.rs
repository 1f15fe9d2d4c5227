//! In-memory backend for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use super::client::{Backend, Rows};
use super::filter::{Predicate, Select, SortDirection};
use crate::error::{ApiError, ApiResult};

/// Tables held in memory with just enough filtering to stand in for the
/// real backend. Counts every round trip.
#[derive(Default)]
pub struct MemoryBackend {
  tables: Mutex<HashMap<String, Vec<Value>>>,
  functions: Mutex<HashMap<String, Value>>,
  fail_next: Mutex<Option<ApiError>>,
  delay: Mutex<Option<Duration>>,
  next_id: AtomicUsize,
  requests: AtomicUsize,
  log: Mutex<Vec<String>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_rows(self, table: &str, rows: Vec<Value>) -> Self {
    self.tables.lock().insert(table.to_string(), rows);
    self
  }

  pub fn with_function(self, name: &str, result: Value) -> Self {
    self.functions.lock().insert(name.to_string(), result);
    self
  }

  /// Make every request wait before answering.
  pub fn with_delay(self, delay: Duration) -> Self {
    *self.delay.lock() = Some(delay);
    self
  }

  /// Fail the next request with `error`.
  pub fn fail_next(&self, error: ApiError) {
    *self.fail_next.lock() = Some(error);
  }

  /// Number of round trips served so far.
  pub fn request_count(&self) -> usize {
    self.requests.load(AtomicOrdering::SeqCst)
  }

  /// `"<op> <table>"` for every request, in order.
  pub fn requests(&self) -> Vec<String> {
    self.log.lock().clone()
  }

  pub fn rows(&self, table: &str) -> Vec<Value> {
    self.tables.lock().get(table).cloned().unwrap_or_default()
  }

  async fn begin(&self, op: &str, target: &str) -> ApiResult<()> {
    self.requests.fetch_add(1, AtomicOrdering::SeqCst);
    self.log.lock().push(format!("{} {}", op, target));
    let delay = *self.delay.lock();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    match self.fail_next.lock().take() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

fn as_text(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

fn matches(row: &Value, predicate: &Predicate) -> bool {
  let field = |column: &str| row.get(column).and_then(as_text);
  match predicate {
    Predicate::Eq { column, value } => field(column).as_deref() == Some(value.as_str()),
    Predicate::ILike { column, pattern } => field(column)
      .map(|v| v.to_lowercase().contains(&pattern.to_lowercase()))
      .unwrap_or(false),
    Predicate::AnyILike { columns, pattern } => columns.iter().any(|c| {
      field(c)
        .map(|v| v.to_lowercase().contains(&pattern.to_lowercase()))
        .unwrap_or(false)
    }),
    Predicate::In { column, values } => field(column)
      .map(|v| values.contains(&v))
      .unwrap_or(false),
    Predicate::Gte { column, value } => field(column)
      .map(|v| v.as_str() >= value.as_str())
      .unwrap_or(false),
    Predicate::Lte { column, value } => field(column)
      .map(|v| v.as_str() <= value.as_str())
      .unwrap_or(false),
  }
}

fn compare(a: &Value, b: &Value) -> Ordering {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => x
      .as_f64()
      .partial_cmp(&y.as_f64())
      .unwrap_or(Ordering::Equal),
    _ => as_text(a).cmp(&as_text(b)),
  }
}

#[async_trait]
impl Backend for MemoryBackend {
  async fn select(&self, query: &Select) -> ApiResult<Rows> {
    self.begin("select", &query.table).await?;

    let mut rows: Vec<Value> = self
      .rows(&query.table)
      .into_iter()
      .filter(|row| query.filters.iter().all(|p| matches(row, p)))
      .collect();

    for order in query.order.iter().rev() {
      rows.sort_by(|a, b| {
        let ord = compare(&a[&order.column], &b[&order.column]);
        match order.direction {
          SortDirection::Asc => ord,
          SortDirection::Desc => ord.reverse(),
        }
      });
    }

    let total = query.count.then_some(rows.len() as u64);
    let offset = query.offset.unwrap_or(0) as usize;
    let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
    let rows = rows.into_iter().skip(offset).take(limit).collect();

    Ok(Rows { rows, total })
  }

  async fn insert(&self, table: &str, rows: Value) -> ApiResult<Vec<Value>> {
    self.begin("insert", table).await?;

    let new_rows = match rows {
      Value::Array(rows) => rows,
      row => vec![row],
    };
    let mut stored = Vec::new();
    let mut tables = self.tables.lock();
    let target = tables.entry(table.to_string()).or_default();
    for row in new_rows {
      let mut object: Map<String, Value> = match row {
        Value::Object(map) => map,
        other => return Err(ApiError::decode(format!("cannot insert {}", other))),
      };
      let n = self.next_id.fetch_add(1, AtomicOrdering::SeqCst) + 1;
      object
        .entry("id")
        .or_insert_with(|| Value::String(format!("{}-{}", table, n)));
      let stamp = Value::String(format!("2024-01-01T00:00:{:02}Z", n % 60));
      object
        .entry("created_at")
        .or_insert_with(|| stamp.clone());
      object.entry("updated_at").or_insert(stamp);
      let row = Value::Object(object);
      target.push(row.clone());
      stored.push(row);
    }
    Ok(stored)
  }

  async fn update(
    &self,
    table: &str,
    filters: &[Predicate],
    patch: Value,
  ) -> ApiResult<Vec<Value>> {
    self.begin("update", table).await?;

    let mut updated = Vec::new();
    let mut tables = self.tables.lock();
    if let (Some(rows), Value::Object(patch)) = (tables.get_mut(table), patch) {
      for row in rows.iter_mut() {
        if filters.iter().all(|p| matches(row, p)) {
          if let Value::Object(object) = row {
            for (k, v) in &patch {
              object.insert(k.clone(), v.clone());
            }
          }
          updated.push(row.clone());
        }
      }
    }
    Ok(updated)
  }

  async fn delete(&self, table: &str, filters: &[Predicate]) -> ApiResult<Vec<Value>> {
    self.begin("delete", table).await?;

    let mut tables = self.tables.lock();
    let Some(rows) = tables.get_mut(table) else {
      return Ok(Vec::new());
    };
    let (deleted, kept): (Vec<Value>, Vec<Value>) = rows
      .drain(..)
      .partition(|row| filters.iter().all(|p| matches(row, p)));
    *rows = kept;
    Ok(deleted)
  }

  async fn rpc(&self, function: &str, _args: Value) -> ApiResult<Value> {
    self.begin("rpc", function).await?;

    self
      .functions
      .lock()
      .get(function)
      .cloned()
      .ok_or_else(|| ApiError::Backend {
        status: 404,
        code: Some("PGRST202".to_string()),
        message: format!("Could not find the function public.{}", function),
        details: None,
        hint: None,
      })
  }
}
