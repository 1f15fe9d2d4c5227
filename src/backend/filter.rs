//! Request descriptors for the relational backend: row predicates,
//! ordering, pagination and the paged result type.

use serde::{Deserialize, Serialize};

/// A single row filter understood by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
  /// `column = value`
  Eq { column: String, value: String },
  /// Case-insensitive substring match on one column
  ILike { column: String, pattern: String },
  /// Case-insensitive substring match on any of several columns
  AnyILike {
    columns: Vec<String>,
    pattern: String,
  },
  /// `column IN (values)`
  In { column: String, values: Vec<String> },
  /// `column >= value`
  Gte { column: String, value: String },
  /// `column <= value`
  Lte { column: String, value: String },
}

impl Predicate {
  pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
    Self::Eq {
      column: column.into(),
      value: value.to_string(),
    }
  }

  pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Self {
    Self::ILike {
      column: column.into(),
      pattern: pattern.into(),
    }
  }

  pub fn any_ilike(columns: &[&str], pattern: impl Into<String>) -> Self {
    Self::AnyILike {
      columns: columns.iter().map(|c| c.to_string()).collect(),
      pattern: pattern.into(),
    }
  }

  pub fn is_in<S: ToString>(column: impl Into<String>, values: &[S]) -> Self {
    Self::In {
      column: column.into(),
      values: values.iter().map(ToString::to_string).collect(),
    }
  }

  pub fn gte(column: impl Into<String>, value: impl ToString) -> Self {
    Self::Gte {
      column: column.into(),
      value: value.to_string(),
    }
  }

  pub fn lte(column: impl Into<String>, value: impl ToString) -> Self {
    Self::Lte {
      column: column.into(),
      value: value.to_string(),
    }
  }

  /// Render as a query-string pair.
  pub fn to_query_pair(&self) -> (String, String) {
    match self {
      Self::Eq { column, value } => (column.clone(), format!("eq.{}", value)),
      Self::ILike { column, pattern } => (column.clone(), format!("ilike.*{}*", pattern)),
      Self::AnyILike { columns, pattern } => {
        let term = quote_reserved(&format!("*{}*", pattern));
        let alternatives: Vec<String> = columns
          .iter()
          .map(|c| format!("{}.ilike.{}", c, term))
          .collect();
        ("or".to_string(), format!("({})", alternatives.join(",")))
      }
      Self::In { column, values } => {
        let quoted: Vec<String> = values.iter().map(|v| quote(v)).collect();
        (column.clone(), format!("in.({})", quoted.join(",")))
      }
      Self::Gte { column, value } => (column.clone(), format!("gte.{}", value)),
      Self::Lte { column, value } => (column.clone(), format!("lte.{}", value)),
    }
  }
}

/// Double-quote a value for use inside a parenthesized list.
fn quote(value: &str) -> String {
  format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Quote only when the value contains list delimiters.
fn quote_reserved(value: &str) -> String {
  if value.contains([',', '(', ')', '"', ':']) {
    quote(value)
  } else {
    value.to_string()
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
  Asc,
  #[default]
  Desc,
}

impl SortDirection {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Asc => "asc",
      Self::Desc => "desc",
    }
  }
}

/// Ordering clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
  pub column: String,
  pub direction: SortDirection,
}

/// Page request for list operations. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pagination {
  pub page: u32,
  pub page_size: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sort_by: Option<String>,
  #[serde(default)]
  pub sort_direction: SortDirection,
}

impl Default for Pagination {
  fn default() -> Self {
    Self {
      page: 1,
      page_size: 25,
      sort_by: None,
      sort_direction: SortDirection::Desc,
    }
  }
}

impl Pagination {
  pub fn new(page: u32, page_size: u32) -> Self {
    Self {
      page,
      page_size,
      ..Default::default()
    }
  }

  pub fn sorted_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
    self.sort_by = Some(column.into());
    self.sort_direction = direction;
    self
  }

  /// Row offset of the first item on this page.
  pub fn offset(&self) -> u64 {
    u64::from(self.page.max(1) - 1) * u64::from(self.page_size)
  }
}

/// One page of a list result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  /// Total matching rows across all pages
  pub total: u64,
  pub page: u32,
  pub page_size: u32,
}

impl<T> Page<T> {
  pub fn total_pages(&self) -> u64 {
    if self.page_size == 0 {
      return 0;
    }
    self.total.div_ceil(u64::from(self.page_size))
  }

  pub fn has_next(&self) -> bool {
    u64::from(self.page) < self.total_pages()
  }
}

/// A read against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
  pub table: String,
  pub columns: String,
  pub filters: Vec<Predicate>,
  pub order: Vec<Order>,
  pub offset: Option<u64>,
  pub limit: Option<u64>,
  /// Ask the backend for the exact number of matching rows
  pub count: bool,
}

impl Select {
  pub fn new(table: impl Into<String>) -> Self {
    Self {
      table: table.into(),
      columns: "*".to_string(),
      filters: Vec::new(),
      order: Vec::new(),
      offset: None,
      limit: None,
      count: false,
    }
  }

  pub fn columns(mut self, columns: impl Into<String>) -> Self {
    self.columns = columns.into();
    self
  }

  pub fn filter(mut self, predicate: Predicate) -> Self {
    self.filters.push(predicate);
    self
  }

  pub fn filters(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
    self.filters.extend(predicates);
    self
  }

  pub fn order(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
    self.order.push(Order {
      column: column.into(),
      direction,
    });
    self
  }

  pub fn limit(mut self, limit: u64) -> Self {
    self.limit = Some(limit);
    self
  }

  /// Apply a page request, falling back to `default_sort` when no sort
  /// column is given.
  pub fn paginate(mut self, pagination: &Pagination, default_sort: &str) -> Self {
    let column = pagination.sort_by.as_deref().unwrap_or(default_sort);
    self = self.order(column, pagination.sort_direction);
    self.offset = Some(pagination.offset());
    self.limit = Some(u64::from(pagination.page_size));
    self
  }

  pub fn with_count(mut self) -> Self {
    self.count = true;
    self
  }

  /// Query-string pairs for this read.
  pub fn to_query_pairs(&self) -> Vec<(String, String)> {
    let mut pairs = vec![("select".to_string(), self.columns.clone())];
    pairs.extend(self.filters.iter().map(Predicate::to_query_pair));
    if !self.order.is_empty() {
      let order: Vec<String> = self
        .order
        .iter()
        .map(|o| format!("{}.{}", o.column, o.direction.as_str()))
        .collect();
      pairs.push(("order".to_string(), order.join(",")));
    }
    if let Some(offset) = self.offset {
      pairs.push(("offset".to_string(), offset.to_string()));
    }
    if let Some(limit) = self.limit {
      pairs.push(("limit".to_string(), limit.to_string()));
    }
    pairs
  }
}
