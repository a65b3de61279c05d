//! Row shapes read from the relational store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::table::Table;

/// A single changed row, tagged with its source table.
///
/// `columns` holds the raw row as a JSON object so dependent rows can be
/// validated into documents without a per-table struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedRow {
    pub table: Table,
    pub id: String,
    pub modified: DateTime<Utc>,
    pub columns: Map<String, Value>,
}

impl ChangedRow {
    pub fn new(table: Table, id: impl Into<String>, modified: DateTime<Utc>) -> Self {
        let id = id.into();
        let mut columns = Map::new();
        columns.insert("id".to_string(), Value::String(id.clone()));
        Self {
            table,
            id,
            modified,
            columns,
        }
    }

    /// Builder-style column setter.
    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }

    /// Keyset position of this row within its table scan.
    pub fn cursor(&self) -> RowCursor {
        RowCursor {
            modified: self.modified,
            id: self.id.clone(),
        }
    }
}

/// Position after which the next page of a table scan starts.
///
/// Rows are ordered by `(modified, id)`, so rows sharing a timestamp are
/// never skipped or repeated across pages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowCursor {
    pub modified: DateTime<Utc>,
    pub id: String,
}

/// One flattened row of the film work / person / genre join.
///
/// Left joins mean every association column may be NULL; a film work with
/// no people and no genres still yields one row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinRow {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub role: Option<String>,
    pub person_id: Option<String>,
    pub full_name: Option<String>,
    pub genre_name: Option<String>,
}

impl JoinRow {
    /// Row carrying only the film work's own columns.
    pub fn film(
        id: impl Into<String>,
        title: impl Into<String>,
        description: Option<&str>,
        rating: Option<f64>,
    ) -> Self {
        Self {
            id: id.into(),
            title: Some(title.into()),
            description: description.map(str::to_string),
            rating,
            ..Default::default()
        }
    }

    pub fn with_person(
        mut self,
        role: impl Into<String>,
        person_id: impl Into<String>,
        full_name: impl Into<String>,
    ) -> Self {
        self.role = Some(role.into());
        self.person_id = Some(person_id.into());
        self.full_name = Some(full_name.into());
        self
    }

    pub fn with_genre(mut self, genre_name: impl Into<String>) -> Self {
        self.genre_name = Some(genre_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_changed_row_keeps_id_column() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let row = ChangedRow::new(Table::Person, "p-1", ts).with_column("full_name", "Ann");

        assert_eq!(row.columns.get("id"), Some(&Value::String("p-1".into())));
        assert_eq!(row.columns.get("full_name"), Some(&Value::String("Ann".into())));
    }

    #[test]
    fn test_row_cursor_orders_by_time_then_id() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let a = ChangedRow::new(Table::Genre, "a", ts).cursor();
        let b = ChangedRow::new(Table::Genre, "b", ts).cursor();
        let later = ChangedRow::new(Table::Genre, "0", ts + chrono::Duration::seconds(1)).cursor();

        assert!(a < b);
        assert!(b < later);
    }
}
