//! In-memory change source for tests.
//!
//! Models the three watched tables and the two association tables with
//! left-join semantics matching the PostgreSQL queries, so the rest of the
//! pipeline can be exercised without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use etl_types::{ChangedRow, JoinRow, RowCursor, Table};

use super::{ChangeSource, SourceError};

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<Table, BTreeMap<String, ChangedRow>>,
    /// (film_work_id, person_id, role)
    person_links: Vec<(String, String, String)>,
    /// (film_work_id, genre_id)
    genre_links: Vec<(String, String)>,
    unavailable_calls: usize,
}

impl State {
    fn take_unavailable(&mut self) -> Result<(), SourceError> {
        if self.unavailable_calls > 0 {
            self.unavailable_calls -= 1;
            return Err(SourceError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn row(&self, table: Table, id: &str) -> Option<&ChangedRow> {
        self.tables.get(&table)?.get(id)
    }
}

fn column_str(row: &ChangedRow, name: &str) -> Option<String> {
    row.columns
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `ChangeSource` over in-process tables.
#[derive(Debug, Default)]
pub struct MemorySource {
    state: Mutex<State>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a raw row.
    pub fn put_row(&self, row: ChangedRow) {
        self.state()
            .tables
            .entry(row.table)
            .or_default()
            .insert(row.id.clone(), row);
    }

    pub fn put_film(
        &self,
        id: &str,
        title: &str,
        description: Option<&str>,
        rating: Option<f64>,
        modified: DateTime<Utc>,
    ) {
        self.put_row(
            ChangedRow::new(Table::FilmWork, id, modified)
                .with_column("title", title)
                .with_column("description", description)
                .with_column("rating", rating),
        );
    }

    pub fn put_person(&self, id: &str, full_name: &str, modified: DateTime<Utc>) {
        self.put_row(
            ChangedRow::new(Table::Person, id, modified).with_column("full_name", full_name),
        );
    }

    pub fn put_genre(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
        modified: DateTime<Utc>,
    ) {
        self.put_row(
            ChangedRow::new(Table::Genre, id, modified)
                .with_column("name", name)
                .with_column("description", description),
        );
    }

    pub fn link_person(&self, film_id: &str, person_id: &str, role: &str) {
        self.state().person_links.push((
            film_id.to_string(),
            person_id.to_string(),
            role.to_string(),
        ));
    }

    pub fn link_genre(&self, film_id: &str, genre_id: &str) {
        self.state()
            .genre_links
            .push((film_id.to_string(), genre_id.to_string()));
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.state().unavailable_calls = n;
    }
}

#[async_trait]
impl ChangeSource for MemorySource {
    async fn scan_table(
        &self,
        table: Table,
        since: DateTime<Utc>,
        after: Option<&RowCursor>,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, SourceError> {
        let mut state = self.state();
        state.take_unavailable()?;

        let mut rows: Vec<ChangedRow> = state
            .tables
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|row| row.modified > since)
                    .filter(|row| after.map_or(true, |cursor| row.cursor() > *cursor))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| a.cursor().cmp(&b.cursor()));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn resolve_root_ids(
        &self,
        table: Table,
        ids: &[String],
    ) -> Result<Vec<String>, SourceError> {
        let mut state = self.state();
        state.take_unavailable()?;

        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let linked: HashSet<&str> = match table {
            Table::Person => state
                .person_links
                .iter()
                .filter(|(_, person, _)| wanted.contains(person.as_str()))
                .map(|(film, _, _)| film.as_str())
                .collect(),
            Table::Genre => state
                .genre_links
                .iter()
                .filter(|(_, genre)| wanted.contains(genre.as_str()))
                .map(|(film, _)| film.as_str())
                .collect(),
            Table::FilmWork => {
                return Err(SourceError::UnsupportedTable {
                    operation: "resolve_root_ids",
                    table,
                })
            }
        };

        // Inner join on film_work: links to missing films drop out
        let mut films: Vec<RowCursor> = linked
            .into_iter()
            .filter_map(|id| state.row(Table::FilmWork, id))
            .map(ChangedRow::cursor)
            .collect();
        films.sort();
        Ok(films.into_iter().map(|c| c.id).collect())
    }

    async fn fetch_join_rows(&self, root_ids: &[String]) -> Result<Vec<JoinRow>, SourceError> {
        let mut state = self.state();
        state.take_unavailable()?;

        let mut out = Vec::new();
        for film_id in root_ids {
            let Some(film) = state.row(Table::FilmWork, film_id) else {
                continue;
            };
            let base = JoinRow {
                id: film.id.clone(),
                title: column_str(film, "title"),
                description: column_str(film, "description"),
                rating: film.columns.get("rating").and_then(Value::as_f64),
                ..Default::default()
            };

            let people: Vec<(Option<String>, Option<String>, Option<String>)> = state
                .person_links
                .iter()
                .filter(|(f, _, _)| f == film_id)
                .map(|(_, person_id, role)| match state.row(Table::Person, person_id) {
                    Some(person) => (
                        Some(role.clone()),
                        Some(person.id.clone()),
                        column_str(person, "full_name"),
                    ),
                    None => (Some(role.clone()), None, None),
                })
                .collect();

            let genres: Vec<Option<String>> = state
                .genre_links
                .iter()
                .filter(|(f, _)| f == film_id)
                .map(|(_, genre_id)| {
                    state
                        .row(Table::Genre, genre_id)
                        .and_then(|genre| column_str(genre, "name"))
                })
                .collect();

            let people = if people.is_empty() {
                vec![(None, None, None)]
            } else {
                people
            };
            let genres = if genres.is_empty() { vec![None] } else { genres };

            for (role, person_id, full_name) in &people {
                for genre_name in &genres {
                    out.push(JoinRow {
                        role: role.clone(),
                        person_id: person_id.clone(),
                        full_name: full_name.clone(),
                        genre_name: genre_name.clone(),
                        ..base.clone()
                    });
                }
            }
        }
        Ok(out)
    }
}
