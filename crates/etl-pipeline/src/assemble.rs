//! Movie document assembly.
//!
//! The join query returns one row per (person, genre) pairing of a film
//! work, with NULLs where an association is missing. Folding those rows
//! into nested documents is pure; only fetching them touches the source.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use etl_types::{JoinRow, MovieDocument, PersonRef, Role};

use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::source::{ChangeSource, SourceError};

/// A document being folded plus whether its scalars were taken yet.
struct Draft {
    doc: MovieDocument,
    scalars_set: bool,
}

impl Draft {
    fn new(id: &str) -> Self {
        Self {
            doc: MovieDocument::empty(id),
            scalars_set: false,
        }
    }

    fn apply(&mut self, row: &JoinRow) {
        if !self.scalars_set {
            self.doc.title = row.title.clone().unwrap_or_default();
            self.doc.description = row.description.clone().unwrap_or_default();
            self.doc.imdb_rating = row.rating.unwrap_or_default();
            self.scalars_set = true;
        }

        if let Some(person_id) = &row.person_id {
            match (row.role.as_deref().and_then(Role::parse), &row.full_name) {
                (Some(role), Some(name)) => {
                    self.doc
                        .add_person(role, PersonRef::new(person_id.clone(), name.clone()));
                }
                // Same rule as the persons index: no name, no person
                (Some(role), None) => warn!(
                    film_work = %row.id,
                    person = %person_id,
                    role = role.as_str(),
                    "Skipping person without full_name"
                ),
                (None, _) => debug!(
                    film_work = %row.id,
                    person = %person_id,
                    role = row.role.as_deref().unwrap_or(""),
                    "Skipping person with unknown role"
                ),
            }
        }

        if let Some(genre) = &row.genre_name {
            self.doc.add_genre(genre);
        }
    }
}

/// Fold join rows into one document per id, in the order of `ids`.
///
/// Rows for ids not in `ids` are ignored. An id without rows yields an
/// empty document carrying only its id. Repeated ids produce one document.
pub fn assemble(ids: &[String], rows: &[JoinRow]) -> Vec<MovieDocument> {
    let mut order: Vec<&str> = Vec::with_capacity(ids.len());
    let mut drafts: HashMap<&str, Draft> = HashMap::with_capacity(ids.len());
    for id in ids {
        if !drafts.contains_key(id.as_str()) {
            drafts.insert(id.as_str(), Draft::new(id));
            order.push(id.as_str());
        }
    }

    for row in rows {
        if let Some(draft) = drafts.get_mut(row.id.as_str()) {
            draft.apply(row);
        }
    }

    order
        .into_iter()
        .filter_map(|id| drafts.remove(id))
        .map(|draft| draft.doc)
        .collect()
}

/// Fetches join rows for a page of ids and folds them.
pub struct DocumentAssembler {
    source: Arc<dyn ChangeSource>,
    retry: RetryPolicy,
}

impl DocumentAssembler {
    pub fn new(source: Arc<dyn ChangeSource>, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    pub async fn assemble_page(&self, ids: &[String]) -> Result<Vec<MovieDocument>, PipelineError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .retry
            .run("fetch_join_rows", SourceError::is_transient, || {
                self.source.fetch_join_rows(ids)
            })
            .await?;

        let docs = assemble(ids, &rows);
        debug!(ids = ids.len(), rows = rows.len(), docs = docs.len(), "Assembled page");
        Ok(docs)
    }
}
