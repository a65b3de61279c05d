//! Relational tables watched for changes.
//!
//! `film_work` is the root table: its rows become movie documents.
//! `person` and `genre` are dependent tables: a change there means every
//! film work linked through the association table must be rebuilt.

use serde::{Deserialize, Serialize};

use crate::document::DocumentKind;

/// A watched table in the `content` schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    FilmWork,
    Person,
    Genre,
}

impl Table {
    /// Scan order used by every cycle.
    pub const ALL: [Table; 3] = [Table::FilmWork, Table::Person, Table::Genre];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::FilmWork => "film_work",
            Table::Person => "person",
            Table::Genre => "genre",
        }
    }

    /// Whether rows of this table are themselves root documents.
    pub fn is_root(&self) -> bool {
        matches!(self, Table::FilmWork)
    }

    /// Association table linking a dependent table to `film_work`.
    pub fn association_table(&self) -> Option<&'static str> {
        match self {
            Table::FilmWork => None,
            Table::Person => Some("person_film_work"),
            Table::Genre => Some("genre_film_work"),
        }
    }

    /// Document variant produced directly from this table's rows.
    pub fn document_kind(&self) -> DocumentKind {
        match self {
            Table::FilmWork => DocumentKind::Movie,
            Table::Person => DocumentKind::Person,
            Table::Genre => DocumentKind::Genre,
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
