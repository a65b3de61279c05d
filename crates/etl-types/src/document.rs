//! Search documents and their validation.
//!
//! Three variants are indexed: movies (assembled from join rows), and the
//! persons and genres they reference (loaded straight from changed rows).
//! Validation runs before anything is sent to the index; an empty string,
//! list or zero rating is a valid default, a missing or malformed value is not.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::row::ChangedRow;
use crate::table::Table;

/// Document variant, one per target index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Movie,
    Person,
    Genre,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [DocumentKind::Movie, DocumentKind::Person, DocumentKind::Genre];

    /// Name of the index holding documents of this kind.
    pub fn index_name(&self) -> &'static str {
        match self {
            DocumentKind::Movie => "movies",
            DocumentKind::Person => "persons",
            DocumentKind::Genre => "genres",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::Movie => write!(f, "movie"),
            DocumentKind::Person => write!(f, "person"),
            DocumentKind::Genre => write!(f, "genre"),
        }
    }
}

/// Role a person plays in a film work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Actor,
    Writer,
    Director,
}

impl Role {
    /// Parse the `person_film_work.role` column. Unknown roles yield `None`.
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "actor" => Some(Role::Actor),
            "writer" => Some(Role::Writer),
            "director" => Some(Role::Director),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Actor => "actor",
            Role::Writer => "writer",
            Role::Director => "director",
        }
    }
}

/// A person nested inside a movie document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: String,
    pub name: String,
}

impl PersonRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Root document for the `movies` index.
///
/// Directors are folded like any other role, but only their names are
/// indexed (as `director`), matching the index mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieDocument {
    pub id: String,
    pub imdb_rating: f64,
    pub genre: Vec<String>,
    pub title: String,
    pub description: String,
    pub director: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
    #[serde(skip)]
    pub directors: Vec<PersonRef>,
}

impl MovieDocument {
    /// Empty template: id set, every scalar empty, every list empty.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    fn role_mut(&mut self, role: Role) -> (&mut Vec<PersonRef>, &mut Vec<String>) {
        match role {
            Role::Actor => (&mut self.actors, &mut self.actors_names),
            Role::Writer => (&mut self.writers, &mut self.writers_names),
            Role::Director => (&mut self.directors, &mut self.director),
        }
    }

    /// Add a person to a role unless that identity is already listed.
    ///
    /// Returns `true` when the person was added.
    pub fn add_person(&mut self, role: Role, person: PersonRef) -> bool {
        let (people, names) = self.role_mut(role);
        if people.iter().any(|p| p.id == person.id) {
            return false;
        }
        names.push(person.name.clone());
        people.push(person);
        true
    }

    /// Add a genre name unless it is already listed.
    pub fn add_genre(&mut self, name: &str) -> bool {
        if self.genre.iter().any(|g| g == name) {
            return false;
        }
        self.genre.push(name.to_string());
        true
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_uuid("id", &self.id)?;
        if !self.imdb_rating.is_finite() {
            return Err(ValidationError::invalid("imdb_rating", "must be a finite number"));
        }
        for (list, people) in [("actors", &self.actors), ("writers", &self.writers)] {
            for (i, person) in people.iter().enumerate() {
                validate_uuid(&format!("{}[{}].id", list, i), &person.id)?;
            }
        }
        Ok(())
    }
}

/// Document for the `persons` index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDocument {
    pub id: String,
    pub full_name: String,
}

impl PersonDocument {
    pub fn from_columns(columns: &Map<String, Value>) -> Result<Self, ValidationError> {
        Ok(Self {
            id: required_str(columns, "id")?,
            full_name: required_str(columns, "full_name")?,
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_uuid("id", &self.id)
    }
}

/// Document for the `genres` index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreDocument {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl GenreDocument {
    /// `description` is nullable in the source table; NULL becomes empty.
    pub fn from_columns(columns: &Map<String, Value>) -> Result<Self, ValidationError> {
        Ok(Self {
            id: required_str(columns, "id")?,
            name: required_str(columns, "name")?,
            description: optional_str(columns, "description")?,
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_uuid("id", &self.id)
    }
}

/// Tagged document; the loader dispatches on the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Movie(MovieDocument),
    Person(PersonDocument),
    Genre(GenreDocument),
}

impl Document {
    /// Build a document from a changed dependent-table row.
    pub fn from_dependent_row(row: &ChangedRow) -> Result<Self, ValidationError> {
        match row.table {
            Table::Person => PersonDocument::from_columns(&row.columns).map(Document::Person),
            Table::Genre => GenreDocument::from_columns(&row.columns).map(Document::Genre),
            Table::FilmWork => Err(ValidationError::invalid(
                "table",
                "film_work rows are assembled from join rows",
            )),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Movie(_) => DocumentKind::Movie,
            Document::Person(_) => DocumentKind::Person,
            Document::Genre(_) => DocumentKind::Genre,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Document::Movie(d) => &d.id,
            Document::Person(d) => &d.id,
            Document::Genre(d) => &d.id,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Document::Movie(d) => d.validate(),
            Document::Person(d) => d.validate(),
            Document::Genre(d) => d.validate(),
        }
    }

    /// JSON body stored in the index.
    pub fn to_source(&self) -> Result<Value, serde_json::Error> {
        match self {
            Document::Movie(d) => serde_json::to_value(d),
            Document::Person(d) => serde_json::to_value(d),
            Document::Genre(d) => serde_json::to_value(d),
        }
    }
}

impl From<MovieDocument> for Document {
    fn from(doc: MovieDocument) -> Self {
        Document::Movie(doc)
    }
}

fn validate_uuid(field: &str, value: &str) -> Result<(), ValidationError> {
    Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|e| ValidationError::invalid(field, format!("not a UUID: {}", e)))
}

fn required_str(columns: &Map<String, Value>, field: &str) -> Result<String, ValidationError> {
    match columns.get(field) {
        None | Some(Value::Null) => Err(ValidationError::missing(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ValidationError::invalid(
            field,
            format!("expected string, got {}", other),
        )),
    }
}

fn optional_str(columns: &Map<String, Value>, field: &str) -> Result<String, ValidationError> {
    match columns.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ValidationError::invalid(
            field,
            format!("expected string, got {}", other),
        )),
    }
}
