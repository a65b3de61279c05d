//! Index settings and mappings.
//!
//! All three indices share one analysis block with the `ru_en` analyzer and
//! reject unknown fields (`dynamic: strict`). Text fields that are also
//! sorted or aggregated on carry a `raw` keyword sub-field.

use etl_types::DocumentKind;
use serde_json::{json, Value};

/// Name of the shared bilingual analyzer.
pub const ANALYZER: &str = "ru_en";

/// Index settings: refresh interval plus the `ru_en` analysis chain.
pub fn index_settings() -> Value {
    json!({
        "refresh_interval": "1s",
        "analysis": {
            "filter": {
                "english_stop": { "type": "stop", "stopwords": "_english_" },
                "english_stemmer": { "type": "stemmer", "language": "english" },
                "english_possessive_stemmer": { "type": "stemmer", "language": "possessive_english" },
                "russian_stop": { "type": "stop", "stopwords": "_russian_" },
                "russian_stemmer": { "type": "stemmer", "language": "russian" }
            },
            "analyzer": {
                "ru_en": {
                    "tokenizer": "standard",
                    "filter": [
                        "lowercase",
                        "english_stop",
                        "english_stemmer",
                        "english_possessive_stemmer",
                        "russian_stop",
                        "russian_stemmer"
                    ]
                }
            }
        }
    })
}

fn text() -> Value {
    json!({ "type": "text", "analyzer": ANALYZER })
}

fn text_with_raw() -> Value {
    json!({ "type": "text", "analyzer": ANALYZER, "fields": { "raw": { "type": "keyword" } } })
}

fn keyword() -> Value {
    json!({ "type": "keyword" })
}

fn nested_people() -> Value {
    json!({
        "type": "nested",
        "dynamic": "strict",
        "properties": {
            "id": keyword(),
            "name": text()
        }
    })
}

/// Field mapping for one document kind.
pub fn mapping_properties(kind: DocumentKind) -> Value {
    match kind {
        DocumentKind::Movie => json!({
            "id": keyword(),
            "imdb_rating": { "type": "float" },
            "genre": keyword(),
            "title": text_with_raw(),
            "description": text(),
            "director": text(),
            "actors_names": text(),
            "writers_names": text(),
            "actors": nested_people(),
            "writers": nested_people()
        }),
        DocumentKind::Person => json!({
            "id": keyword(),
            "full_name": text_with_raw()
        }),
        DocumentKind::Genre => json!({
            "id": keyword(),
            "name": text_with_raw(),
            "description": text()
        }),
    }
}

/// Full create-index request body for one document kind.
pub fn index_body(kind: DocumentKind) -> Value {
    json!({
        "settings": index_settings(),
        "mappings": {
            "dynamic": "strict",
            "properties": mapping_properties(kind)
        }
    })
}
