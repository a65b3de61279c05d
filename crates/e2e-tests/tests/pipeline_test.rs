//! End-to-end sync cycles: relational changes in, index documents out.

use pretty_assertions::assert_eq;
use serde_json::json;

use e2e_tests::{after_now, names, test_uuid, ts, TestHarness};
use etl_pipeline::{min_timestamp, CycleOutcome, CycleStats};
use etl_search::SearchBackend;
use etl_types::{ChangedRow, Table};

const FILM: u8 = 0xf1;
const PERSON: u8 = 0xa1;
const GENRE: u8 = 0xb1;

fn completed(outcome: CycleOutcome) -> CycleStats {
    match outcome {
        CycleOutcome::Completed(stats) => stats,
        CycleOutcome::NoChanges => panic!("expected a completed cycle"),
    }
}

fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}

#[tokio::test]
async fn test_empty_source_leaves_checkpoint_at_sentinel() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.orchestrator(100);

    let outcome = orchestrator.run_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::NoChanges));
    assert_eq!(harness.checkpoint().get().await.unwrap(), min_timestamp());
}

#[tokio::test]
async fn test_no_changes_since_checkpoint() {
    let harness = TestHarness::new();
    harness
        .source
        .put_film(&test_uuid(FILM, 1), "Alien", None, Some(8.5), ts(1));
    let mut orchestrator = harness.orchestrator(100);
    orchestrator.prepare().await.unwrap();

    completed(orchestrator.run_cycle().await.unwrap());
    let t0 = harness.checkpoint().get().await.unwrap();
    let requests = harness.backend.bulk_requests().await;

    let outcome = orchestrator.run_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::NoChanges));
    assert_eq!(harness.checkpoint().get().await.unwrap(), t0);
    assert_eq!(harness.backend.bulk_requests().await, requests);
}

#[tokio::test]
async fn test_genre_change_rebuilds_every_linked_film() {
    let harness = TestHarness::new();
    let (f1, f2, f3) = (test_uuid(FILM, 1), test_uuid(FILM, 2), test_uuid(FILM, 3));
    let (a, b) = (test_uuid(PERSON, 1), test_uuid(PERSON, 2));
    let drama = test_uuid(GENRE, 1);
    let source = &harness.source;

    source.put_film(&f1, "Heat", None, Some(8.3), ts(1));
    source.put_film(&f2, "Ronin", None, Some(7.2), ts(2));
    source.put_film(&f3, "Up", None, Some(8.3), ts(3));
    source.put_person(&a, "Al Pacino", ts(4));
    source.put_person(&b, "Robert De Niro", ts(5));
    source.put_genre(&drama, "Drama", None, ts(6));
    source.link_person(&f1, &a, "actor");
    source.link_person(&f1, &b, "actor");
    source.link_genre(&f1, &drama);
    source.link_genre(&f2, &drama);

    let mut orchestrator = harness.orchestrator(100);
    orchestrator.prepare().await.unwrap();
    completed(orchestrator.run_cycle().await.unwrap());
    let untouched = harness.movie(&f3).await;

    source.put_genre(&drama, "Crime drama", Some("Crime stories"), after_now());
    let stats = completed(orchestrator.run_cycle().await.unwrap());

    assert_eq!(stats.changed_rows.get(&Table::Genre), Some(&1));
    assert_eq!(stats.changed_rows.get(&Table::FilmWork), None);
    assert_eq!(stats.drained_ids, 2);
    assert_eq!(stats.movies.loaded, 2);

    for id in [&f1, &f2] {
        let movie = harness.movie(id).await;
        assert_eq!(names(&movie, "genre"), vec!["Crime drama".to_string()]);
    }
    assert_eq!(harness.movie(&f3).await, untouched);

    let genre = harness.backend.document("genres", &drama).await.unwrap();
    assert_eq!(
        genre,
        json!({ "id": drama, "name": "Crime drama", "description": "Crime stories" })
    );
    assert!(harness.pending().is_empty().await.unwrap());
}

#[tokio::test]
async fn test_people_folded_by_role() {
    let harness = TestHarness::new();
    let x = test_uuid(FILM, 1);
    let (a, b, c) = (
        test_uuid(PERSON, 1),
        test_uuid(PERSON, 2),
        test_uuid(PERSON, 3),
    );
    let source = &harness.source;

    source.put_film(&x, "Blade Runner", Some("Replicants"), Some(8.1), ts(1));
    source.put_person(&a, "Harrison Ford", ts(2));
    source.put_person(&b, "Rutger Hauer", ts(3));
    source.put_person(&c, "Ridley Scott", ts(4));
    source.link_person(&x, &a, "actor");
    source.link_person(&x, &b, "actor");
    source.link_person(&x, &c, "director");
    for g in 1..=2 {
        let genre = test_uuid(GENRE, g);
        source.put_genre(&genre, &format!("Genre {}", g), None, ts(5));
        source.link_genre(&x, &genre);
    }

    let mut orchestrator = harness.orchestrator(100);
    orchestrator.prepare().await.unwrap();
    completed(orchestrator.run_cycle().await.unwrap());

    let movie = harness.movie(&x).await;
    let actors = movie["actors"].as_array().unwrap();
    assert_eq!(actors.len(), 2);
    assert_eq!(
        sorted(names(&movie, "actors_names")),
        vec!["Harrison Ford".to_string(), "Rutger Hauer".to_string()]
    );
    let actor_ids: Vec<String> = actors
        .iter()
        .map(|p| p["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(sorted(actor_ids), vec![a.clone(), b.clone()]);
    assert_eq!(names(&movie, "director"), vec!["Ridley Scott".to_string()]);
    assert_eq!(
        sorted(names(&movie, "genre")),
        vec!["Genre 1".to_string(), "Genre 2".to_string()]
    );
    assert!(names(&movie, "writers_names").is_empty());
    assert_eq!(movie["title"], "Blade Runner");
    assert_eq!(movie["imdb_rating"], 8.1);
}

#[tokio::test]
async fn test_film_without_associations() {
    let harness = TestHarness::new();
    let y = test_uuid(FILM, 9);
    harness
        .source
        .put_film(&y, "Koyaanisqatsi", Some("Life out of balance"), None, ts(1));

    let mut orchestrator = harness.orchestrator(100);
    orchestrator.prepare().await.unwrap();
    completed(orchestrator.run_cycle().await.unwrap());

    assert_eq!(
        harness.movie(&y).await,
        json!({
            "id": y,
            "imdb_rating": 0.0,
            "genre": [],
            "title": "Koyaanisqatsi",
            "description": "Life out of balance",
            "director": [],
            "actors_names": [],
            "writers_names": [],
            "actors": [],
            "writers": [],
        })
    );
}

#[tokio::test]
async fn test_invalid_row_rejected_rest_of_batch_loaded() {
    let harness = TestHarness::new();
    let (good, bad, other) = (
        test_uuid(PERSON, 1),
        test_uuid(PERSON, 2),
        test_uuid(PERSON, 3),
    );
    harness.source.put_person(&good, "Ann", ts(1));
    harness
        .source
        .put_row(ChangedRow::new(Table::Person, &bad, ts(2)));
    harness.source.put_person(&other, "Bob", ts(3));

    let mut orchestrator = harness.orchestrator(100);
    orchestrator.prepare().await.unwrap();
    let stats = completed(orchestrator.run_cycle().await.unwrap());

    assert_eq!(stats.dependents.loaded, 2);
    assert_eq!(stats.dependents.failures.len(), 1);
    assert_eq!(stats.dependents.failures[0].id, bad);
    assert!(stats.dependents.failures[0].reason.contains("full_name"));
    assert_eq!(
        harness.backend.ids("persons").await,
        sorted(vec![good.clone(), other.clone()])
    );
    assert!(harness.checkpoint().get().await.unwrap() > min_timestamp());
}

#[tokio::test]
async fn test_reprocessing_same_rows_is_idempotent() {
    let harness = TestHarness::new();
    let f = test_uuid(FILM, 1);
    let p = test_uuid(PERSON, 1);
    harness.source.put_film(&f, "Solaris", None, Some(8.0), ts(1));
    harness.source.put_person(&p, "Andrei Tarkovsky", ts(2));
    harness.source.link_person(&f, &p, "director");

    let mut orchestrator = harness.orchestrator(100);
    orchestrator.prepare().await.unwrap();
    completed(orchestrator.run_cycle().await.unwrap());
    let first = harness.movie(&f).await;

    // Touch without changing content
    harness.source.put_film(&f, "Solaris", None, Some(8.0), after_now());
    harness.source.put_person(&p, "Andrei Tarkovsky", after_now());
    let stats = completed(orchestrator.run_cycle().await.unwrap());

    assert_eq!(stats.drained_ids, 1);
    assert_eq!(harness.movie(&f).await, first);
    assert_eq!(harness.backend.count("movies").await.unwrap(), 1);
    assert_eq!(harness.backend.count("persons").await.unwrap(), 1);
}

#[tokio::test]
async fn test_checkpoint_survives_restart_and_never_decreases() {
    let harness = TestHarness::new();
    harness
        .source
        .put_film(&test_uuid(FILM, 1), "Stalker", None, None, ts(1));

    let committed = {
        let mut orchestrator = harness.orchestrator(100);
        completed(orchestrator.run_cycle().await.unwrap())
            .checkpoint
            .unwrap()
    };

    let harness = harness.restart();
    let checkpoint = harness.checkpoint();
    assert_eq!(checkpoint.get().await.unwrap(), committed);

    assert!(!checkpoint.set(ts(0)).await.unwrap());
    assert_eq!(checkpoint.get().await.unwrap(), committed);

    let mut orchestrator = harness.orchestrator(100);
    let outcome = orchestrator.run_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::NoChanges));
}

#[tokio::test]
async fn test_pending_ids_left_by_crash_are_drained() {
    let harness = TestHarness::new();
    let (f1, f2) = (test_uuid(FILM, 1), test_uuid(FILM, 2));
    harness.source.put_film(&f1, "Mirror", None, None, ts(1));
    harness.source.put_film(&f2, "Nostalgia", None, None, ts(2));

    // Accumulated before a crash; the checkpoint never moved
    harness.pending().add(&f2).await.unwrap();
    let harness = harness.restart();
    assert_eq!(harness.pending().len().await.unwrap(), 1);

    let mut orchestrator = harness.orchestrator(100);
    let stats = completed(orchestrator.run_cycle().await.unwrap());

    assert_eq!(stats.drained_ids, 2);
    assert_eq!(harness.backend.ids("movies").await, vec![f1, f2]);
    assert!(harness.pending().is_empty().await.unwrap());
}

#[tokio::test]
async fn test_drain_pagination_covers_each_id_once() {
    let harness = TestHarness::new();
    let ids: Vec<String> = (1..=7).map(|n| test_uuid(FILM, n)).collect();
    for (n, id) in ids.iter().enumerate() {
        harness
            .source
            .put_film(id, &format!("Film {}", n), None, None, ts(n as i64));
    }

    let mut orchestrator = harness.orchestrator(3);
    let stats = completed(orchestrator.run_cycle().await.unwrap());

    assert_eq!(stats.changed_rows.get(&Table::FilmWork), Some(&7));
    assert_eq!(stats.pages, 3);
    assert_eq!(stats.drained_ids, 7);
    assert_eq!(stats.movies.loaded, 7);
    // One bulk request per drained page
    assert_eq!(harness.backend.bulk_requests().await, 3);
    assert_eq!(harness.backend.ids("movies").await, ids);
}
