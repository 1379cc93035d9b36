//! Consolidation run: clustering, per-batch fact extraction, derived_from
//! bookkeeping, and partial-failure isolation.

mod helpers;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use engram::events::EventLog;
use engram::memory::consolidation::{
    Consolidator, EpisodeClustering, RelationalManager, SemanticExtractor,
};
use engram::memory::store::{MemoryStore, SearchFilters};
use engram::memory::types::{EpisodeStatus, ExchangeText, FactStatus, NewEpisode};

use helpers::{near, spike, test_embedder, test_retriever, test_store, StubGenerator, DIM};

fn consolidator(store: &MemoryStore, generator: Arc<StubGenerator>) -> Consolidator {
    let embedder = test_embedder(Arc::clone(&generator));
    let clustering = EpisodeClustering::new(3, 50);
    let extractor = SemanticExtractor::new(
        Arc::clone(&generator) as Arc<dyn engram::generator::Generator>,
        embedder,
        store.clone(),
        "semantic-model",
    );
    let relational = RelationalManager::new(
        generator as Arc<dyn engram::generator::Generator>,
        store.clone(),
        "relational-model",
    );
    Consolidator::new(
        store.clone(),
        clustering,
        extractor,
        relational,
        EventLog::quiet(),
    )
}

/// Insert `count` active episodes tightly packed around a spike axis.
fn insert_cluster(store: &MemoryStore, axis: usize, count: usize, tag: &str) -> Vec<String> {
    (0..count)
        .map(|i| {
            let embedding = near(&spike(axis), (axis + 5) % DIM, 0.01 * (i as f32 + 1.0));
            let mut episode = NewEpisode::new(
                format!("{tag} episode {i}"),
                ExchangeText::default(),
                0.6,
            );
            episode.embedding = Some(embedding);
            episode.status = EpisodeStatus::Active;
            store.add_episode(episode).unwrap()
        })
        .collect()
}

fn insert_isolate(store: &MemoryStore, axis: usize, tag: &str) -> String {
    let mut embedding = vec![0.0f32; DIM];
    embedding[axis % DIM] = 5.0;
    let mut episode = NewEpisode::new(format!("{tag} isolate"), ExchangeText::default(), 0.6);
    episode.embedding = Some(embedding);
    episode.status = EpisodeStatus::Active;
    store.add_episode(episode).unwrap()
}

#[tokio::test]
async fn consolidation_distills_clusters_into_facts() {
    let store = test_store();
    let generator = StubGenerator::new();

    // 3 dense topical clusters of 9 plus 3 isolates = 30 episodes
    let mut all_ids: Vec<String> = Vec::new();
    let cluster_a = insert_cluster(&store, 0, 9, "gardening");
    let cluster_b = insert_cluster(&store, 1, 9, "cooking");
    let cluster_c = insert_cluster(&store, 2, 9, "music");
    all_ids.extend(cluster_a.iter().cloned());
    all_ids.extend(cluster_b.iter().cloned());
    all_ids.extend(cluster_c.iter().cloned());
    for (axis, tag) in [(8, "tax"), (9, "dream"), (10, "trip")] {
        all_ids.push(insert_isolate(&store, axis, tag));
    }

    // Every batch prompt yields one fact line; extra replies cover the
    // relational pass
    for _ in 0..40 {
        generator.push_chat_reply("I keep hearing about this topic from the user.");
    }

    let report = consolidator(&store, Arc::clone(&generator))
        .perform_consolidation()
        .await
        .unwrap();

    assert_eq!(report.episodes_seen, 30);
    assert_eq!(report.failed_batches, 0);
    assert_eq!(report.episodes_consolidated, 30);
    assert!(report.batches >= 4, "expected clusters plus isolates");
    assert!(report.facts_created >= report.batches);

    // All 30 episodes end consolidated
    assert_eq!(store.count_episodes(EpisodeStatus::Consolidated).unwrap(), 30);
    assert_eq!(store.count_episodes(EpisodeStatus::Active).unwrap(), 0);

    // The union of derived_from over all facts covers exactly the
    // consolidated ids
    let facts = store.get_facts(FactStatus::Stable, 100).unwrap();
    let derived: HashSet<String> = facts
        .iter()
        .flat_map(|fact| fact.derived_from.iter().cloned())
        .collect();
    let expected: HashSet<String> = all_ids.iter().cloned().collect();
    assert_eq!(derived, expected);

    // Each dense cluster's ids appear together in at least one fact
    for cluster in [&cluster_a, &cluster_b, &cluster_c] {
        let cluster_set: HashSet<&String> = cluster.iter().collect();
        assert!(
            facts.iter().any(|fact| {
                let from: HashSet<&String> = fact.derived_from.iter().collect();
                cluster_set.is_subset(&from)
            }),
            "no fact derived from the whole cluster"
        );
    }

    // Facts are embedded and searchable
    let retriever = test_retriever(&store);
    let hits = retriever
        .search_facts(&spike(0), 5, &SearchFilters::default())
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|hit| hit.item.embedding.is_some()));
}

#[tokio::test]
async fn failed_batch_does_not_abort_the_run() {
    let store = test_store();
    let generator = StubGenerator::new();

    insert_cluster(&store, 0, 4, "alpha");
    insert_cluster(&store, 1, 4, "beta");

    // First batch prompt fails, everything after succeeds
    generator.fail_chat.store(true, Ordering::SeqCst);
    let consolidator = consolidator(&store, Arc::clone(&generator));

    // Run once with chat down entirely: every batch fails, nothing is
    // consolidated
    let report = consolidator.perform_consolidation().await.unwrap();
    assert_eq!(report.episodes_consolidated, 0);
    assert_eq!(report.failed_batches, report.batches);
    assert_eq!(store.count_episodes(EpisodeStatus::Active).unwrap(), 8);

    // Recover and re-run: the same episodes are still eligible
    generator.fail_chat.store(false, Ordering::SeqCst);
    for _ in 0..8 {
        generator.push_chat_reply("The user returns to this subject often.");
    }
    let report = consolidator.perform_consolidation().await.unwrap();
    assert_eq!(report.failed_batches, 0);
    assert_eq!(report.episodes_consolidated, 8);
    assert_eq!(store.count_episodes(EpisodeStatus::Active).unwrap(), 0);
}

#[tokio::test]
async fn short_fact_lines_are_discarded() {
    let store = test_store();
    let generator = StubGenerator::new();
    insert_cluster(&store, 0, 3, "topic");

    // One real fact among noise lines; later replies (spare batches, the
    // relational pass) parse to nothing
    generator.push_chat_reply("- The user gardens on weekends.\nok\n\n- tiny");
    for _ in 0..5 {
        generator.push_chat_reply("ok");
    }

    consolidator(&store, Arc::clone(&generator))
        .perform_consolidation()
        .await
        .unwrap();

    let facts = store.get_facts(FactStatus::Stable, 10).unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].fact, "The user gardens on weekends.");
    assert!((facts[0].confidence - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn relational_pass_upserts_interaction_style() {
    let store = test_store();
    let generator = StubGenerator::new();
    insert_cluster(&store, 0, 3, "style");

    generator.push_chat_reply("The user prefers short answers.");
    generator.push_chat_reply("Warm, curious, enjoys gardening talk.");

    consolidator(&store, Arc::clone(&generator))
        .perform_consolidation()
        .await
        .unwrap();

    let entries = store.get_relational(Some("interaction_style")).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].evidence_count, 1);
    assert!((entries[0].confidence - 0.8).abs() < 1e-9);
    assert!(entries[0].data["analysis"].is_string());
}
