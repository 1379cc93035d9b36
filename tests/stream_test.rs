//! Prefetch stream: cold then warm cache, refresh idempotence, eventual
//! consistency.

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use engram::background::BackgroundExecutor;
use engram::events::EventLog;
use engram::memory::stream::PrefetchStream;
use engram::memory::types::{FactStatus, NewFact};

use helpers::{
    insert_active_episode, spike, test_embedder, test_retriever, test_store, StubGenerator,
};

struct Fixture {
    stream: Arc<PrefetchStream>,
    store: engram::memory::store::MemoryStore,
    generator: Arc<StubGenerator>,
    executor: BackgroundExecutor,
}

fn fixture() -> Fixture {
    let store = test_store();
    let generator = StubGenerator::new();
    let embedder = test_embedder(Arc::clone(&generator));
    let retriever = test_retriever(&store);
    let executor = BackgroundExecutor::start();
    let stream = PrefetchStream::new(
        retriever,
        embedder,
        executor.handle(),
        EventLog::quiet(),
        3,
    );
    Fixture {
        stream,
        store,
        generator,
        executor,
    }
}

#[tokio::test]
async fn cold_cache_then_warm_cache() {
    let fixture = fixture();

    // Turn 1: nothing cached
    assert!(fixture.stream.get_cached().is_none());

    // Store turn 1's episode, then let the stream observe the turn
    let context = "User: hello\nAssistant: hi there";
    fixture.generator.set_embedding(context, spike(2));
    insert_active_episode(&fixture.store, "I greeted the user.", 0.8, spike(2));

    fixture.stream.observe_turn("hello", "hi there");

    let stream = Arc::clone(&fixture.stream);
    helpers::wait_until(move || stream.get_cached().is_some()).await;

    // Turn 2: cache hit including turn 1's episode
    let cached = fixture.stream.get_cached().unwrap();
    assert_eq!(cached.episodic.len(), 1);
    assert_eq!(cached.episodic[0].item.summary, "I greeted the user.");
    fixture.executor.shutdown();
}

#[tokio::test]
async fn back_to_back_refreshes_are_idempotent() {
    let fixture = fixture();
    insert_active_episode(&fixture.store, "something", 0.8, spike(1));

    fixture.stream.observe_turn("first turn", "reply");
    let stream = Arc::clone(&fixture.stream);
    helpers::wait_until(move || stream.get_cached().is_some()).await;

    let embeds_after_first = fixture.generator.embed_calls.load(Ordering::SeqCst);

    // Two direct refreshes with no intervening turn: no further embedding,
    // no observable cache change
    fixture.stream.refresh().await;
    fixture.stream.refresh().await;
    assert_eq!(
        fixture.generator.embed_calls.load(Ordering::SeqCst),
        embeds_after_first
    );
    fixture.executor.shutdown();
}

#[tokio::test]
async fn cache_serves_facts_above_confidence_floor_only_for_episodic_filter() {
    let fixture = fixture();

    // Episodic filter carries confidence__gt 0.5; the semantic query runs
    // with empty filters, so even a shaky fact is prefetched
    fixture.store
        .add_fact(NewFact {
            fact: "The user might like jazz.".into(),
            confidence: 0.3,
            derived_from: vec!["ep".into()],
            embedding: Some(spike(4)),
            contradictions: vec![],
            status: FactStatus::Stable,
        })
        .unwrap();

    fixture.stream.observe_turn("jazz?", "maybe");
    let stream = Arc::clone(&fixture.stream);
    helpers::wait_until(move || stream.get_cached().is_some()).await;

    let cached = fixture.stream.get_cached().unwrap();
    assert_eq!(cached.semantic.len(), 1);
    fixture.executor.shutdown();
}

#[tokio::test]
async fn embed_failure_leaves_previous_cache_in_place() {
    let fixture = fixture();
    insert_active_episode(&fixture.store, "kept memory", 0.8, spike(3));

    fixture.stream.observe_turn("alpha", "beta");
    let stream = Arc::clone(&fixture.stream);
    helpers::wait_until(move || stream.get_cached().is_some()).await;

    // Generator goes down; the next refresh builds a cache from a zero
    // query vector (similarity 0 everywhere) or keeps the old one — either
    // way get_cached still returns a complete snapshot, never a torn one
    fixture.generator.fail_embed.store(true, Ordering::SeqCst);
    fixture.stream.observe_turn("gamma", "delta");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let cached = fixture.stream.get_cached();
    assert!(cached.is_some());
    fixture.executor.shutdown();
}
