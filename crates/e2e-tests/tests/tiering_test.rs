//! Tiering E2E tests.
//!
//! Tier counts always partition the store, reads promote COLD entries and
//! the reclassification pass demotes idle ones without corrupting them.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use e2e_tests::{axis_vector, document_chunk, TestHarness};
use vault_engine::{CleanupOptions, OwnerScope, TierClassifier};
use vault_types::{Chunk, Fingerprint, Tier, TieringConfig};

async fn assert_tiers_complete(harness: &TestHarness) {
    let analysis = harness.vault.analysis().await.unwrap();
    let tiers = analysis.tiers;
    assert_eq!(tiers.hot_count + tiers.cold_count, tiers.total_entries);
    assert_eq!(tiers.total_entries, harness.entry_count());
    assert!(tiers.is_complete());

    let (hot, cold) = harness.tier_counts();
    assert_eq!((hot, cold), (tiers.hot_count, tiers.cold_count));
}

fn age_entry(harness: &TestHarness, fingerprint: &Fingerprint, days: i64) {
    harness
        .store
        .update_entry(fingerprint, &mut |e| {
            e.created_at = Utc::now() - Duration::days(days);
            e.promoted_at = None;
        })
        .unwrap();
}

#[tokio::test]
async fn test_tier_completeness_across_lifecycle() {
    let harness = TestHarness::new();
    assert_tiers_complete(&harness).await;

    let chunks: Vec<Chunk> = (0..6).map(document_chunk).collect();
    harness.ingest_owned("doc-a", chunks).await;
    assert_tiers_complete(&harness).await;

    for reference in harness.store.references_for_owner("doc-a").unwrap().iter().take(4) {
        age_entry(&harness, &reference.fingerprint, 30);
    }
    harness.vault.reclassify().await.unwrap();
    assert_tiers_complete(&harness).await;
    let (_, cold) = harness.tier_counts();
    assert_eq!(cold, 4);

    harness
        .vault
        .query(OwnerScope::All, e2e_tests::vector_for(0), 2)
        .await
        .unwrap();
    assert_tiers_complete(&harness).await;

    harness.owners.remove("doc-a");
    harness.vault.cleanup(CleanupOptions::default()).await.unwrap();
    assert_tiers_complete(&harness).await;
}

#[tokio::test]
async fn test_reading_cold_entry_promotes_it() {
    let harness = TestHarness::new();
    harness
        .ingest_owned(
            "doc-a",
            vec![
                Chunk::new("north facing content", axis_vector(0)),
                Chunk::new("east facing content", axis_vector(1)),
            ],
        )
        .await;
    let target = harness.store.get_reference("doc-a", 0).unwrap().unwrap().fingerprint;
    age_entry(&harness, &target, 30);
    harness.vault.reclassify().await.unwrap();

    let classifier = TierClassifier::new(&TieringConfig::default());
    let cold = harness.store.get(&target).unwrap().unwrap();
    assert_eq!(cold.tier, Tier::Cold);
    assert_eq!(classifier.classify(&cold, Utc::now()), Tier::Cold);

    let hits = harness
        .vault
        .query(OwnerScope::All, axis_vector(0), 1)
        .await
        .unwrap();
    assert_eq!(hits[0].fingerprint, target);
    assert_eq!(hits[0].tier, Tier::Hot);

    let read = harness.store.get(&target).unwrap().unwrap();
    assert_eq!(read.tier, Tier::Hot);
    assert_eq!(classifier.classify(&read, Utc::now()), Tier::Hot);

    // The next reclassification pass agrees with the read
    let stats = harness.vault.reclassify().await.unwrap();
    assert_eq!(stats.demoted, 0);
    assert_eq!(harness.store.get(&target).unwrap().unwrap().tier, Tier::Hot);
    assert!(harness.vault.metrics().promotions >= 1);
}

#[tokio::test]
async fn test_demoted_large_entry_still_decodes() {
    let harness = TestHarness::new();
    let text = "Long archival paragraph about storage tiers and retention. ".repeat(200);
    harness
        .ingest_owned("doc-archive", vec![Chunk::new(text.clone(), axis_vector(3))])
        .await;
    let fingerprint = harness
        .store
        .get_reference("doc-archive", 0)
        .unwrap()
        .unwrap()
        .fingerprint;
    age_entry(&harness, &fingerprint, 60);

    let stats = harness.vault.reclassify().await.unwrap();
    assert_eq!(stats.demoted, 1);
    assert_eq!(stats.skipped_corrupt, 0);
    assert_eq!(stats.distribution.cold_count, 1);

    let hits = harness
        .vault
        .query(OwnerScope::owner("doc-archive"), axis_vector(3), 1)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload.text, text);
}
