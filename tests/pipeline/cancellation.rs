use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, store_with_titles},
    mock_provider::{candidate, ScriptedProvider},
};
use anyhow::Result;
use bibfetch::{EnrichmentConfig, MetadataField, ProviderClient, ProviderId, Runner};

fn catalogued_provider(titles: &[&str]) -> ScriptedProvider {
    titles.iter().fold(
        ScriptedProvider::new(ProviderId::GoogleBooks),
        |provider, title| {
            provider.with_candidate(
                title,
                candidate(
                    ProviderId::GoogleBooks,
                    title,
                    0,
                    &[(MetadataField::Authors, "Some Author")],
                ),
            )
        },
    )
}

#[tokio::test]
async fn cancellation_mid_run_skips_later_batches_without_provider_calls() -> Result<()> {
    init_tracing();
    let titles = ["Book One", "Book Two", "Book Three"];
    let store = Arc::new(store_with_titles(&titles));
    let provider = Arc::new(catalogued_provider(&titles));
    let providers: Vec<Arc<dyn ProviderClient>> = vec![provider.clone()];

    let config = EnrichmentConfig::builder()
        .batch_size(1)
        .max_workers(1)
        .build()?;
    let runner = Runner::with_providers(config, store.clone(), providers);

    // The token fires during the very first lookup, i.e. while batch 1 of 3
    // is in flight.
    provider.arm_cancellation(runner.cancellation_token());

    let stats = runner.run().await?;

    // The in-flight item finishes within the grace period; everything after
    // it resolves to a cancelled failure without reaching the provider.
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.matched, 1);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.error_kinds.get("cancelled"), Some(&2));
    assert_eq!(provider.calls(), 1);

    assert_eq!(store.cell(2, "Author").as_deref(), Some("Some Author"));
    assert_eq!(store.cell(3, "Author").as_deref(), Some(""));
    assert_eq!(store.cell(4, "Author").as_deref(), Some(""));
    Ok(())
}

#[tokio::test]
async fn cancellation_before_run_fails_every_item_without_provider_calls() -> Result<()> {
    init_tracing();
    let titles = ["Book One", "Book Two"];
    let store = Arc::new(store_with_titles(&titles));
    let provider = Arc::new(catalogued_provider(&titles));
    let providers: Vec<Arc<dyn ProviderClient>> = vec![provider.clone()];

    let runner = Runner::with_providers(
        EnrichmentConfig::builder().build()?,
        store,
        providers,
    );
    runner.cancellation_token().cancel();

    let stats = runner.run().await?;

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.error_kinds.get("cancelled"), Some(&2));
    assert_eq!(provider.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn stuck_items_are_abandoned_after_the_grace_period() -> Result<()> {
    init_tracing();
    let store = Arc::new(store_with_titles(&["Book One"]));
    let provider = Arc::new(ScriptedProvider::new(ProviderId::GoogleBooks).hanging());
    let providers: Vec<Arc<dyn ProviderClient>> = vec![provider.clone()];

    let config = EnrichmentConfig::builder()
        .cancellation_grace(Duration::from_millis(50))
        .build()?;
    let runner = Runner::with_providers(config, store, providers);

    // Fire cancellation as soon as the hanging lookup starts.
    provider.arm_cancellation(runner.cancellation_token());

    let stats = runner.run().await?;

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.error_kinds.get("cancelled"), Some(&1));
    Ok(())
}
