use std::sync::Arc;

use crate::support::{
    helpers::{init_tracing, store_with_titles},
    mock_provider::{candidate, ScriptedProvider},
};
use anyhow::Result;
use bibfetch::{
    EnrichmentConfig, MetadataField, ProviderClient, ProviderId, Runner, SheetRow,
    MemoryRowStore,
};

fn config() -> EnrichmentConfig {
    EnrichmentConfig::builder()
        .build()
        .expect("default config must validate")
}

fn gatsby_google() -> Arc<ScriptedProvider> {
    Arc::new(
        ScriptedProvider::new(ProviderId::GoogleBooks).with_candidate(
            "The Great Gatsby",
            candidate(
                ProviderId::GoogleBooks,
                "The Great Gatsby",
                0,
                &[
                    (MetadataField::Authors, "F. Scott Fitzgerald"),
                    (MetadataField::Isbn, "9780743273565"),
                ],
            ),
        ),
    )
}

fn gatsby_open_library() -> Arc<ScriptedProvider> {
    Arc::new(
        ScriptedProvider::new(ProviderId::OpenLibrary).with_candidate(
            "The Great Gatsby",
            candidate(
                ProviderId::OpenLibrary,
                "Great Gatsby, The",
                0,
                &[
                    (MetadataField::Categories, "Fiction"),
                    (MetadataField::Authors, "Fitzgerald, F. Scott"),
                ],
            ),
        ),
    )
}

#[tokio::test]
async fn merges_both_providers_with_primary_priority() -> Result<()> {
    init_tracing();
    let store = Arc::new(store_with_titles(&["The Great Gatsby"]));
    let providers: Vec<Arc<dyn ProviderClient>> = vec![gatsby_google(), gatsby_open_library()];

    let runner = Runner::with_providers(config(), store.clone(), providers);
    let stats = runner.run().await?;

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.matched, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.writes_failed, 0);

    // Author and ISBN come from the primary provider; genre only from the
    // secondary, which is also the only provider offering it.
    assert_eq!(
        store.cell(2, "Author").as_deref(),
        Some("F. Scott Fitzgerald")
    );
    assert_eq!(store.cell(2, "ISBN").as_deref(), Some("9780743273565"));
    assert_eq!(store.cell(2, "Genre").as_deref(), Some("Fiction"));
    Ok(())
}

#[tokio::test]
async fn one_failing_provider_does_not_fail_the_item() -> Result<()> {
    init_tracing();
    let store = Arc::new(store_with_titles(&["The Great Gatsby"]));
    let failing = Arc::new(ScriptedProvider::new(ProviderId::GoogleBooks).failing());
    let providers: Vec<Arc<dyn ProviderClient>> = vec![failing, gatsby_open_library()];

    let runner = Runner::with_providers(config(), store.clone(), providers);
    let stats = runner.run().await?;

    assert_eq!(stats.matched, 1);
    assert_eq!(stats.failed, 0);
    // Only the surviving provider's fields are available.
    assert_eq!(
        store.cell(2, "Author").as_deref(),
        Some("Fitzgerald, F. Scott")
    );
    assert_eq!(store.cell(2, "Genre").as_deref(), Some("Fiction"));
    assert_eq!(store.cell(2, "ISBN").as_deref(), Some(""));
    Ok(())
}

#[tokio::test]
async fn all_providers_failing_fails_the_item_but_not_the_run() -> Result<()> {
    init_tracing();
    let store = Arc::new(store_with_titles(&["The Great Gatsby", "Dune"]));
    let google = Arc::new(ScriptedProvider::new(ProviderId::GoogleBooks).failing());
    let open_library = Arc::new(ScriptedProvider::new(ProviderId::OpenLibrary).failing());
    let providers: Vec<Arc<dyn ProviderClient>> = vec![google, open_library];

    let runner = Runner::with_providers(config(), store.clone(), providers);
    let stats = runner.run().await?;

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.matched, 0);
    assert_eq!(stats.error_kinds.get("all_providers_failed"), Some(&2));
    assert_eq!(store.cell(2, "Author").as_deref(), Some(""));
    Ok(())
}

#[tokio::test]
async fn below_threshold_candidates_produce_no_match() -> Result<()> {
    init_tracing();
    let store = Arc::new(store_with_titles(&["The Great Gatsby"]));
    let unrelated = Arc::new(
        ScriptedProvider::new(ProviderId::GoogleBooks).with_candidate(
            "The Great Gatsby",
            candidate(
                ProviderId::GoogleBooks,
                "Infinite Jest",
                0,
                &[(MetadataField::Authors, "David Foster Wallace")],
            ),
        ),
    );
    let providers: Vec<Arc<dyn ProviderClient>> = vec![unrelated];

    let runner = Runner::with_providers(config(), store.clone(), providers);
    let stats = runner.run().await?;

    assert_eq!(stats.no_match, 1);
    assert_eq!(stats.matched, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(store.cell(2, "Author").as_deref(), Some(""));
    Ok(())
}

#[tokio::test]
async fn existing_cells_are_never_overwritten() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryRowStore::new(vec![SheetRow::new(2)
        .with_field("Title", "The Great Gatsby")
        .with_field("Author", "Hand-entered Author")
        .with_field("Genre", "")
        .with_field("ISBN", "")]));
    let providers: Vec<Arc<dyn ProviderClient>> = vec![gatsby_google(), gatsby_open_library()];

    let runner = Runner::with_providers(config(), store.clone(), providers);
    let stats = runner.run().await?;

    assert_eq!(stats.matched, 1);
    // The populated cell survives; the gaps around it are filled.
    assert_eq!(
        store.cell(2, "Author").as_deref(),
        Some("Hand-entered Author")
    );
    assert_eq!(store.cell(2, "ISBN").as_deref(), Some("9780743273565"));
    assert_eq!(store.cell(2, "Genre").as_deref(), Some("Fiction"));
    Ok(())
}

#[tokio::test]
async fn write_failures_are_counted_and_do_not_halt_other_writes() -> Result<()> {
    init_tracing();
    let store = Arc::new(store_with_titles(&["The Great Gatsby"]));
    store.fail_writes_to(2, "Author");
    let providers: Vec<Arc<dyn ProviderClient>> = vec![gatsby_google(), gatsby_open_library()];

    let runner = Runner::with_providers(config(), store.clone(), providers);
    let stats = runner.run().await?;

    assert_eq!(stats.matched, 1);
    assert_eq!(stats.writes_failed, 1);
    assert!(stats.writes_applied >= 2);
    // The failed cell is untouched while its siblings landed.
    assert_eq!(store.cell(2, "Author").as_deref(), Some(""));
    assert_eq!(store.cell(2, "ISBN").as_deref(), Some("9780743273565"));
    Ok(())
}

#[tokio::test]
async fn dry_run_computes_outcomes_without_writing() -> Result<()> {
    init_tracing();
    let store = Arc::new(store_with_titles(&["The Great Gatsby"]));
    let providers: Vec<Arc<dyn ProviderClient>> = vec![gatsby_google(), gatsby_open_library()];

    let dry_config = EnrichmentConfig::builder().dry_run(true).build()?;
    let runner = Runner::with_providers(dry_config, store.clone(), providers);
    let stats = runner.run().await?;

    assert_eq!(stats.matched, 1);
    assert_eq!(stats.writes_applied, 0);
    assert_eq!(stats.writes_failed, 0);
    assert_eq!(store.cell(2, "Author").as_deref(), Some(""));
    assert_eq!(store.cell(2, "ISBN").as_deref(), Some(""));
    Ok(())
}

#[tokio::test]
async fn rows_without_titles_are_not_processed() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryRowStore::new(vec![
        SheetRow::new(2).with_field("Title", "The Great Gatsby"),
        SheetRow::new(3).with_field("Title", ""),
    ]));
    let google = gatsby_google();
    let providers: Vec<Arc<dyn ProviderClient>> = vec![google.clone()];

    let runner = Runner::with_providers(config(), store.clone(), providers);
    let stats = runner.run().await?;

    assert_eq!(stats.processed, 1);
    assert_eq!(google.calls(), 1);
    Ok(())
}
