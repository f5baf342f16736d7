use bibfetch::{MemoryRowStore, SheetRow};
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// A sheet with one book row (index 2, headers on row 1) whose metadata
/// columns are all blank.
pub fn store_with_titles(titles: &[&str]) -> MemoryRowStore {
    let rows = titles
        .iter()
        .enumerate()
        .map(|(offset, title)| {
            SheetRow::new(offset as u64 + 2)
                .with_field("Title", *title)
                .with_field("Author", "")
                .with_field("Genre", "")
                .with_field("Publisher", "")
                .with_field("Publication Year", "")
                .with_field("ISBN", "")
        })
        .collect();
    MemoryRowStore::new(rows)
}
