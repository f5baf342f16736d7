use anyhow::Result;
use bibfetch::{MetadataField, ProviderClient, ProviderId, RawCandidate, TransportError};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Builds a raw candidate the way a provider client would after parsing a
/// response body.
pub fn candidate(
    provider: ProviderId,
    title: &str,
    rank: usize,
    fields: &[(MetadataField, &str)],
) -> RawCandidate {
    RawCandidate {
        provider,
        title: title.to_string(),
        fields: fields
            .iter()
            .map(|(field, value)| (*field, value.to_string()))
            .collect(),
        rank,
    }
}

/// Scripted provider used behind the [`ProviderClient`] seam.
///
/// Lookups answer from a fixed title-keyed catalog, can be forced to fail
/// (simulating retry exhaustion in the transport), and can fire a
/// cancellation token on first contact to exercise shutdown paths
/// deterministically.
pub struct ScriptedProvider {
    id: ProviderId,
    catalog: Mutex<HashMap<String, Vec<RawCandidate>>>,
    fail_always: AtomicBool,
    hang: AtomicBool,
    calls: AtomicUsize,
    cancel_on_lookup: Mutex<Option<CancellationToken>>,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            catalog: Mutex::new(HashMap::new()),
            fail_always: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            cancel_on_lookup: Mutex::new(None),
        }
    }

    /// Registers a candidate returned for lookups of `query_title`.
    pub fn with_candidate(self, query_title: &str, candidate: RawCandidate) -> Self {
        self.catalog
            .lock()
            .unwrap()
            .entry(query_title.to_string())
            .or_default()
            .push(candidate);
        self
    }

    /// Every lookup fails as if the transport exhausted its retries.
    pub fn failing(self) -> Self {
        self.fail_always.store(true, Ordering::SeqCst);
        self
    }

    /// Every lookup hangs forever, standing in for a stuck upstream.
    pub fn hanging(self) -> Self {
        self.hang.store(true, Ordering::SeqCst);
        self
    }

    /// Cancels `token` as soon as any lookup reaches this provider.
    pub fn arm_cancellation(&self, token: CancellationToken) {
        *self.cancel_on_lookup.lock().unwrap() = Some(token);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProviderClient for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn lookup<'a>(&'a self, title: &'a str) -> BoxFuture<'a, Result<Vec<RawCandidate>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(token) = self.cancel_on_lookup.lock().unwrap().as_ref() {
                token.cancel();
            }

            if self.hang.load(Ordering::SeqCst) {
                futures::future::pending::<()>().await;
            }

            if self.fail_always.load(Ordering::SeqCst) {
                return Err(TransportError::Exhausted {
                    provider: self.id,
                    attempts: 5,
                }
                .into());
            }

            let catalog = self.catalog.lock().unwrap();
            Ok(catalog.get(title).cloned().unwrap_or_default())
        })
    }
}
