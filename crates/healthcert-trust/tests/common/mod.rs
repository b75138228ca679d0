//! Shared fixtures for trust list integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};

use healthcert_trust::cose::SignedEnvelope;
use healthcert_trust::storage::{MemoryRefreshState, MemoryTrustListStore, TrustListStore};
use healthcert_trust::transport::{Fetcher, TransportError};
use healthcert_trust::{
    CertType, FreshnessToken, ManualClock, PublicKey, TrustAnchor, TrustList, TrustListConfig,
    TrustListEntry, TrustListService,
};

pub const SIGNATURE_URL: &str = "https://trust.test/trustlist.sig";
pub const TRUST_LIST_URL: &str = "https://trust.test/trustlist";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fixed starting time for every scenario
pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap()
}

/// Scripted answer for one URL
#[derive(Debug, Clone)]
pub enum Response {
    Body(Vec<u8>),
    Status(u16),
    Unreachable,
}

/// Fetcher answering from a script and counting requests per URL.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Response>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedFetcher {
    pub fn respond(&self, url: &str, response: Response) {
        self.responses.lock().unwrap().insert(url.to_string(), response);
    }

    /// Hold every response for `delay` so concurrent callers overlap.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| u.as_str() == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.lock().unwrap().get(url).cloned();
        match response {
            Some(Response::Body(body)) => Ok(body),
            Some(Response::Status(status)) => Err(TransportError::Status { url: url.to_string(), status }),
            Some(Response::Unreachable) | None => Err(TransportError::Request {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

/// Key that signs the signature resource in tests
pub fn anchor_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

pub fn test_anchor() -> TrustAnchor {
    TrustAnchor::from_public_key(PublicKey::Ed25519(anchor_signing_key().verifying_key()))
}

pub fn issuer_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn entry(
    kid: &[u8],
    seed: u8,
    types: Option<&[CertType]>,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
) -> TrustListEntry {
    TrustListEntry {
        key_identifier: kid.to_vec(),
        public_key: issuer_key(seed).verifying_key().to_bytes().to_vec(),
        suitability: types.map(|types| types.iter().copied().collect()),
        not_before,
        not_after,
    }
}

/// Entry valid for a year around `t0`, any certificate type.
pub fn open_entry(kid: &[u8], seed: u8) -> TrustListEntry {
    entry(kid, seed, None, Some(t0() - TimeDelta::days(180)), Some(t0() + TimeDelta::days(180)))
}

/// Trust list document bytes and their SHA-256 content hash.
pub fn trust_list_document(entries: Vec<TrustListEntry>) -> (Vec<u8>, Vec<u8>) {
    let document = TrustList::new(entries, Vec::new()).unwrap().to_cbor().unwrap();
    let hash = Sha256::digest(&document).to_vec();
    (document, hash)
}

/// Signed freshness token asserting `content_hash`.
pub fn signature_resource(
    content_hash: &[u8],
    issued_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
) -> Vec<u8> {
    let mut token = FreshnessToken::new(content_hash.to_vec()).with_issuer("AT");
    token.issued_at = issued_at;
    token.expires_at = expires_at;
    SignedEnvelope::sign_ed25519(&token.encode().unwrap(), &anchor_signing_key()).unwrap()
}

/// Everything a scenario needs to drive and inspect the service.
pub struct Harness {
    pub service: TrustListService,
    pub fetcher: Arc<ScriptedFetcher>,
    pub clock: Arc<ManualClock>,
    pub refresh_state: Arc<MemoryRefreshState>,
    pub store: Arc<MemoryTrustListStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(MemoryTrustListStore::new()).await
    }

    pub async fn with_store(store: MemoryTrustListStore) -> Self {
        init_tracing();

        let fetcher = Arc::new(ScriptedFetcher::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let refresh_state = Arc::new(MemoryRefreshState::new());
        let store = Arc::new(store);

        let config = TrustListConfig::default().with_urls(SIGNATURE_URL, TRUST_LIST_URL);
        let service = TrustListService::builder(config)
            .fetcher(fetcher.clone())
            .store(store.clone() as Arc<dyn TrustListStore>)
            .refresh_state(refresh_state.clone())
            .clock(clock.clone())
            .trust_anchor(test_anchor())
            .build()
            .await
            .unwrap();

        Self { service, fetcher, clock, refresh_state, store }
    }

    /// Serve `entries` with a token valid around the current clock.
    /// Returns the content hash.
    pub fn publish(&self, entries: Vec<TrustListEntry>) -> Vec<u8> {
        use healthcert_trust::Clock;

        let now = self.clock.now();
        let (document, hash) = trust_list_document(entries);
        self.fetcher.respond(
            SIGNATURE_URL,
            Response::Body(signature_resource(
                &hash,
                Some(now - TimeDelta::minutes(5)),
                Some(now + TimeDelta::days(2)),
            )),
        );
        self.fetcher.respond(TRUST_LIST_URL, Response::Body(document));
        hash
    }

    /// Move past the refresh interval
    pub fn expire_throttle(&self) {
        self.clock.advance(TimeDelta::hours(1));
    }
}
