//! Trust list service: refresh protocol and key resolution.
//!
//! ## Refresh
//! 1. Throttle: skip the network while `now < last_update + interval`
//! 2. Fetch and verify the detached signature against the trust anchor
//! 3. Decode the freshness token and check its time window
//! 4. Compare its subject with the cached content hash
//! 5. Only on mismatch, fetch, decode and install the full list
//!
//! `last_update` is recorded once the authority answered with a verified
//! token, even if the token or the following content fetch is rejected. A
//! transport or signature failure leaves it untouched.
//!
//! ## Resolution
//! Every resolution first attempts a refresh. Refresh errors are logged and
//! resolution continues against whatever list is cached.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::TrustListConfig;
use crate::cose::verify_envelope;
use crate::crypto::{FileKeyStore, PublicKey, TrustAnchor};
use crate::cwt::FreshnessToken;
use crate::error::TrustError;
use crate::storage::{EncryptedFileStore, FileRefreshState, RefreshStateStore, TrustListStore};
use crate::transport::{Fetcher, HttpFetcher};
use crate::trustlist::{CertType, TrustList, TrustListEntry};
use crate::Result;

const KEYS_DIR: &str = "keys";
const REFRESH_STATE_FILE: &str = "last_update";

/// Whether a network refresh is due.
///
/// Due unless `now < last_update + interval`. Never refreshed means due.
pub fn refresh_due(now: DateTime<Utc>, last_update: Option<DateTime<Utc>>, interval: TimeDelta) -> bool {
    match last_update {
        None => true,
        Some(last_update) => match last_update.checked_add_signed(interval) {
            Some(next_refresh) => now >= next_refresh,
            None => false,
        },
    }
}

/// Check a trust list entry for use at `now`.
fn check_entry(
    entry: &TrustListEntry,
    cert_type: CertType,
    credential_token: Option<&FreshnessToken>,
    now: DateTime<Utc>,
) -> Result<PublicKey> {
    let kid = hex::encode(&entry.key_identifier);

    if !entry.is_valid_at(now) {
        warn!(target: "healthcert::audit", event = "public_key_expired", kid = %kid, "Rejected key outside its validity window");
        return Err(TrustError::PublicKeyExpired);
    }

    if !entry.is_suitable_for(cert_type) {
        warn!(
            target: "healthcert::audit",
            event = "unsuitable_public_key_type",
            kid = %kid,
            cert_type = %cert_type,
            "Rejected key not permitted for certificate type"
        );
        return Err(TrustError::UnsuitablePublicKeyType);
    }

    if let Some(token) = credential_token {
        match entry.covers_token(token) {
            Some(true) => {}
            Some(false) => {
                warn!(
                    target: "healthcert::audit",
                    event = "cwt_expired",
                    kid = %kid,
                    "Rejected credential issued or expiring outside the key's validity window"
                );
                return Err(TrustError::CwtExpired);
            }
            None => debug!("Skipping credential window check for key {}: incomplete timestamps", kid),
        }
    }

    PublicKey::from_raw(&entry.public_key).map_err(|e| {
        error!("Cannot create public key {} from trust list: {}", kid, e);
        TrustError::KeyCreationError(e.to_string())
    })
}

/// Owns the cached trust list and drives its refresh.
pub struct TrustListService {
    signature_url: String,
    trust_list_url: String,
    refresh_interval: TimeDelta,
    anchor: Option<TrustAnchor>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn TrustListStore>,
    refresh_state: Arc<dyn RefreshStateStore>,
    clock: Arc<dyn Clock>,
    /// Replaced wholesale, never mutated in place
    trust_list: RwLock<Arc<TrustList>>,
    /// Coalesces concurrent refresh attempts
    refresh_guard: Mutex<()>,
}

impl TrustListService {
    /// Create a new service builder
    pub fn builder(config: TrustListConfig) -> TrustListServiceBuilder {
        TrustListServiceBuilder::new(config)
    }

    /// Service with file-backed storage and HTTP transport.
    pub async fn from_config(config: TrustListConfig) -> anyhow::Result<Self> {
        Self::builder(config).build().await
    }

    /// Current trust list snapshot
    pub fn trust_list(&self) -> Arc<TrustList> {
        self.trust_list.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Time of the last completed refresh attempt
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.refresh_state.get()
    }

    fn is_refresh_due(&self, now: DateTime<Utc>) -> bool {
        refresh_due(now, self.refresh_state.get(), self.refresh_interval)
    }

    fn install(&self, trust_list: Arc<TrustList>) {
        *self.trust_list.write().unwrap_or_else(PoisonError::into_inner) = trust_list;
    }

    /// Refresh the trust list if the refresh interval has elapsed.
    pub async fn refresh_if_necessary(&self) -> Result<()> {
        if !self.is_refresh_due(self.clock.now()) {
            debug!("Trust list refreshed recently, skipping network");
            return Ok(());
        }

        let _guard = self.refresh_guard.lock().await;

        // A concurrent caller may have completed a refresh while we waited.
        let now = self.clock.now();
        if !self.is_refresh_due(now) {
            debug!("Trust list refreshed by a concurrent caller");
            return Ok(());
        }

        self.refresh(now).await
    }

    async fn refresh(&self, now: DateTime<Utc>) -> Result<()> {
        let anchor = self
            .anchor
            .as_ref()
            .ok_or_else(|| TrustError::service("trust anchor is unavailable"))?;

        let envelope = self.fetcher.fetch(&self.signature_url).await.map_err(|e| {
            warn!("Trust list signature fetch failed: {}", e);
            TrustError::service(format!("signature fetch failed: {e}"))
        })?;

        let payload = verify_envelope(&envelope, anchor.public_key())?;

        // The authority answered with a verified token: the attempt counts.
        self.refresh_state.set(now);

        let token = FreshnessToken::decode(&payload)
            .ok_or_else(|| TrustError::service("freshness token has no content hash"))?;

        if !token.is_already_valid(now) {
            warn!(
                target: "healthcert::audit",
                event = "freshness_token_not_yet_valid",
                issued_at = ?token.issued_at,
                "Rejected trust list signature issued in the future"
            );
            return Err(TrustError::NotYetValid);
        }
        if !token.is_not_expired(now) {
            warn!(
                target: "healthcert::audit",
                event = "freshness_token_expired",
                expires_at = ?token.expires_at,
                "Rejected expired trust list signature"
            );
            return Err(TrustError::Expired);
        }

        if token.subject == self.trust_list().content_hash() {
            debug!("Trust list unchanged ({})", hex::encode(&token.subject));
            return Ok(());
        }

        let body = self.fetcher.fetch(&self.trust_list_url).await.map_err(|e| {
            warn!("Trust list fetch failed: {}", e);
            TrustError::service(format!("trust list fetch failed: {e}"))
        })?;

        let trust_list = TrustList::from_cbor(&body).map_err(|e| {
            warn!("Rejected undecodable trust list: {:#}", e);
            TrustError::service(format!("trust list is undecodable: {e}"))
        })?;
        let trust_list = Arc::new(trust_list.with_content_hash(token.subject));

        info!(
            "Installed trust list {} with {} keys",
            hex::encode(trust_list.content_hash()),
            trust_list.len()
        );
        self.install(trust_list.clone());
        self.store.store(&trust_list).await;

        Ok(())
    }

    /// Resolve a key identifier for a certificate type.
    pub async fn resolve_key(&self, key_identifier: &[u8], cert_type: CertType) -> Result<PublicKey> {
        self.resolve(key_identifier, cert_type, None).await
    }

    /// Resolve a key and check the credential's own token against the key's
    /// validity window.
    pub async fn resolve_key_with_token(
        &self,
        key_identifier: &[u8],
        cert_type: CertType,
        credential_token: &FreshnessToken,
    ) -> Result<PublicKey> {
        self.resolve(key_identifier, cert_type, Some(credential_token)).await
    }

    async fn resolve(
        &self,
        key_identifier: &[u8],
        cert_type: CertType,
        credential_token: Option<&FreshnessToken>,
    ) -> Result<PublicKey> {
        if let Err(e) = self.refresh_if_necessary().await {
            warn!("Trust list refresh failed, resolving against cached list: {}", e);
        }

        let trust_list = self.trust_list();
        let Some(entry) = trust_list.get(key_identifier) else {
            warn!(
                target: "healthcert::audit",
                event = "key_not_in_trust_list",
                kid = %hex::encode(key_identifier),
                "Rejected unknown key identifier"
            );
            return Err(TrustError::KeyNotInTrustList);
        };

        check_entry(entry, cert_type, credential_token, self.clock.now())
    }
}

/// Builder for TrustListService
pub struct TrustListServiceBuilder {
    config: TrustListConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    store: Option<Arc<dyn TrustListStore>>,
    refresh_state: Option<Arc<dyn RefreshStateStore>>,
    clock: Option<Arc<dyn Clock>>,
    anchor: Option<TrustAnchor>,
}

impl TrustListServiceBuilder {
    pub fn new(config: TrustListConfig) -> Self {
        Self { config, fetcher: None, store: None, refresh_state: None, clock: None, anchor: None }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn store(mut self, store: Arc<dyn TrustListStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn refresh_state(mut self, refresh_state: Arc<dyn RefreshStateStore>) -> Self {
        self.refresh_state = Some(refresh_state);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the configured or embedded trust anchor
    pub fn trust_anchor(mut self, anchor: TrustAnchor) -> Self {
        self.anchor = Some(anchor);
        self
    }

    fn resolve_anchor(config: &TrustListConfig) -> Option<TrustAnchor> {
        let anchor = match &config.trust_anchor {
            Some(certificate) => TrustAnchor::from_certificate_base64(certificate),
            None => TrustAnchor::embedded(),
        };
        match anchor {
            Ok(anchor) => Some(anchor),
            Err(e) => {
                error!("Trust anchor is unusable, every refresh will fail: {:#}", e);
                None
            }
        }
    }

    /// Build the service and load the persisted trust list.
    pub async fn build(self) -> anyhow::Result<TrustListService> {
        let config = self.config;
        let storage_dir = config.storage_dir.clone();

        let anchor = match self.anchor {
            Some(anchor) => Some(anchor),
            None => Self::resolve_anchor(&config),
        };

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(config.request_timeout())?),
        };
        let store: Arc<dyn TrustListStore> = self.store.unwrap_or_else(|| {
            Arc::new(EncryptedFileStore::new(
                &storage_dir,
                Arc::new(FileKeyStore::new(storage_dir.join(KEYS_DIR))),
            ))
        });
        let refresh_state: Arc<dyn RefreshStateStore> = self
            .refresh_state
            .unwrap_or_else(|| Arc::new(FileRefreshState::new(storage_dir.join(REFRESH_STATE_FILE))));
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let refresh_interval = TimeDelta::from_std(config.refresh_interval())?;
        let trust_list = store.load().await.unwrap_or_default();

        Ok(TrustListService {
            signature_url: config.signature_url,
            trust_list_url: config.trust_list_url,
            refresh_interval,
            anchor,
            fetcher,
            store,
            refresh_state,
            clock,
            trust_list: RwLock::new(Arc::new(trust_list)),
            refresh_guard: Mutex::new(()),
        })
    }
}
