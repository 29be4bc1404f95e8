//! Credential vault and broker session cache.
//!
//! Credentials rest sealed in storage (HMAC-SHA256 keystream in counter
//! mode plus an integrity tag — see [`seal`]/[`unseal`]) and are decrypted
//! only inside an authentication call. Authenticated sessions are cached
//! per account behind a per-account mutex, so concurrent callers for the
//! same account share one pending authentication (single-flight). Session
//! handles are reference-counted (`Arc`); a refresh never invalidates a
//! handle some pipeline is still using.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::error::{BrokerError, CoreError, Result};
use crate::store::Database;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Credentials & session
// ---------------------------------------------------------------------------

/// Broker credentials for one account, as stored (sealed) in the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerCredentials {
    /// Broker client code carried in request bodies.
    pub client_code: String,
    /// Broker user id carried in the request head.
    pub user_id: String,
    /// Broker password carried in the request head.
    pub password: String,
    /// Vendor API key carried in the request head.
    pub api_key: String,
}

/// An authenticated broker session.
///
/// Carries the decrypted head credentials for the lifetime of the handle;
/// dropping the last `Arc` drops them from memory.
#[derive(Debug, Clone)]
pub struct BrokerSession {
    /// The local account this session belongs to.
    pub account: String,
    pub client_code: String,
    pub user_id: String,
    pub password: String,
    pub api_key: String,
    /// Session token returned by login.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl BrokerSession {
    /// True when the session expires within `guard` from now — time to
    /// refresh proactively.
    pub fn expires_within(&self, guard: Duration) -> bool {
        let guard = chrono::Duration::from_std(guard).unwrap_or(chrono::Duration::zero());
        Utc::now() + guard >= self.expires_at
    }
}

/// The login path. Implemented by
/// [`IiflAuthClient`](crate::broker::client::IiflAuthClient) in production
/// and by in-memory fakes in tests.
#[async_trait::async_trait]
pub trait SessionAuthenticator: Send + Sync {
    /// Exchange credentials for a session.
    async fn authenticate(
        &self,
        account: &str,
        creds: &BrokerCredentials,
    ) -> std::result::Result<BrokerSession, BrokerError>;
}

// ---------------------------------------------------------------------------
// Sealing
// ---------------------------------------------------------------------------

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;

fn keystream_block(key: &[u8], nonce: &[u8], counter: u64) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(nonce);
    mac.update(&counter.to_le_bytes());
    mac.finalize().into_bytes().into()
}

fn apply_keystream(key: &[u8], nonce: &[u8], data: &mut [u8]) {
    for (i, chunk) in data.chunks_mut(32).enumerate() {
        let block = keystream_block(key, nonce, i as u64);
        for (b, k) in chunk.iter_mut().zip(block.iter()) {
            *b ^= k;
        }
    }
}

fn tag_mac(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(b"tag");
    mac.update(nonce);
    mac.update(ciphertext);
    mac
}

/// Seal plaintext under the master key: `base64(nonce || ciphertext || tag)`.
pub fn seal(key: &[u8], plaintext: &[u8]) -> String {
    use base64::Engine as _;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut data = plaintext.to_vec();
    apply_keystream(key, &nonce, &mut data);
    let tag = tag_mac(key, &nonce, &data).finalize().into_bytes();

    let mut out = Vec::with_capacity(NONCE_LEN + data.len() + TAG_LEN);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&data);
    out.extend_from_slice(&tag);
    base64::engine::general_purpose::STANDARD.encode(out)
}

/// Reverse [`seal`], verifying the integrity tag before decrypting.
pub fn unseal(key: &[u8], sealed: &str) -> Result<Vec<u8>> {
    use base64::Engine as _;

    let raw = base64::engine::general_purpose::STANDARD
        .decode(sealed)
        .map_err(|e| CoreError::Unseal(format!("bad base64: {e}")))?;
    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(CoreError::Unseal("sealed blob too short".into()));
    }
    let (nonce, rest) = raw.split_at(NONCE_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

    tag_mac(key, nonce, ciphertext)
        .verify_slice(tag)
        .map_err(|_| CoreError::Unseal("integrity tag mismatch".into()))?;

    let mut data = ciphertext.to_vec();
    apply_keystream(key, nonce, &mut data);
    Ok(data)
}

// ---------------------------------------------------------------------------
// The vault
// ---------------------------------------------------------------------------

/// Per-account sealed credentials and the session cache over them.
pub struct CredentialVault {
    db: Database,
    master_key: Vec<u8>,
    authenticator: Arc<dyn SessionAuthenticator>,
    refresh_guard: Duration,
    /// account → slot. The per-slot mutex is the single-flight mechanism.
    entries: parking_lot::Mutex<HashMap<String, Arc<Mutex<Option<Arc<BrokerSession>>>>>>,
}

impl CredentialVault {
    /// Build a vault over the shared database.
    pub fn new(
        db: Database,
        master_key: impl Into<Vec<u8>>,
        authenticator: Arc<dyn SessionAuthenticator>,
        refresh_guard: Duration,
    ) -> Self {
        Self {
            db,
            master_key: master_key.into(),
            authenticator,
            refresh_guard,
            entries: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Seal and persist credentials for an account, replacing any prior
    /// ones, and drop any cached session.
    pub async fn store_credentials(&self, account: &str, creds: &BrokerCredentials) -> Result<()> {
        let sealed = seal(&self.master_key, &serde_json::to_vec(creds)?);
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.db.conn().lock().await;
            conn.execute(
                "INSERT INTO broker_credentials (account, sealed, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(account) DO UPDATE SET sealed = ?2, updated_at = ?3",
                rusqlite::params![account, sealed, now],
            )?;
        }
        self.invalidate(account).await;
        Ok(())
    }

    /// Yield a session for the account, authenticating if none is cached
    /// or the cached one is inside the refresh guard window.
    pub async fn session(
        &self,
        account: &str,
    ) -> std::result::Result<Arc<BrokerSession>, BrokerError> {
        let slot = self.slot(account);
        let mut cached = slot.lock().await;

        if let Some(session) = cached.as_ref() {
            if !session.expires_within(self.refresh_guard) {
                return Ok(session.clone());
            }
            tracing::debug!(account, "session inside refresh guard, re-authenticating");
        }

        let creds = self.load_credentials(account).await?;
        let session = Arc::new(self.authenticator.authenticate(account, &creds).await?);
        tracing::debug!(account, expires_at = %session.expires_at, "broker session established");
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Drop the cached session for an account (e.g. after the broker
    /// returned 401 for it).
    pub async fn invalidate(&self, account: &str) {
        let slot = self.slot(account);
        let mut cached = slot.lock().await;
        if cached.take().is_some() {
            tracing::debug!(account, "broker session invalidated");
        }
    }

    fn slot(&self, account: &str) -> Arc<Mutex<Option<Arc<BrokerSession>>>> {
        let mut entries = self.entries.lock();
        entries
            .entry(account.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn load_credentials(
        &self,
        account: &str,
    ) -> std::result::Result<BrokerCredentials, BrokerError> {
        let sealed: Option<String> = {
            let conn = self.db.conn().lock().await;
            conn.query_row(
                "SELECT sealed FROM broker_credentials WHERE account = ?1",
                [account],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(|e| BrokerError::AuthTransient(format!("credential read failed: {e}")))?
        };

        let sealed = sealed.ok_or_else(|| {
            BrokerError::InvalidCredentials(format!("no credentials stored for {account}"))
        })?;

        let plain = unseal(&self.master_key, &sealed)
            .map_err(|e| BrokerError::InvalidCredentials(e.to_string()))?;
        serde_json::from_slice(&plain)
            .map_err(|e| BrokerError::InvalidCredentials(format!("credential decode failed: {e}")))
    }
}
