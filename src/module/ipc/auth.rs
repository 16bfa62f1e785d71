//! Adapter authentication
//!
//! Project adapters share a per-module secret with the engine. Each RPC
//! carries a fresh HS384 JWT signed with that secret; tokens expire five
//! seconds after issue and are never reused.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::module::traits::ModuleError;
use crate::utils::fs::{ensure_dir, write_secret_file, SECRET_DIR_MODE};
use crate::utils::time::current_timestamp;

/// Secret size (384 bits)
pub const ADAPTER_KEY_BYTES: usize = 48;

/// Lifetime of a minted token
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(5);

/// Shared secret between the engine and one project adapter
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AdapterKey {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for AdapterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdapterKey(..)")
    }
}

impl AdapterKey {
    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; ADAPTER_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Decode a hex-encoded key
    pub fn from_hex(encoded: &str) -> Result<Self, ModuleError> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| ModuleError::InvalidConfig(format!("adapter key is not hex: {}", e)))?;
        if bytes.is_empty() {
            return Err(ModuleError::InvalidConfig("adapter key is empty".to_string()));
        }
        Ok(Self { bytes })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Read a key file
    pub fn load(path: &Path) -> Result<Self, ModuleError> {
        let encoded = std::fs::read_to_string(path)
            .map_err(|e| ModuleError::io(path, "Failed to read adapter key", e))?;
        Self::from_hex(&encoded)
    }

    /// Read a key file, creating it (0600 in a 0700 directory) if absent
    ///
    /// Returns the key and whether it was newly created. Existing keys are
    /// never rotated.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool), ModuleError> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }
        if let Some(parent) = path.parent() {
            ensure_dir(parent, SECRET_DIR_MODE)?;
        }
        let key = Self::generate();
        let mut encoded = key.to_hex();
        write_secret_file(path, encoded.as_bytes())?;
        encoded.zeroize();
        info!("Created adapter key {:?}", path);
        Ok((key, true))
    }
}

/// Claims carried by an adapter token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iat: u64,
    pub exp: u64,
    /// Unique token id
    pub jti: String,
}

/// Mint a token issued now
pub fn mint_token(key: &AdapterKey) -> Result<String, ModuleError> {
    mint_token_at(key, current_timestamp())
}

/// Mint a token with an explicit issue time (seconds since the epoch)
pub fn mint_token_at(key: &AdapterKey, issued_at: u64) -> Result<String, ModuleError> {
    let claims = TokenClaims {
        iat: issued_at,
        exp: issued_at + TOKEN_LIFETIME.as_secs(),
        jti: uuid::Uuid::new_v4().to_string(),
    };
    encode(
        &Header::new(Algorithm::HS384),
        &claims,
        &EncodingKey::from_secret(key.as_bytes()),
    )
    .map_err(|e| ModuleError::SerializationError(format!("Failed to sign adapter token: {}", e)))
}

/// Adapter-side token verification with a replay guard
pub struct AdapterAuthenticator {
    key: AdapterKey,
    /// jti -> expiry of tokens already accepted
    seen: Mutex<HashMap<String, u64>>,
}

impl AdapterAuthenticator {
    pub fn new(key: AdapterKey) -> Self {
        Self {
            key,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Verify a bearer token; missing, malformed, expired and replayed
    /// tokens are `Unauthorized`
    pub fn verify(&self, token: Option<&str>) -> Result<TokenClaims, ModuleError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ModuleError::Unauthorized("missing token".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS384);
        validation.leeway = 0;
        let claims = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.key.as_bytes()),
            &validation,
        )
        .map_err(|e| ModuleError::Unauthorized(format!("invalid token: {}", e)))?
        .claims;

        let now = current_timestamp();
        if claims.exp <= now {
            return Err(ModuleError::Unauthorized("token expired".to_string()));
        }

        let mut seen = self
            .seen
            .lock()
            .map_err(|_| ModuleError::Unauthorized("replay guard poisoned".to_string()))?;
        seen.retain(|_, exp| *exp > now);
        if seen.contains_key(&claims.jti) {
            return Err(ModuleError::Unauthorized(format!(
                "token {} already used",
                claims.jti
            )));
        }
        seen.insert(claims.jti.clone(), claims.exp);
        debug!("Accepted adapter token {}", claims.jti);
        Ok(claims)
    }
}
