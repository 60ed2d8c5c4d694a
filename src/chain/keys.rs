//! Key derivation and signing seams.
//!
//! # Security Constraints
//! - Private keys never leave the [`KeyProvider`]
//! - Keys and signatures are never logged
//! - Only public keys are cached, in an explicit [`KeyCache`] owned by
//!   whoever constructs the signer

use alloy::primitives::{Address, B256};
use alloy::signers::Signature;
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::chain::types::{Chain, Curve};

/// Errors raised by key providers.
#[derive(Debug, Clone, Error)]
pub enum KeyError {
    /// No key is derivable for this account/chain/curve.
    #[error("no key for account {account_index} on {chain}-chain")]
    UnknownAccount { account_index: u32, chain: Chain },

    /// Signing device or backend is not reachable (e.g. hardware transport).
    #[error("signing backend unavailable: {0}")]
    Unavailable(String),

    #[error("signing failed: {0}")]
    Failed(String),
}

/// Public key of an account on one chain.
///
/// Only constructed through [`PublicKey::from_uncompressed`], so the point
/// is always 65 bytes with the `0x04` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    curve: Curve,
    uncompressed: Vec<u8>,
}

impl PublicKey {
    /// Length of a SEC1 uncompressed point (`0x04 || X || Y`).
    pub const UNCOMPRESSED_LEN: usize = 65;

    /// Wrap a SEC1 uncompressed point returned by a key provider.
    ///
    /// # Errors
    /// [`KeyError::Failed`] when the bytes are not an uncompressed point.
    pub fn from_uncompressed(curve: Curve, bytes: impl Into<Vec<u8>>) -> Result<Self, KeyError> {
        let uncompressed = bytes.into();
        if uncompressed.len() != Self::UNCOMPRESSED_LEN {
            return Err(KeyError::Failed(format!(
                "public key is {} bytes, expected {}",
                uncompressed.len(),
                Self::UNCOMPRESSED_LEN
            )));
        }
        if uncompressed[0] != 0x04 {
            return Err(KeyError::Failed(format!(
                "public key prefix {:#04x} is not an uncompressed point",
                uncompressed[0]
            )));
        }
        Ok(Self { curve, uncompressed })
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.uncompressed
    }

    /// 20-byte address derived from the key.
    pub fn address(&self) -> Address {
        match self.curve {
            Curve::Secp256k1 => Address::from_raw_public_key(&self.uncompressed[1..]),
        }
    }
}

/// Key/signing provider (local keyring, hardware wallet, remote signer).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn derive_public_key(
        &self,
        account_index: u32,
        chain: Chain,
        curve: Curve,
    ) -> Result<PublicKey, KeyError>;

    async fn sign_digest(
        &self,
        account_index: u32,
        chain: Chain,
        curve: Curve,
        digest: B256,
    ) -> Result<Signature, KeyError>;
}

/// Cache of derived public keys, keyed by wallet, account and chain.
///
/// Lifecycle is explicit: clear one wallet when it is removed or locked,
/// clear everything on logout.
#[derive(Debug, Default)]
pub struct KeyCache {
    entries: DashMap<(String, u32, Chain), PublicKey>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, wallet_id: &str, account_index: u32, chain: Chain) -> Option<PublicKey> {
        self.entries
            .get(&(wallet_id.to_string(), account_index, chain))
            .map(|r| r.value().clone())
    }

    pub fn insert(&self, wallet_id: &str, account_index: u32, chain: Chain, key: PublicKey) {
        self.entries
            .insert((wallet_id.to_string(), account_index, chain), key);
    }

    /// Drop every cached key of one wallet.
    pub fn clear_wallet(&self, wallet_id: &str) {
        self.entries.retain(|(wallet, _, _), _| wallet != wallet_id);
        tracing::debug!(wallet_id = wallet_id, "Cleared key cache for wallet");
    }

    pub fn clear_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
