//! In-process keyring backed by secp256k1 private keys.
//!
//! # Security
//! - Private keys are loaded ONLY from environment variables (or handed in
//!   by the embedding application)
//! - Keys are never logged or serialized

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, Signer};
use async_trait::async_trait;
use dashmap::DashMap;

use crate::chain::keys::{KeyError, KeyProvider, PublicKey};
use crate::chain::types::{Chain, Curve};

/// Environment variable prefix: `XCHAIN_ACCOUNT_<index>_<P|C>_KEY`.
pub const KEY_ENV_PREFIX: &str = "XCHAIN_ACCOUNT";

/// Keys held in memory, one per (account index, chain).
#[derive(Debug, Default)]
pub struct LocalKeyring {
    signers: DashMap<(u32, Chain), PrivateKeySigner>,
}

impl LocalKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key from a hex-encoded private key string.
    ///
    /// # Arguments
    /// * `account_index` - Account the key belongs to
    /// * `chain` - Chain whose derivation path produced the key
    /// * `private_key_hex` - Hex string (with or without 0x prefix)
    pub fn insert_hex(
        &self,
        account_index: u32,
        chain: Chain,
        private_key_hex: &str,
    ) -> Result<Address, KeyError> {
        let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| KeyError::Failed(format!("Invalid private key format: {}", e)))?;

        let address = signer.address();
        tracing::info!(
            account_index = account_index,
            chain = %chain,
            address = %chain.format_address(address),
            "Key loaded"
        );
        self.signers.insert((account_index, chain), signer);
        Ok(address)
    }

    /// Load keys for the given accounts from the environment.
    ///
    /// Reads `XCHAIN_ACCOUNT_<index>_P_KEY` and `XCHAIN_ACCOUNT_<index>_C_KEY`.
    /// Missing variables are skipped; the account then fails validation
    /// when a transfer names it.
    pub fn from_env(accounts: &[u32]) -> Result<Self, KeyError> {
        let keyring = Self::new();
        for &account_index in accounts {
            for chain in Chain::ALL {
                let var = env_var_name(account_index, chain);
                match std::env::var(&var) {
                    Ok(value) => {
                        keyring.insert_hex(account_index, chain, value.trim())?;
                    }
                    Err(_) => {
                        tracing::warn!(variable = %var, "Environment variable not set, key skipped");
                    }
                }
            }
        }
        Ok(keyring)
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    fn signer(&self, account_index: u32, chain: Chain) -> Result<PrivateKeySigner, KeyError> {
        self.signers
            .get(&(account_index, chain))
            .map(|r| r.value().clone())
            .ok_or(KeyError::UnknownAccount {
                account_index,
                chain,
            })
    }
}

/// Name of the environment variable holding one account's key for a chain.
pub fn env_var_name(account_index: u32, chain: Chain) -> String {
    format!("{}_{}_{}_KEY", KEY_ENV_PREFIX, account_index, chain.as_str())
}

#[async_trait]
impl KeyProvider for LocalKeyring {
    async fn derive_public_key(
        &self,
        account_index: u32,
        chain: Chain,
        curve: Curve,
    ) -> Result<PublicKey, KeyError> {
        let signer = self.signer(account_index, chain)?;
        match curve {
            Curve::Secp256k1 => {
                let point = signer.credential().verifying_key().to_encoded_point(false);
                PublicKey::from_uncompressed(curve, point.as_bytes())
            }
        }
    }

    async fn sign_digest(
        &self,
        account_index: u32,
        chain: Chain,
        curve: Curve,
        digest: B256,
    ) -> Result<Signature, KeyError> {
        let signer = self.signer(account_index, chain)?;
        match curve {
            Curve::Secp256k1 => signer
                .sign_hash(&digest)
                .await
                .map_err(|e| KeyError::Failed(format!("Signing failed: {}", e))),
        }
    }
}
