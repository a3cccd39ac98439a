//! Encrypted credential handling for exchange connections.
//!
//! API keys are encrypted at rest with Fernet; the process-wide key comes
//! from `ENCRYPTION_KEY` and is immutable configuration. Decryption yields
//! exactly one key pair per connection, selected by its testnet flag.

pub mod error;

pub use error::KeystoreError;

use serde::{Deserialize, Serialize};

/// A plaintext exchange API key pair. Only ever held in memory, never logged.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &mask_key(&self.api_key))
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// An encrypted key pair as stored on the connection row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPair {
    pub api_key: String,
    pub api_secret: String,
}

/// The encrypted credential material of one connection: a mainnet pair and,
/// optionally, a separate testnet pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSecrets {
    pub mainnet: EncryptedPair,
    pub testnet: Option<EncryptedPair>,
}

/// Process-wide Fernet cipher over the configured encryption key.
#[derive(Clone)]
pub struct Cipher {
    fernet: std::sync::Arc<fernet::Fernet>,
}

impl Cipher {
    /// Builds a cipher from a url-safe base64 Fernet key. Fails on a
    /// malformed key so the process can refuse to start.
    pub fn new(encryption_key: &str) -> Result<Self, KeystoreError> {
        let fernet = fernet::Fernet::new(encryption_key).ok_or(KeystoreError::InvalidKey)?;
        Ok(Self {
            fernet: std::sync::Arc::new(fernet),
        })
    }

    /// Generates a fresh key, for provisioning new deployments.
    pub fn generate_key() -> String {
        fernet::Fernet::generate_key()
    }

    pub fn encrypt(&self, value: &str) -> String {
        self.fernet.encrypt(value.as_bytes())
    }

    pub fn decrypt(&self, token: &str) -> Result<String, KeystoreError> {
        let bytes = self
            .fernet
            .decrypt(token)
            .map_err(|_| KeystoreError::DecryptionFailed)?;
        String::from_utf8(bytes).map_err(|_| KeystoreError::DecryptionFailed)
    }

    pub fn encrypt_pair(&self, credentials: &Credentials) -> EncryptedPair {
        EncryptedPair {
            api_key: self.encrypt(&credentials.api_key),
            api_secret: self.encrypt(&credentials.api_secret),
        }
    }

    /// Reveals the key pair matching the connection's testnet flag. A testnet
    /// connection without a stored testnet pair is an error, never a silent
    /// fallback to mainnet keys.
    pub fn reveal(
        &self,
        secrets: &ConnectionSecrets,
        is_testnet: bool,
    ) -> Result<Credentials, KeystoreError> {
        let pair = if is_testnet {
            secrets
                .testnet
                .as_ref()
                .ok_or(KeystoreError::MissingTestnetKeys)?
        } else {
            &secrets.mainnet
        };
        Ok(Credentials {
            api_key: self.decrypt(&pair.api_key)?,
            api_secret: self.decrypt(&pair.api_secret)?,
        })
    }
}

/// Masks an API key down to its last four characters, the only form the API
/// ever returns.
pub fn mask_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::new(&Cipher::generate_key()).unwrap()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = cipher();
        let token = cipher.encrypt("super-secret");
        assert_ne!(token, "super-secret");
        assert_eq!(cipher.decrypt(&token).unwrap(), "super-secret");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let token = cipher().encrypt("super-secret");
        let other = cipher();
        assert!(matches!(
            other.decrypt(&token),
            Err(KeystoreError::DecryptionFailed)
        ));
    }

    #[test]
    fn invalid_key_is_rejected() {
        assert!(matches!(
            Cipher::new("not-a-key"),
            Err(KeystoreError::InvalidKey)
        ));
    }

    #[test]
    fn reveal_selects_pair_by_testnet_flag() {
        let cipher = cipher();
        let secrets = ConnectionSecrets {
            mainnet: cipher.encrypt_pair(&Credentials {
                api_key: "main-key".to_string(),
                api_secret: "main-secret".to_string(),
            }),
            testnet: Some(cipher.encrypt_pair(&Credentials {
                api_key: "test-key".to_string(),
                api_secret: "test-secret".to_string(),
            })),
        };

        let mainnet = cipher.reveal(&secrets, false).unwrap();
        assert_eq!(mainnet.api_key, "main-key");
        let testnet = cipher.reveal(&secrets, true).unwrap();
        assert_eq!(testnet.api_key, "test-key");
    }

    #[test]
    fn reveal_testnet_without_pair_errors() {
        let cipher = cipher();
        let secrets = ConnectionSecrets {
            mainnet: cipher.encrypt_pair(&Credentials {
                api_key: "main-key".to_string(),
                api_secret: "main-secret".to_string(),
            }),
            testnet: None,
        };
        assert!(matches!(
            cipher.reveal(&secrets, true),
            Err(KeystoreError::MissingTestnetKeys)
        ));
    }

    #[test]
    fn masking_keeps_last_four() {
        assert_eq!(mask_key("abcdefgh"), "****efgh");
        assert_eq!(mask_key("ab"), "****");
    }
}
