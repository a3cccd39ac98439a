use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("ENCRYPTION_KEY is not a valid Fernet key")]
    InvalidKey,

    #[error("Failed to decrypt credential material")]
    DecryptionFailed,

    #[error("Connection is flagged testnet but stores no testnet key pair")]
    MissingTestnetKeys,
}
