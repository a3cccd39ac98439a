use hmac::{Hmac, Mac};
use sha2::Sha256;

// Type alias for the HMAC-SHA256 implementation.
type HmacSha256 = Hmac<Sha256>;

/// Creates an HMAC-SHA256 signature for a given query string.
///
/// Derivatives exchanges require all private API calls to be signed over the
/// full query string, timestamp included.
pub fn sign_request(secret: &str, query_string: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(query_string.as_bytes());
    let result = mac.finalize();
    hex::encode(result.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let a = sign_request("secret", "symbol=BTCUSDT&timestamp=1");
        let b = sign_request("secret", "symbol=BTCUSDT&timestamp=1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_depends_on_secret_and_payload() {
        let base = sign_request("secret", "symbol=BTCUSDT");
        assert_ne!(base, sign_request("other", "symbol=BTCUSDT"));
        assert_ne!(base, sign_request("secret", "symbol=ETHUSDT"));
    }
}
