//! Encrypted configuration values.
//!
//! Any string value in the config file may be written as
//! `enc:<base64(nonce || ciphertext)>`; it is decrypted at load time with
//! AES-256-GCM under the master key taken from the `MUNIND_MASTER_KEY`
//! environment variable (base64, 32 bytes). Plain values pass through
//! untouched, so encryption is strictly opt-in per value.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use thiserror::Error;

/// Marker prefix for ciphertext values.
pub const ENC_PREFIX: &str = "enc:";
/// Environment variable carrying the base64 master key.
pub const MASTER_KEY_ENV: &str = "MUNIND_MASTER_KEY";

/// Errors while decrypting config values.
#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("config contains enc: values but {MASTER_KEY_ENV} is not set")]
    MissingMasterKey,
    #[error("{MASTER_KEY_ENV} is not base64 or not 32 bytes")]
    BadMasterKey,
    #[error("ciphertext value is not valid base64")]
    BadCiphertextEncoding,
    #[error("ciphertext value is truncated")]
    TruncatedCiphertext,
    #[error("decryption failed (wrong key or corrupted value)")]
    DecryptFailed,
    #[error("decrypted value is not UTF-8")]
    NotUtf8,
}

fn master_key() -> Result<LessSafeKey, SecretsError> {
    let encoded = std::env::var(MASTER_KEY_ENV).map_err(|_| SecretsError::MissingMasterKey)?;
    let bytes = B64.decode(encoded.trim()).map_err(|_| SecretsError::BadMasterKey)?;
    let unbound = UnboundKey::new(&AES_256_GCM, &bytes).map_err(|_| SecretsError::BadMasterKey)?;
    Ok(LessSafeKey::new(unbound))
}

/// Decrypt a single `enc:` value. The payload layout is
/// `nonce (12 bytes) || ciphertext+tag`.
pub fn decrypt_value(value: &str) -> Result<String, SecretsError> {
    let payload = value.strip_prefix(ENC_PREFIX).unwrap_or(value);
    let decoded = B64
        .decode(payload)
        .map_err(|_| SecretsError::BadCiphertextEncoding)?;
    if decoded.len() <= NONCE_LEN {
        return Err(SecretsError::TruncatedCiphertext);
    }

    let key = master_key()?;
    let (nonce_bytes, ciphertext) = decoded.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| SecretsError::TruncatedCiphertext)?;

    let mut buf = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut buf)
        .map_err(|_| SecretsError::DecryptFailed)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| SecretsError::NotUtf8)
}

/// Walk a parsed TOML tree and decrypt every `enc:` string in place.
pub fn decrypt_tree(value: &mut toml::Value) -> Result<(), SecretsError> {
    match value {
        toml::Value::String(s) if s.starts_with(ENC_PREFIX) => {
            *s = decrypt_value(s)?;
        }
        toml::Value::Array(items) => {
            for item in items {
                decrypt_tree(item)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                decrypt_tree(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::{SecureRandom, SystemRandom};

    fn encrypt_for_test(key_b64: &str, plaintext: &str) -> String {
        let bytes = B64.decode(key_b64).unwrap();
        let key = LessSafeKey::new(UnboundKey::new(&AES_256_GCM, &bytes).unwrap());
        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new().fill(&mut nonce_bytes).unwrap();
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        let mut buf = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut buf).unwrap();
        let mut payload = nonce_bytes.to_vec();
        payload.extend_from_slice(&buf);
        format!("{}{}", ENC_PREFIX, B64.encode(payload))
    }

    // Env-var tests share process state; serialize them.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn round_trip_through_tree() {
        let _guard = ENV_LOCK.lock().unwrap();
        let key_b64 = B64.encode([7u8; 32]);
        std::env::set_var(MASTER_KEY_ENV, &key_b64);

        let ciphertext = encrypt_for_test(&key_b64, "hunter2");
        let mut tree: toml::Value =
            toml::from_str(&format!("[links]\npassword = \"{}\"", ciphertext)).unwrap();
        decrypt_tree(&mut tree).unwrap();
        assert_eq!(
            tree["links"]["password"].as_str(),
            Some("hunter2")
        );

        std::env::remove_var(MASTER_KEY_ENV);
    }

    #[test]
    fn plain_values_untouched() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut tree: toml::Value = toml::from_str("a = \"plain\"\nb = 3").unwrap();
        decrypt_tree(&mut tree).unwrap();
        assert_eq!(tree["a"].as_str(), Some("plain"));
    }

    #[test]
    fn missing_key_is_reported() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(MASTER_KEY_ENV);
        let mut tree: toml::Value = toml::from_str("a = \"enc:AAAA\"").unwrap();
        assert!(decrypt_tree(&mut tree).is_err());
    }
}
