//! Secret codec: AES-256-CBC envelope encryption for at-rest columns and deterministic
//! lookup hashes for indexed secret queries.
//!
//! The stored form is base64 of a JSON envelope `{iv, value, mac, tag}` so the table stays
//! readable by the PHP ecosystem that shares it. Values that do not parse as an envelope
//! are returned unchanged, which transparently migrates legacy plaintext rows.

// crates.io
use aes::Aes256;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
// self
use crate::{_prelude::*, error::CodecError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Hash label for client secrets.
pub const HASH_LABEL_CLIENT_SECRET: &str = "CS";
/// Hash label for original refresh tokens.
pub const HASH_LABEL_ORIGINAL_REFRESH_TOKEN: &str = "ORT";
/// Hash label for refresh tokens.
pub const HASH_LABEL_REFRESH_TOKEN: &str = "RT";
/// Hash label for access tokens.
pub const HASH_LABEL_ACCESS_TOKEN: &str = "AT";

/// Process-wide AES-256 key shared by encryption and the envelope HMAC.
#[derive(Clone)]
pub struct CodecKey([u8; KEY_LEN]);
impl CodecKey {
	/// Wraps raw key material; the key must be exactly 32 bytes.
	pub fn new(material: impl AsRef<[u8]>) -> Result<Self, CodecError> {
		let view = material.as_ref();
		let bytes: [u8; KEY_LEN] = view.try_into().map_err(|_| CodecError::InvalidKey {
			reason: format!("expected {KEY_LEN} bytes, got {}", view.len()),
		})?;

		Ok(Self(bytes))
	}

	/// Parses a configuration value of the form `base64:<b64>` or raw bytes.
	pub fn from_env_value(raw: &str) -> Result<Self, CodecError> {
		if raw.is_empty() {
			return Err(CodecError::InvalidKey { reason: "key is empty".into() });
		}

		match raw.strip_prefix("base64:") {
			Some(encoded) => {
				let decoded = BASE64.decode(encoded).map_err(|_| CodecError::InvalidKey {
					reason: "base64: prefix present but payload is not base64".into(),
				})?;

				Self::new(decoded)
			},
			None => Self::new(raw.as_bytes()),
		}
	}
}
impl Debug for CodecKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("CodecKey").field(&"<redacted>").finish()
	}
}

#[derive(Serialize, Deserialize)]
struct Envelope {
	iv: String,
	value: String,
	mac: String,
	#[serde(default)]
	tag: String,
}

#[derive(Deserialize)]
struct EnvelopeView {
	iv: Option<String>,
	value: Option<String>,
	mac: Option<String>,
}

/// Encrypts and decrypts opaque strings with a process-wide key.
#[derive(Clone)]
pub struct SecretCodec {
	key: CodecKey,
}
impl SecretCodec {
	/// Creates a codec around the provided key.
	pub fn new(key: CodecKey) -> Self {
		Self { key }
	}

	/// Encrypts a plaintext string into the stored envelope form.
	///
	/// Empty input stays empty so NULL-ish columns keep matching on equality.
	pub fn encrypt(&self, plain: &str) -> String {
		if plain.is_empty() {
			return String::new();
		}

		let mut iv = [0_u8; IV_LEN];

		rand::rng().fill_bytes(&mut iv);

		self.encrypt_with_iv(plain, &iv)
	}

	fn encrypt_with_iv(&self, plain: &str, iv: &[u8; IV_LEN]) -> String {
		let ciphertext = Aes256CbcEnc::new(&self.key.0.into(), iv.into())
			.encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
		let iv_b64 = BASE64.encode(iv);
		let value_b64 = BASE64.encode(&ciphertext);
		let mac = self.envelope_mac(&iv_b64, &value_b64);
		let envelope = Envelope { iv: iv_b64, value: value_b64, mac, tag: String::new() };
		let json = serde_json::to_vec(&envelope)
			.expect("envelope serialization cannot fail for plain string fields");

		BASE64.encode(json)
	}

	/// Decrypts a stored value.
	///
	/// Anything that is not a well-formed envelope is returned unchanged; a well-formed
	/// envelope with a bad MAC or ciphertext is a hard error.
	pub fn decrypt(&self, stored: &str) -> Result<String, CodecError> {
		if stored.is_empty() {
			return Ok(String::new());
		}

		let Ok(decoded) = BASE64.decode(stored) else {
			return Ok(stored.to_owned());
		};
		let Ok(view) = serde_json::from_slice::<EnvelopeView>(&decoded) else {
			return Ok(stored.to_owned());
		};
		let (Some(iv_b64), Some(value_b64), Some(mac)) = (view.iv, view.value, view.mac) else {
			return Ok(stored.to_owned());
		};

		if iv_b64.is_empty() || value_b64.is_empty() || mac.is_empty() {
			return Ok(stored.to_owned());
		}

		let expected = self.envelope_mac(&iv_b64, &value_b64);
		let matches: bool = expected.as_bytes().ct_eq(mac.as_bytes()).into();

		if !matches {
			return Err(CodecError::MacMismatch);
		}

		let iv = BASE64.decode(&iv_b64).map_err(|_| CodecError::EnvelopeEncoding)?;
		let ciphertext = BASE64.decode(&value_b64).map_err(|_| CodecError::EnvelopeEncoding)?;

		if iv.len() != IV_LEN || ciphertext.len() % BLOCK_LEN != 0 || ciphertext.is_empty() {
			return Err(CodecError::CiphertextLength);
		}

		let plain = Aes256CbcDec::new_from_slices(&self.key.0, &iv)
			.map_err(|_| CodecError::CiphertextLength)?
			.decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
			.map_err(|_| CodecError::Padding)?;

		String::from_utf8(plain).map_err(|_| CodecError::Padding)
	}

	fn envelope_mac(&self, iv_b64: &str, value_b64: &str) -> String {
		let mut mac = HmacSha256::new_from_slice(&self.key.0)
			.expect("HMAC accepts keys of any length");

		mac.update(iv_b64.as_bytes());
		mac.update(value_b64.as_bytes());

		hex::encode(mac.finalize().into_bytes())
	}
}
impl Debug for SecretCodec {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SecretCodec").finish_non_exhaustive()
	}
}

/// Deterministic lookup hash for a secret column.
///
/// Empty values hash to the empty string so unset secrets never collide on SELECT.
pub fn lookup_hash(label: &str, client_id: &str, value: &str) -> String {
	if value.is_empty() {
		return String::new();
	}

	let digest = Sha256::digest(format!("{label}|{client_id}|{value}"));

	hex::encode(digest)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn codec() -> SecretCodec {
		SecretCodec::new(CodecKey::new([7_u8; KEY_LEN]).expect("fixture key should be 32 bytes"))
	}

	#[test]
	fn encrypt_decrypt_round_trip() {
		let codec = codec();

		for plain in ["", "a", "sixteen bytes!!!", "refresh-token-with-unicode-é-✓"] {
			let stored = codec.encrypt(plain);
			let recovered =
				codec.decrypt(&stored).expect("round trip decryption should succeed");

			assert_eq!(recovered, plain);

			if !plain.is_empty() {
				assert_ne!(stored, plain);
			}
		}
	}

	#[test]
	fn fresh_iv_per_encryption() {
		let codec = codec();

		assert_ne!(codec.encrypt("same plaintext"), codec.encrypt("same plaintext"));
	}

	#[test]
	fn legacy_plaintext_passes_through() {
		let codec = codec();

		assert_eq!(codec.decrypt("plain-old-token").expect("passthrough"), "plain-old-token");
		// Valid base64 but not a JSON envelope.
		assert_eq!(codec.decrypt("aGVsbG8=").expect("passthrough"), "aGVsbG8=");
		// Valid base64 JSON missing envelope fields.
		let partial = BASE64.encode(br#"{"iv":"only"}"#);

		assert_eq!(codec.decrypt(&partial).expect("passthrough"), partial);
	}

	#[test]
	fn tampered_mac_is_fatal() {
		let codec = codec();
		let stored = codec.encrypt("secret");
		let decoded = BASE64.decode(&stored).expect("stored form should be base64");
		let mut envelope: Envelope =
			serde_json::from_slice(&decoded).expect("stored form should be an envelope");

		envelope.mac = "00".repeat(32);

		let tampered =
			BASE64.encode(serde_json::to_vec(&envelope).expect("envelope should serialize"));

		assert_eq!(codec.decrypt(&tampered), Err(CodecError::MacMismatch));
	}

	#[test]
	fn truncated_ciphertext_is_fatal() {
		let codec = codec();
		let stored = codec.encrypt("secret");
		let decoded = BASE64.decode(&stored).expect("stored form should be base64");
		let mut envelope: Envelope =
			serde_json::from_slice(&decoded).expect("stored form should be an envelope");
		let mut raw = BASE64.decode(&envelope.value).expect("value should be base64");

		raw.truncate(raw.len() - 1);
		envelope.value = BASE64.encode(&raw);
		envelope.mac = codec.envelope_mac(&envelope.iv, &envelope.value);

		let tampered =
			BASE64.encode(serde_json::to_vec(&envelope).expect("envelope should serialize"));

		assert_eq!(codec.decrypt(&tampered), Err(CodecError::CiphertextLength));
	}

	#[test]
	fn lookup_hash_is_deterministic_and_empty_safe() {
		assert_eq!(lookup_hash(HASH_LABEL_REFRESH_TOKEN, "client", ""), "");

		let first = lookup_hash(HASH_LABEL_REFRESH_TOKEN, "client", "token");
		let second = lookup_hash(HASH_LABEL_REFRESH_TOKEN, "client", "token");

		assert_eq!(first, second);
		assert_eq!(first.len(), 64);
		assert_ne!(first, lookup_hash(HASH_LABEL_ACCESS_TOKEN, "client", "token"));
		assert_ne!(first, lookup_hash(HASH_LABEL_REFRESH_TOKEN, "other", "token"));
	}

	#[test]
	fn env_key_accepts_base64_and_raw_forms() {
		let raw = "0123456789abcdef0123456789abcdef";

		CodecKey::from_env_value(raw).expect("raw 32-byte key should parse");

		let encoded = format!("base64:{}", BASE64.encode(raw));

		CodecKey::from_env_value(&encoded).expect("base64 key should parse");
		assert!(CodecKey::from_env_value("").is_err());
		assert!(CodecKey::from_env_value("short").is_err());
	}
}
