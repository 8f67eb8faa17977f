//! Normalized upstream token representation with raw-field pass-through and expiry policy.

// self
use crate::_prelude::*;

/// Minimum remaining lifetime below which a cached token is treated as expired.
///
/// Pinned at 10 seconds; upstreams may round expiry timestamps.
pub const EXPIRY_SKEW: Duration = Duration::seconds(10);

/// Redacted secret wrapper keeping token material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when no secret material is present.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Token obtained from an upstream provider, normalized fields plus the raw response map.
#[derive(Clone)]
pub struct UpstreamToken {
	/// Token type reported upstream, canonicalized to `Bearer` where applicable.
	pub token_type: String,
	/// Access token secret.
	pub access_token: TokenSecret,
	/// Refresh token secret, when the provider rotated or issued one.
	pub refresh_token: TokenSecret,
	/// Absolute expiry derived from `expires_in`, when present.
	pub expires_at: Option<OffsetDateTime>,
	/// Full upstream response body, parsed as JSON, for pass-through to clients.
	pub raw: JsonMap<String, JsonValue>,
}
impl UpstreamToken {
	/// Imputes a missing expiry from a float-seconds `expires` field.
	///
	/// One upstream reports `expires` in seconds instead of the standard `expires_in`;
	/// the value is applied at persist time against the provided instant.
	pub fn impute_expiry(&mut self, now: OffsetDateTime) {
		if self.expires_at.is_some() {
			return;
		}
		if let Some(secs) = self.raw.get("expires").and_then(JsonValue::as_f64)
			&& secs > 0.0
		{
			self.expires_at = Some(now + Duration::seconds_f64(secs));
		}
	}
}
impl Debug for UpstreamToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("UpstreamToken")
			.field("token_type", &self.token_type)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Returns `true` when a token with the provided expiry is still usable at `now`.
///
/// Tokens without a recorded expiry never expire, matching the upstream OAuth libraries
/// the original deployment fed from.
pub fn is_valid_at(expires_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
	match expires_at {
		Some(at) => at - now > EXPIRY_SKEW,
		None => true,
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");
		assert_eq!(secret.expose(), "super-secret");
	}

	#[test]
	fn validity_honors_the_skew_window() {
		let now = datetime!(2025-06-01 12:00 UTC);

		assert!(is_valid_at(Some(now + Duration::seconds(11)), now));
		assert!(!is_valid_at(Some(now + Duration::seconds(10)), now));
		assert!(!is_valid_at(Some(now + Duration::seconds(3)), now));
		assert!(!is_valid_at(Some(now - Duration::seconds(1)), now));
		assert!(is_valid_at(None, now));
	}

	#[test]
	fn float_expires_field_imputes_expiry() {
		let now = datetime!(2025-06-01 12:00 UTC);
		let mut raw = JsonMap::new();

		raw.insert("expires".into(), JsonValue::from(3600.0));

		let mut token = UpstreamToken {
			token_type: "Bearer".into(),
			access_token: TokenSecret::new("a"),
			refresh_token: TokenSecret::new("r"),
			expires_at: None,
			raw,
		};

		token.impute_expiry(now);

		assert_eq!(token.expires_at, Some(now + Duration::seconds(3600)));
	}

	#[test]
	fn explicit_expiry_wins_over_imputation() {
		let now = datetime!(2025-06-01 12:00 UTC);
		let explicit = now + Duration::seconds(60);
		let mut raw = JsonMap::new();

		raw.insert("expires".into(), JsonValue::from(3600.0));

		let mut token = UpstreamToken {
			token_type: "Bearer".into(),
			access_token: TokenSecret::new("a"),
			refresh_token: TokenSecret::new("r"),
			expires_at: Some(explicit),
			raw,
		};

		token.impute_expiry(now);

		assert_eq!(token.expires_at, Some(explicit));
	}
}
