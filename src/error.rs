//! Proxy-level error types shared across the codec, store, coordinators, and gateway.

// self
use crate::_prelude::*;

/// Proxy-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical proxy error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Secret codec failure.
	#[error(transparent)]
	Codec(#[from] CodecError),
	/// Storage-layer failure.
	#[error(transparent)]
	Store(#[from] StoreError),
	/// Upstream token endpoint failure.
	#[error(transparent)]
	Upstream(#[from] UpstreamError),
	/// OIDC id_token verification failure.
	#[error(transparent)]
	Oidc(#[from] OidcError),

	/// Inbound request is malformed or missing required parameters.
	#[error("invalid request: {reason}")]
	InvalidRequest {
		/// Human-readable description of the problem.
		reason: String,
	},
	/// Provider does not enable the requested grant.
	#[error("provider {provider} does not support the {grant} grant")]
	UnsupportedGrant {
		/// Provider name as registered in the catalog.
		provider: String,
		/// Disabled grant label.
		grant: &'static str,
	},
	/// Coordinator worker is gone; the process is shutting down.
	#[error("token coordinator is unavailable")]
	CoordinatorClosed,
}
impl Error {
	/// Shortcut for [`Error::InvalidRequest`].
	pub fn invalid_request(reason: impl Into<String>) -> Self {
		Self::InvalidRequest { reason: reason.into() }
	}
}

/// Failures produced by the secret codec.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CodecError {
	/// Codec key is missing or has the wrong length.
	#[error("codec key is invalid: {reason}")]
	InvalidKey {
		/// What was wrong with the supplied key material.
		reason: String,
	},
	/// Stored envelope failed its HMAC check.
	#[error("invalid MAC for encrypted string")]
	MacMismatch,
	/// Ciphertext length is not a multiple of the AES block size.
	#[error("ciphertext is not a multiple of the block size")]
	CiphertextLength,
	/// Envelope fields are not valid base64.
	#[error("encrypted envelope field is not valid base64")]
	EnvelopeEncoding,
	/// Decrypted plaintext carries invalid PKCS#5 padding.
	#[error("decrypted payload has invalid padding")]
	Padding,
}

/// Failures produced by the token store.
#[derive(Debug, ThisError)]
pub enum StoreError {
	/// No row matched the lookup.
	#[error("oauth token not found")]
	NotFound,
	/// A unique index rejected the write; the caller should re-read and retry once.
	#[error("oauth token row already exists")]
	Conflict,
	/// Backend-level failure for the storage engine.
	#[error("store backend failure: {message}")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// The configured DSN points at an unsupported database.
	#[error("unsupported database scheme in DSN: {scheme}")]
	UnsupportedDsn {
		/// Scheme prefix that was rejected.
		scheme: String,
	},
}
impl From<sqlx::Error> for StoreError {
	fn from(e: sqlx::Error) -> Self {
		match &e {
			sqlx::Error::RowNotFound => Self::NotFound,
			sqlx::Error::Database(db)
				if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
				Self::Conflict,
			_ => Self::Backend { message: e.to_string() },
		}
	}
}

/// Failures surfaced while calling an upstream token endpoint.
#[derive(Debug, ThisError)]
pub enum UpstreamError {
	/// Provider answered with an OAuth error response.
	#[error("token endpoint rejected the request: {message}")]
	Rejected {
		/// Summary derived from the OAuth `error`/`error_description` fields.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Raw response body captured from the wire, for verbatim pass-through.
		body: Option<String>,
	},
	/// Provider returned a body that could not be parsed as a token response.
	#[error("token endpoint returned a malformed response")]
	Parse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error("network error while calling the token endpoint: {message}")]
	Transport {
		/// Transport-specific failure summary.
		message: String,
	},
	/// A token endpoint URL template could not be resolved or parsed.
	#[error("token endpoint URL is invalid: {reason}")]
	InvalidEndpoint {
		/// What was wrong with the resolved URL.
		reason: String,
	},
}

/// Failures raised by the OIDC verifier.
#[derive(Debug, ThisError)]
pub enum OidcError {
	/// Remote key set could not be fetched or decoded. Tolerated during issuance.
	#[error("failed to decode keys: {reason}")]
	DecodeKeys {
		/// Fetch or parse failure summary.
		reason: String,
	},
	/// id_token failed signature or claim validation. Fatal.
	#[error("id_token verification failed: {reason}")]
	Verification {
		/// Validation failure summary.
		reason: String,
	},
}

/// Strips the `oauth2:` prefix some upstream libraries prepend to error strings.
pub fn strip_oauth2_prefix(message: &str) -> &str {
	message.strip_prefix("oauth2:").map(str::trim_start).unwrap_or(message)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn oauth2_prefix_is_stripped() {
		assert_eq!(strip_oauth2_prefix("oauth2: server_error"), "server_error");
		assert_eq!(strip_oauth2_prefix("oauth2:server_error"), "server_error");
		assert_eq!(strip_oauth2_prefix("server_error"), "server_error");
	}

	#[test]
	fn store_error_distinguishes_missing_rows() {
		let err = StoreError::from(sqlx::Error::RowNotFound);

		assert!(matches!(err, StoreError::NotFound));
	}

	#[test]
	fn invalid_request_shortcut_keeps_reason() {
		let err = Error::invalid_request("refresh_token is required");

		assert_eq!(err.to_string(), "invalid request: refresh_token is required");
	}
}
