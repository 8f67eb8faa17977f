//! OIDC id_token verification against a provider's remote JWKS.
//!
//! Verification is best-effort on the key side: a keyset that cannot be fetched or
//! decoded must not block token issuance, so that failure mode is carved out as
//! [`OidcError::DecodeKeys`]. Signature and claim failures stay fatal.

// crates.io
use jsonwebtoken::{
	Algorithm, DecodingKey, Validation, decode, decode_header,
	jwk::{AlgorithmParameters, Jwk, JwkSet},
};
// self
use crate::{_prelude::*, error::OidcError, provider::OidcConfig};

/// Verifies RS256-signed id_tokens for one provider.
pub struct IdTokenVerifier {
	issuer: String,
	jwks_url: Url,
	http: reqwest::Client,
	keys: RwLock<Option<JwkSet>>,
}
impl IdTokenVerifier {
	/// Creates a verifier for the provider's static OIDC material.
	pub fn new(config: &OidcConfig, http: reqwest::Client) -> Self {
		Self {
			issuer: config.issuer.clone(),
			jwks_url: config.jwks_url.clone(),
			http,
			keys: RwLock::new(None),
		}
	}

	/// Verifies an id_token signature and claims against `aud == client_id`.
	pub async fn verify(&self, id_token: &str, client_id: &str) -> Result<(), OidcError> {
		let header = decode_header(id_token)
			.map_err(|e| OidcError::Verification { reason: format!("malformed header: {e}") })?;

		if header.alg != Algorithm::RS256 {
			return Err(OidcError::Verification {
				reason: format!("unsupported algorithm {:?}", header.alg),
			});
		}

		let jwk = match self.find_key(header.kid.as_deref(), false).await? {
			Some(jwk) => jwk,
			// The advertised key set may have rotated since it was cached.
			None => self
				.find_key(header.kid.as_deref(), true)
				.await?
				.ok_or_else(|| OidcError::Verification { reason: "unknown key id".into() })?,
		};
		let key = DecodingKey::from_jwk(&jwk)
			.map_err(|e| OidcError::Verification { reason: format!("unusable key: {e}") })?;
		let mut validation = Validation::new(Algorithm::RS256);

		validation.set_audience(&[client_id]);
		validation.set_issuer(&[&self.issuer]);

		decode::<JsonValue>(id_token, &key, &validation)
			.map_err(|e| OidcError::Verification { reason: e.to_string() })?;

		Ok(())
	}

	async fn find_key(&self, kid: Option<&str>, refetch: bool) -> Result<Option<Jwk>, OidcError> {
		let cached = if refetch { None } else { self.keys.read().clone() };
		let keyset = match cached {
			Some(keyset) => keyset,
			None => {
				let keyset = self.fetch_keys().await?;

				*self.keys.write() = Some(keyset.clone());

				keyset
			},
		};
		let jwk = match kid {
			Some(kid) => keyset.find(kid).cloned(),
			None => keyset
				.keys
				.iter()
				.find(|jwk| matches!(jwk.algorithm, AlgorithmParameters::RSA(_)))
				.cloned(),
		};

		Ok(jwk)
	}

	async fn fetch_keys(&self) -> Result<JwkSet, OidcError> {
		let response = self
			.http
			.get(self.jwks_url.clone())
			.send()
			.await
			.map_err(|e| OidcError::DecodeKeys { reason: e.to_string() })?
			.error_for_status()
			.map_err(|e| OidcError::DecodeKeys { reason: e.to_string() })?;

		response.json::<JwkSet>().await.map_err(|e| OidcError::DecodeKeys { reason: e.to_string() })
	}
}
impl Debug for IdTokenVerifier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdTokenVerifier")
			.field("issuer", &self.issuer)
			.field("jwks_url", &self.jwks_url.as_str())
			.finish_non_exhaustive()
	}
}
