//! Inbound body parsing and outbound response shaping for the token endpoints.
//!
//! Downstream clients speak both form-encoded and JSON bodies, sometimes with stray
//! extensions; parsing keeps every unknown key in a raw map so providers that read them
//! (NetSuite's `company`) still see them, and responses merge the upstream's raw JSON
//! back under the normalized fields.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
// self
use crate::{
	_prelude::*,
	coordinator::IssuedToken,
	error::{StoreError, UpstreamError, strip_oauth2_prefix},
};

const KNOWN_KEYS: [&str; 9] = [
	"grant_type",
	"client_id",
	"client_secret",
	"refresh_token",
	"code",
	"redirect_uri",
	"code_verifier",
	"username",
	"password",
];

/// Parsed token request body, known fields split out and unknown keys preserved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TokenRequestBody {
	/// `grant_type` field.
	pub grant_type: String,
	/// `client_id` field.
	pub client_id: String,
	/// `client_secret` field.
	pub client_secret: String,
	/// `refresh_token` field.
	pub refresh_token: String,
	/// `code` field.
	pub code: String,
	/// `redirect_uri` field.
	pub redirect_uri: String,
	/// `code_verifier` field.
	pub code_verifier: String,
	/// `username` field.
	pub username: String,
	/// `password` field.
	pub password: String,
	/// Every other key, verbatim.
	pub raw: JsonMap<String, JsonValue>,
}
impl TokenRequestBody {
	/// Parses a request body according to its `Content-Type`.
	///
	/// Form-encoded, `text/plain`, and missing content types parse as a form; anything
	/// else parses as JSON.
	pub fn parse(content_type: Option<&str>, bytes: &[u8]) -> Result<Self> {
		if parses_as_form(content_type) {
			Ok(Self::parse_form(bytes))
		} else {
			Self::parse_json(bytes)
		}
	}

	fn parse_form(bytes: &[u8]) -> Self {
		let mut body = Self::default();

		for (key, value) in url::form_urlencoded::parse(bytes) {
			let value = value.into_owned();

			if !body.set_known(&key, &value) {
				body.raw.insert(key.into_owned(), JsonValue::String(value));
			}
		}

		body
	}

	fn parse_json(bytes: &[u8]) -> Result<Self> {
		if bytes.is_empty() {
			return Ok(Self::default());
		}

		let mut deserializer = serde_json::Deserializer::from_slice(bytes);
		let map: JsonMap<String, JsonValue> = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|e| Error::invalid_request(format!("malformed JSON body: {e}")))?;
		let mut body = Self::default();

		for (key, value) in map {
			if KNOWN_KEYS.contains(&key.as_str()) {
				let Some(text) = value.as_str() else {
					return Err(Error::invalid_request(format!("{key} must be a string")));
				};

				body.set_known(&key, text);
			} else {
				body.raw.insert(key, value);
			}
		}

		Ok(body)
	}

	fn set_known(&mut self, key: &str, value: &str) -> bool {
		let slot = match key {
			"grant_type" => &mut self.grant_type,
			"client_id" => &mut self.client_id,
			"client_secret" => &mut self.client_secret,
			"refresh_token" => &mut self.refresh_token,
			"code" => &mut self.code,
			"redirect_uri" => &mut self.redirect_uri,
			"code_verifier" => &mut self.code_verifier,
			"username" => &mut self.username,
			"password" => &mut self.password,
			_ => return false,
		};

		*slot = value.to_owned();

		true
	}

	/// Applies an `Authorization: Basic` header, overriding body credentials.
	///
	/// Both halves are percent-decoded; some clients URL-encode the secret.
	pub fn apply_basic_auth(&mut self, header: Option<&str>) -> Result<()> {
		let Some(header) = header else {
			return Ok(());
		};
		let Some(encoded) = header.strip_prefix("Basic ").or_else(|| header.strip_prefix("basic "))
		else {
			return Ok(());
		};
		let decoded = BASE64
			.decode(encoded.trim())
			.map_err(|_| Error::invalid_request("Basic authorization header is not base64"))?;
		let decoded = String::from_utf8(decoded)
			.map_err(|_| Error::invalid_request("Basic authorization header is not UTF-8"))?;
		let Some((client_id, client_secret)) = decoded.split_once(':') else {
			return Err(Error::invalid_request("Basic authorization header has no separator"));
		};

		self.client_id = urlencoding::decode(client_id)
			.map_err(|_| Error::invalid_request("client_id is not percent-decodable"))?
			.into_owned();
		self.client_secret = urlencoding::decode(client_secret)
			.map_err(|_| Error::invalid_request("client_secret is not percent-decodable"))?
			.into_owned();

		Ok(())
	}
}

fn parses_as_form(content_type: Option<&str>) -> bool {
	match content_type {
		None => true,
		Some(value) => {
			let value = value.trim();

			value.is_empty()
				|| value.starts_with("application/x-www-form-urlencoded")
				|| value.starts_with("text/plain")
		},
	}
}

/// RFC 6749 §5.2 error body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error kind, e.g. `invalid_request`.
	pub error: String,
	/// Human-readable description.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_description: Option<String>,
	/// Optional documentation URI.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_uri: Option<String>,
}

/// Maps a proxy error onto an HTTP status and response body.
///
/// Upstream error payloads that already conform to RFC 6749 §5.2 pass through verbatim;
/// everything else becomes `invalid_request` with the `oauth2:` prefix stripped.
pub fn error_payload(err: &Error) -> (u16, String) {
	if let Error::Upstream(UpstreamError::Rejected { body: Some(body), .. }) = err
		&& serde_json::from_str::<JsonValue>(body)
			.ok()
			.and_then(|value| value.get("error").map(JsonValue::is_string))
			.unwrap_or(false)
	{
		return (400, body.clone());
	}

	let status = match err {
		Error::Store(StoreError::Conflict) => 500,
		Error::Store(StoreError::Backend { .. }) => 500,
		Error::CoordinatorClosed => 500,
		_ => 400,
	};
	let response = ErrorResponse {
		error: "invalid_request".into(),
		error_description: Some(strip_oauth2_prefix(&err.to_string()).to_owned()),
		error_uri: None,
	};

	(status, serde_json::to_string(&response).unwrap_or_else(|_| "{}".into()))
}

/// Shapes the success body: raw upstream JSON merged under the normalized fields, with
/// `expires_in` recomputed from the stored expiry.
pub fn success_payload(token: &IssuedToken, now: OffsetDateTime) -> String {
	let mut map = token.raw.clone();

	map.insert("token_type".into(), JsonValue::String(token.token_type.clone()));
	map.insert("access_token".into(), JsonValue::String(token.access_token.clone()));
	map.insert("refresh_token".into(), JsonValue::String(token.refresh_token.clone()));

	let expires_in = token.expires_at.map(|at| (at - now).whole_seconds()).unwrap_or_default();

	map.insert("expires_in".into(), JsonValue::from(expires_in));

	serde_json::to_string(&map).unwrap_or_else(|_| "{}".into())
}
