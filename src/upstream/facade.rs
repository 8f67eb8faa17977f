//! Typed facade over the `oauth2` crate covering the four grants the proxy terminates.

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError,
	ResourceOwnerPassword, ResourceOwnerUsername, StandardRevocableToken, StandardTokenResponse,
	TokenResponse, TokenUrl,
	basic::{BasicErrorResponse, BasicTokenIntrospectionResponse, BasicTokenType},
};
use reqwest::Error as ReqwestError;
// self
use crate::{
	_prelude::*,
	error::UpstreamError,
	provider::{AuthStyle, ProviderDescriptor, TokenRequestParams},
	token::{TokenSecret, UpstreamToken},
	upstream::transport::{RequestOptions, ResponseCapture, UpstreamHttpClient},
};

/// Unknown token-response keys, preserved for pass-through.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawFields(pub JsonMap<String, JsonValue>);
impl oauth2::ExtraTokenFields for RawFields {}

type FacadeTokenResponse = StandardTokenResponse<RawFields, BasicTokenType>;
type ConfiguredClient = oauth2::Client<
	BasicErrorResponse,
	FacadeTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	oauth2::basic::BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;
type FacadeRequestTokenError = RequestTokenError<HttpClientError<ReqwestError>, BasicErrorResponse>;

/// Successful upstream call: the normalized token plus the verbatim response body.
#[derive(Clone, Debug)]
pub struct TokenOutcome {
	/// Normalized token with raw pass-through fields.
	pub token: UpstreamToken,
	/// Raw response body text, retained for the code-exchange audit column.
	pub raw_body: String,
}

/// Executes grants against upstream token endpoints.
#[derive(Clone, Debug)]
pub struct UpstreamFacade {
	http: UpstreamHttpClient,
}
impl UpstreamFacade {
	/// Creates a facade over the shared upstream HTTP client.
	pub fn new(http: UpstreamHttpClient) -> Self {
		Self { http }
	}

	fn client_for(
		descriptor: &ProviderDescriptor,
		params: &TokenRequestParams,
	) -> Result<ConfiguredClient, UpstreamError> {
		let token_url = descriptor.token_url.resolve(params.template_value.as_deref())?;
		let mut client: ConfiguredClient =
			oauth2::Client::new(ClientId::new(params.client_id.clone()))
				.set_token_uri(TokenUrl::from_url(token_url));

		if !params.client_secret.is_empty() {
			client = client.set_client_secret(ClientSecret::new(params.client_secret.clone()));
		}
		if descriptor.auth_style == AuthStyle::Body {
			client = client.set_auth_type(AuthType::RequestBody);
		}

		Ok(client)
	}

	fn options_for(descriptor: &ProviderDescriptor, params: &TokenRequestParams) -> RequestOptions {
		RequestOptions {
			json_body: descriptor.quirks.json_token_exchange,
			extra_headers: params.forwarded_headers.clone(),
		}
	}

	/// Exchanges an authorization code, optionally carrying a PKCE verifier.
	pub async fn exchange_code(
		&self,
		descriptor: &ProviderDescriptor,
		params: &TokenRequestParams,
		now: OffsetDateTime,
	) -> Result<TokenOutcome, UpstreamError> {
		let client = Self::client_for(descriptor, params)?;
		let capture = ResponseCapture::default();
		let handle = self.http.handle(Self::options_for(descriptor, params), capture.clone());
		let mut request = client.exchange_code(AuthorizationCode::new(params.code.clone()));

		if !params.code_verifier.is_empty() {
			request = request.set_pkce_verifier(PkceCodeVerifier::new(params.code_verifier.clone()));
		}
		if !params.redirect_uri.is_empty() {
			let redirect = RedirectUrl::new(params.redirect_uri.clone()).map_err(|e| {
				UpstreamError::InvalidEndpoint { reason: format!("redirect_uri: {e}") }
			})?;

			request = request.set_redirect_uri(Cow::Owned(redirect));
		}

		let response = request
			.request_async(&handle)
			.await
			.map_err(|err| map_request_error(err, &capture))?;

		Ok(outcome(response, &capture, now))
	}

	/// Refreshes with a stored refresh token, carrying the stored PKCE verifier forward.
	pub async fn refresh(
		&self,
		descriptor: &ProviderDescriptor,
		params: &TokenRequestParams,
		refresh_token: &str,
		code_verifier: &str,
		now: OffsetDateTime,
	) -> Result<TokenOutcome, UpstreamError> {
		let client = Self::client_for(descriptor, params)?;
		let capture = ResponseCapture::default();
		let handle = self.http.handle(Self::options_for(descriptor, params), capture.clone());
		let refresh_secret = RefreshToken::new(refresh_token.to_owned());
		let mut request = client.exchange_refresh_token(&refresh_secret);

		if !code_verifier.is_empty() {
			request = request.add_extra_param("code_verifier", code_verifier);
		}

		let response = request
			.request_async(&handle)
			.await
			.map_err(|err| map_request_error(err, &capture))?;

		Ok(outcome(response, &capture, now))
	}

	/// Runs the resource-owner password grant.
	pub async fn password(
		&self,
		descriptor: &ProviderDescriptor,
		params: &TokenRequestParams,
		now: OffsetDateTime,
	) -> Result<TokenOutcome, UpstreamError> {
		let client = Self::client_for(descriptor, params)?;
		let capture = ResponseCapture::default();
		let handle = self.http.handle(Self::options_for(descriptor, params), capture.clone());
		let username = ResourceOwnerUsername::new(params.username.clone());
		let password = ResourceOwnerPassword::new(params.password.clone());
		let response = client
			.exchange_password(&username, &password)
			.request_async(&handle)
			.await
			.map_err(|err| map_request_error(err, &capture))?;

		Ok(outcome(response, &capture, now))
	}

	/// Runs the client credentials grant.
	pub async fn client_credentials(
		&self,
		descriptor: &ProviderDescriptor,
		params: &TokenRequestParams,
		now: OffsetDateTime,
	) -> Result<TokenOutcome, UpstreamError> {
		let client = Self::client_for(descriptor, params)?;
		let capture = ResponseCapture::default();
		let handle = self.http.handle(Self::options_for(descriptor, params), capture.clone());
		let response = client
			.exchange_client_credentials()
			.request_async(&handle)
			.await
			.map_err(|err| map_request_error(err, &capture))?;

		Ok(outcome(response, &capture, now))
	}
}

fn outcome(
	response: FacadeTokenResponse,
	capture: &ResponseCapture,
	now: OffsetDateTime,
) -> TokenOutcome {
	let captured = capture.take();
	let raw_body = captured.as_ref().map(|c| c.body_text()).unwrap_or_default();
	let raw = captured
		.and_then(|c| serde_json::from_slice::<JsonMap<String, JsonValue>>(&c.body).ok())
		.unwrap_or_default();
	let token_type = match response.token_type() {
		BasicTokenType::Bearer => "Bearer".to_owned(),
		BasicTokenType::Mac => "MAC".to_owned(),
		BasicTokenType::Extension(value) => value.clone(),
	};
	let expires_at = response
		.expires_in()
		.map(|d| now + Duration::seconds(i64::try_from(d.as_secs()).unwrap_or(i64::MAX)));
	let token = UpstreamToken {
		token_type,
		access_token: TokenSecret::new(response.access_token().secret().clone()),
		refresh_token: TokenSecret::new(
			response.refresh_token().map(|t| t.secret().clone()).unwrap_or_default(),
		),
		expires_at,
		raw,
	};

	TokenOutcome { token, raw_body }
}

fn map_request_error(err: FacadeRequestTokenError, capture: &ResponseCapture) -> UpstreamError {
	let captured = capture.take();
	let status = captured.as_ref().map(|c| c.status);
	let body = captured.map(|c| c.body_text());

	match err {
		RequestTokenError::ServerResponse(response) => {
			let message = match response.error_description() {
				Some(description) => format!("{}: {description}", response.error().as_ref()),
				None => response.error().as_ref().to_owned(),
			};

			UpstreamError::Rejected { message, status, body }
		},
		RequestTokenError::Request(error) => map_transport_error(error),
		RequestTokenError::Parse(source, _body) => UpstreamError::Parse { source, status },
		RequestTokenError::Other(message) => UpstreamError::Transport { message: message.to_string() },
	}
}

fn map_transport_error(err: HttpClientError<ReqwestError>) -> UpstreamError {
	match err {
		HttpClientError::Reqwest(inner) =>
			if inner.is_timeout() {
				UpstreamError::Transport {
					message: "request timed out while calling the token endpoint".into(),
				}
			} else {
				UpstreamError::Transport { message: inner.to_string() }
			},
		HttpClientError::Http(inner) => UpstreamError::Transport { message: inner.to_string() },
		HttpClientError::Io(inner) => UpstreamError::Transport { message: inner.to_string() },
		other => UpstreamError::Transport { message: other.to_string() },
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::provider::ProviderQuirks;

	fn descriptor(auth_style: AuthStyle, quirks: ProviderQuirks) -> ProviderDescriptor {
		ProviderDescriptor::builder("facade-test")
			.token_route("/facade-test/oauth2/token")
			.token_url("https://example.com/oauth2/token")
			.auth_style(auth_style)
			.quirks(quirks)
			.authorization_code()
			.build()
			.expect("descriptor fixture should build")
	}

	#[test]
	fn client_builds_for_both_auth_styles() {
		let params = TokenRequestParams {
			client_id: "client".into(),
			client_secret: "secret".into(),
			..Default::default()
		};

		for style in [AuthStyle::Header, AuthStyle::Body] {
			UpstreamFacade::client_for(&descriptor(style, ProviderQuirks::default()), &params)
				.expect("facade client should build");
		}
	}

	#[test]
	fn options_mirror_provider_quirks() {
		let quirks = ProviderQuirks { json_token_exchange: true, ..Default::default() };
		let params = TokenRequestParams {
			forwarded_headers: vec![("X-Key".into(), "v".into())],
			..Default::default()
		};
		let options = UpstreamFacade::options_for(&descriptor(AuthStyle::Header, quirks), &params);

		assert!(options.json_body);
		assert_eq!(options.extra_headers, vec![("X-Key".to_owned(), "v".to_owned())]);
	}

	#[test]
	fn templated_endpoint_requires_a_value() {
		let descriptor = ProviderDescriptor::builder("templated")
			.token_route("/templated/oauth2/token")
			.token_url("https://{tenant}.example.com/token")
			.template_source(crate::provider::TemplateSource::QueryParam { name: "tenant".into() })
			.authorization_code()
			.build()
			.expect("templated descriptor should build");
		let params = TokenRequestParams { client_id: "client".into(), ..Default::default() };
		let err = UpstreamFacade::client_for(&descriptor, &params)
			.expect_err("missing template value should fail");

		assert!(matches!(err, UpstreamError::InvalidEndpoint { .. }));
	}
}
