//! Provider descriptor data structures shared by the coordinators and the gateway.

// self
use crate::{_prelude::*, provider::template::{TemplateSource, UrlTemplate}};

/// OAuth 2.0 grant types accepted by the proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
	/// Authorization Code exchange.
	AuthorizationCode,
	/// Refresh Token grant.
	RefreshToken,
	/// Resource-owner password grant.
	Password,
	/// Client Credentials grant.
	ClientCredentials,
}
impl GrantKind {
	/// Returns the RFC 6749 identifier for the grant type.
	pub fn as_str(self) -> &'static str {
		match self {
			GrantKind::AuthorizationCode => "authorization_code",
			GrantKind::RefreshToken => "refresh_token",
			GrantKind::Password => "password",
			GrantKind::ClientCredentials => "client_credentials",
		}
	}
}
impl Display for GrantKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Where client credentials travel on token endpoint calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStyle {
	/// HTTP Basic authorization header.
	#[default]
	Header,
	/// `client_id`/`client_secret` form body parameters.
	Body,
}

/// Grant capability flags declared by a provider.
///
/// Refresh Token is part of the Authorization Code capability: a provider that exchanges
/// codes also refreshes them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
	/// Authorization Code exchange plus refresh.
	pub authorization_code: bool,
	/// Resource-owner password grant.
	pub password: bool,
	/// Client Credentials grant.
	pub client_credentials: bool,
}
impl Capabilities {
	/// Returns `true` if the provided grant is supported.
	pub fn supports(self, grant: GrantKind) -> bool {
		match grant {
			GrantKind::AuthorizationCode | GrantKind::RefreshToken => self.authorization_code,
			GrantKind::Password => self.password,
			GrantKind::ClientCredentials => self.client_credentials,
		}
	}

	/// Returns `true` when no grant is enabled.
	pub fn is_empty(self) -> bool {
		!self.authorization_code && !self.password && !self.client_credentials
	}
}

/// Provider-specific transport quirks applied by the upstream layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// Token exchange must be sent as a JSON body instead of a form.
	pub json_token_exchange: bool,
	/// Inbound header names copied onto the upstream request (subscription keys).
	pub forward_headers: Vec<String>,
	/// A failed authorization-code refresh falls back to the password grant.
	pub password_fallback: bool,
	/// Underscores in the template value are normalized to dashes.
	pub underscore_to_dash: bool,
}

/// Static OIDC verification material for providers that return an `id_token`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcConfig {
	/// Expected `iss` claim.
	pub issuer: String,
	/// Remote JWKS document location.
	pub jwks_url: Url,
}

/// RFC 7009 revocation wiring for providers that participate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeEndpoint {
	/// Downstream HTTP route served by the proxy.
	pub route: String,
	/// Upstream revocation endpoint.
	pub url: Url,
}

/// Errors raised while constructing or validating descriptors.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum DescriptorError {
	/// Provider name is required.
	#[error("descriptor is missing a provider name")]
	MissingName,
	/// Downstream token route is required.
	#[error("descriptor `{name}` is missing a token route")]
	MissingTokenRoute {
		/// Provider being built.
		name: String,
	},
	/// Upstream token endpoint is required.
	#[error("descriptor `{name}` is missing a token endpoint")]
	MissingTokenEndpoint {
		/// Provider being built.
		name: String,
	},
	/// At least one grant capability must be enabled.
	#[error("descriptor `{name}` must enable at least one grant")]
	NoCapabilities {
		/// Provider being built.
		name: String,
	},
	/// Templated endpoints need a declared value source.
	#[error("descriptor `{name}` uses a URL template but declares no template source")]
	TemplateWithoutSource {
		/// Provider being built.
		name: String,
	},
	/// Password fallback implies the password capability.
	#[error("descriptor `{name}` enables password fallback without the password grant")]
	FallbackWithoutPassword {
		/// Provider being built.
		name: String,
	},
	/// A static catalog URL failed to parse.
	#[error("descriptor URL is invalid: {url}")]
	InvalidUrl {
		/// URL text that failed to parse.
		url: String,
	},
}

/// Immutable upstream variant description consumed by coordinators and the gateway.
#[derive(Clone, Debug)]
pub struct ProviderDescriptor {
	/// Unique provider name; doubles as the `app` column value.
	pub name: String,
	/// Downstream token route served by the proxy, e.g. `/exactonline.nl/api/oauth2/token`.
	pub token_route: String,
	/// Revocation wiring, when the provider participates in RFC 7009.
	pub revoke: Option<RevokeEndpoint>,
	/// Upstream authorization endpoint, kept as catalog metadata.
	pub authorization_url: Option<String>,
	/// Upstream token endpoint, possibly templated.
	pub token_url: UrlTemplate,
	/// Client authentication style for token endpoint calls.
	pub auth_style: AuthStyle,
	/// Supported grants.
	pub capabilities: Capabilities,
	/// Transport quirks.
	pub quirks: ProviderQuirks,
	/// OIDC verification material, when id_tokens should be checked.
	pub oidc: Option<OidcConfig>,
	/// Where the URL-template value comes from on inbound requests.
	pub template_source: Option<TemplateSource>,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided name.
	pub fn builder(name: impl Into<String>) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(name)
	}

	/// Checks whether the descriptor supports a given grant.
	pub fn supports(&self, grant: GrantKind) -> bool {
		self.capabilities.supports(grant)
	}

	/// Returns an [`Error::UnsupportedGrant`] unless the grant is enabled.
	pub fn require(&self, grant: GrantKind) -> Result<()> {
		if self.supports(grant) {
			Ok(())
		} else {
			Err(Error::UnsupportedGrant { provider: self.name.clone(), grant: grant.as_str() })
		}
	}
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug, Default)]
pub struct ProviderDescriptorBuilder {
	name: String,
	token_route: Option<String>,
	revoke: Option<RevokeEndpoint>,
	authorization_url: Option<String>,
	token_url: Option<UrlTemplate>,
	auth_style: AuthStyle,
	capabilities: Capabilities,
	quirks: ProviderQuirks,
	oidc: Option<OidcConfig>,
	template_source: Option<TemplateSource>,
}
impl ProviderDescriptorBuilder {
	fn new(name: impl Into<String>) -> Self {
		Self { name: name.into(), ..Default::default() }
	}

	/// Sets the downstream token route.
	pub fn token_route(mut self, route: impl Into<String>) -> Self {
		self.token_route = Some(route.into());

		self
	}

	/// Sets the upstream authorization endpoint (metadata only).
	pub fn authorization_url(mut self, url: impl Into<String>) -> Self {
		self.authorization_url = Some(url.into());

		self
	}

	/// Sets the upstream token endpoint.
	pub fn token_url(mut self, url: impl Into<String>) -> Self {
		self.token_url = Some(UrlTemplate::new(url));

		self
	}

	/// Wires RFC 7009 revocation.
	pub fn revoke(mut self, route: impl Into<String>, url: Url) -> Self {
		self.revoke = Some(RevokeEndpoint { route: route.into(), url });

		self
	}

	/// Overrides the client authentication style.
	pub fn auth_style(mut self, style: AuthStyle) -> Self {
		self.auth_style = style;

		self
	}

	/// Enables the Authorization Code capability.
	pub fn authorization_code(mut self) -> Self {
		self.capabilities.authorization_code = true;

		self
	}

	/// Enables the password capability.
	pub fn password(mut self) -> Self {
		self.capabilities.password = true;

		self
	}

	/// Enables the Client Credentials capability.
	pub fn client_credentials(mut self) -> Self {
		self.capabilities.client_credentials = true;

		self
	}

	/// Overrides the provider quirks.
	pub fn quirks(mut self, quirks: ProviderQuirks) -> Self {
		self.quirks = quirks;

		self
	}

	/// Configures OIDC id_token verification.
	pub fn oidc(mut self, issuer: impl Into<String>, jwks_url: Url) -> Self {
		self.oidc = Some(OidcConfig { issuer: issuer.into(), jwks_url });

		self
	}

	/// Declares where the URL-template value comes from.
	pub fn template_source(mut self, source: TemplateSource) -> Self {
		self.template_source = Some(source);

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, DescriptorError> {
		if self.name.is_empty() {
			return Err(DescriptorError::MissingName);
		}

		let name = self.name;
		let token_route =
			self.token_route.ok_or_else(|| DescriptorError::MissingTokenRoute { name: name.clone() })?;
		let token_url =
			self.token_url.ok_or_else(|| DescriptorError::MissingTokenEndpoint { name: name.clone() })?;
		let descriptor = ProviderDescriptor {
			name,
			token_route,
			revoke: self.revoke,
			authorization_url: self.authorization_url,
			token_url,
			auth_style: self.auth_style,
			capabilities: self.capabilities,
			quirks: self.quirks,
			oidc: self.oidc,
			template_source: self.template_source,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	fn validate(&self) -> Result<(), DescriptorError> {
		if self.capabilities.is_empty() {
			return Err(DescriptorError::NoCapabilities { name: self.name.clone() });
		}
		if self.token_url.placeholder().is_some() && self.template_source.is_none() {
			return Err(DescriptorError::TemplateWithoutSource { name: self.name.clone() });
		}
		if self.quirks.password_fallback && !self.capabilities.password {
			return Err(DescriptorError::FallbackWithoutPassword { name: self.name.clone() });
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn builder_rejects_empty_capability_sets() {
		let err = ProviderDescriptor::builder("noop")
			.token_route("/noop/oauth2/token")
			.token_url("https://example.com/token")
			.build()
			.expect_err("descriptor without grants should be rejected");

		assert!(matches!(err, DescriptorError::NoCapabilities { .. }));
	}

	#[test]
	fn builder_requires_template_source_for_templated_urls() {
		let err = ProviderDescriptor::builder("templated")
			.token_route("/templated/oauth2/token")
			.token_url("https://{tenant}.example.com/token")
			.authorization_code()
			.build()
			.expect_err("templated URL without a source should be rejected");

		assert!(matches!(err, DescriptorError::TemplateWithoutSource { .. }));
	}

	#[test]
	fn refresh_rides_on_the_authorization_code_capability() {
		let descriptor = ProviderDescriptor::builder("plain")
			.token_route("/plain/oauth2/token")
			.token_url("https://example.com/token")
			.authorization_code()
			.build()
			.expect("plain descriptor should build");

		assert!(descriptor.supports(GrantKind::AuthorizationCode));
		assert!(descriptor.supports(GrantKind::RefreshToken));
		assert!(!descriptor.supports(GrantKind::Password));

		let err = descriptor
			.require(GrantKind::ClientCredentials)
			.expect_err("client_credentials should be refused");

		assert!(matches!(err, Error::UnsupportedGrant { grant: "client_credentials", .. }));
	}
}
