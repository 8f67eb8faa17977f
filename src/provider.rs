//! Provider catalog: descriptors (data), URL templating, and normalized request parameters.
//!
//! `descriptor` models an upstream variant as validated metadata—routes, endpoints, client
//! auth style, capability flags, and quirks—so grant execution stays generic. `catalog`
//! enumerates the supported upstream services. `template` centralizes the handful of
//! providers whose token endpoints embed a tenant-specific value.

pub mod catalog;
pub mod descriptor;
pub mod template;

pub use descriptor::*;
pub use template::*;

// self
use crate::_prelude::*;

/// Normalized parameter record handed from the gateway to the coordinators.
///
/// Every field mirrors an inbound form/JSON parameter after Basic-auth overrides and
/// percent-decoding. `raw` preserves unknown keys for providers that read them.
#[derive(Clone, Default)]
pub struct TokenRequestParams {
	/// Requested grant type, already query-overridden when applicable.
	pub grant_type: String,
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: String,
	/// Refresh token supplied by the caller.
	pub refresh_token: String,
	/// Authorization code for the exchange branch.
	pub code: String,
	/// Redirect URI forwarded on code exchanges.
	pub redirect_uri: String,
	/// PKCE code verifier.
	pub code_verifier: String,
	/// Resource-owner username for the password grant.
	pub username: String,
	/// Resource-owner password for the password grant.
	pub password: String,
	/// Resolved URL-template value (tenant, subdomain, region, or account id).
	pub template_value: Option<String>,
	/// Header values the provider wants forwarded upstream, in catalog order.
	pub forwarded_headers: Vec<(String, String)>,
	/// Unrecognized body keys, preserved verbatim.
	pub raw: JsonMap<String, JsonValue>,
}
impl Debug for TokenRequestParams {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRequestParams")
			.field("grant_type", &self.grant_type)
			.field("client_id", &self.client_id)
			.field("client_secret", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("code", &"<redacted>")
			.field("redirect_uri", &self.redirect_uri)
			.field("username", &self.username)
			.field("template_value", &self.template_value)
			.finish_non_exhaustive()
	}
}
