//! The built-in catalog of upstream identity providers.
//!
//! Route suffixes and endpoints follow each service's published OAuth documentation; the
//! downstream route doubles as the provider name in storage.

// self
use crate::{
	_prelude::*,
	provider::{
		descriptor::{AuthStyle, DescriptorError, ProviderDescriptor, ProviderQuirks},
		template::TemplateSource,
	},
};

fn url(raw: &str) -> Result<Url, DescriptorError> {
	Url::parse(raw).map_err(|_| DescriptorError::InvalidUrl { url: raw.to_owned() })
}

fn exact_online(tld: &str) -> Result<ProviderDescriptor, DescriptorError> {
	let name = format!("exactonline.{tld}");
	let base = format!("https://start.exactonline.{tld}");

	ProviderDescriptor::builder(&name)
		.token_route(format!("/{name}/api/oauth2/token"))
		.authorization_url(format!("{base}/api/oauth2/auth"))
		.token_url(format!("{base}/api/oauth2/token"))
		.auth_style(AuthStyle::Body)
		.authorization_code()
		.build()
}

/// Builds the standard provider catalog.
pub fn standard() -> Result<Vec<ProviderDescriptor>, DescriptorError> {
	let mut providers = vec![exact_online("nl")?, exact_online("be")?, exact_online("fr")?];

	providers.push(
		ProviderDescriptor::builder("quickbooks")
			.token_route("/quickbooks/oauth2/v1/tokens/bearer")
			.authorization_url("https://appcenter.intuit.com/connect/oauth2")
			.token_url("https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("netsuite")
			.token_route("/netsuite/oauth2/v1/token")
			.authorization_url("https://system.netsuite.com/app/login/oauth2/authorize.nl")
			.token_url(
				"https://{account_id}.suitetalk.api.netsuite.com/services/rest/auth/oauth2/v1/token",
			)
			.template_source(TemplateSource::JsonFieldOrQuery { name: "company".into() })
			.quirks(ProviderQuirks { underscore_to_dash: true, ..Default::default() })
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("datev")
			.token_route("/datev/oauth2/token")
			.authorization_url("https://login.datev.de/openid/authorize")
			.token_url("https://api.datev.de/token")
			.revoke("/datev/oauth2/revoke", url("https://api.datev.de/revoke")?)
			.oidc("https://login.datev.de/openid", url("https://api.datev.de/openid/keys")?)
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("microsoftonline")
			.token_route("/microsoftonline/oauth2/token")
			.authorization_url("https://login.microsoftonline.com/common/oauth2/v2.0/authorize")
			.token_url("https://login.microsoftonline.com/common/oauth2/v2.0/token")
			.oidc(
				"https://login.microsoftonline.com/common/v2.0",
				url("https://login.microsoftonline.com/common/discovery/v2.0/keys")?,
			)
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("amadeus")
			.token_route("/amadeus/OAuth2/RefreshAccessToken")
			.authorization_url(
				"https://api-release.amadeus-hospitality.com/release/2.0/OAuth2/AccessToken",
			)
			.token_url(
				"https://api-release.amadeus-hospitality.com/release/2.0/OAuth2/RefreshAccessToken",
			)
			.quirks(ProviderQuirks {
				forward_headers: vec!["Ocp-Apim-Subscription-Key".into()],
				..Default::default()
			})
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("apaleo")
			.token_route("/apaleo/oauth/token")
			.authorization_url("https://identity.apaleo.com/connect/authorize")
			.token_url("https://identity.apaleo.com/connect/token")
			.revoke("/apaleo/oauth/revoke", url("https://identity.apaleo.com/connect/revocation")?)
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("adsolut")
			.token_route("/adsolut/oauth2/token")
			.authorization_url("https://login.wolterskluwer.eu/auth/core/connect/authorize")
			.token_url("https://login.wolterskluwer.eu/auth/core/connect/token")
			.auth_style(AuthStyle::Body)
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("apicbase")
			.token_route("/apicbase/oauth/token")
			.token_url("https://app.apicbase.com/oauth/token/")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("asperion")
			.token_route("/asperion/oauth2/token")
			.authorization_url("https://identity.asperion.nl/connect/authorize")
			.token_url("https://identity.asperion.nl/connect/token")
			.auth_style(AuthStyle::Body)
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("bizcuit")
			.token_route("/bizcuit/oauth/token")
			.authorization_url("https://app.bizcuit.nl/auth")
			.token_url("https://app.bizcuit.nl/openapi/oauth/token")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("bookingexperts")
			.token_route("/bookingexperts/oauth2/token")
			.token_url("https://app.bookingexperts.nl/oauth/token")
			.auth_style(AuthStyle::Body)
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("chronogolf")
			.token_route("/chronogolf/oauth2/token")
			.authorization_url("https://www.chronogolf.com/oauth/authorize")
			.token_url("https://www.chronogolf.com/oauth/token")
			.auth_style(AuthStyle::Body)
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("cloudbeds")
			.token_route("/cloudbeds/oauth2/token")
			.authorization_url("https://hotels.cloudbeds.com/api/v1.1/oauth")
			.token_url("https://hotels.cloudbeds.com/api/v1.1/access_token")
			.authorization_code()
			.build()?,
	);
	providers.push(
		// The POS backend rejects form-encoded exchanges.
		ProviderDescriptor::builder("cockpit")
			.token_route("/cockpit/oauth2/token")
			.token_url("https://stage.posms.app.hd.digital/api/oAuth/token")
			.quirks(ProviderQuirks { json_token_exchange: true, ..Default::default() })
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("fortnox")
			.token_route("/fortnox/oauth2/token")
			.authorization_url("https://apps.fortnox.se/oauth-v1/auth")
			.token_url("https://apps.fortnox.se/oauth-v1/token")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("hotel-investor-apps")
			.token_route("/hotel-investor-apps/{subdomain}/oauth2/token")
			.token_url("https://{subdomain}.hotelinvestorapps.com/identity/connect/token")
			.template_source(TemplateSource::PathParam { name: "subdomain".into() })
			.quirks(ProviderQuirks { password_fallback: true, ..Default::default() })
			.authorization_code()
			.password()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("izettle")
			.token_route("/izettle/token")
			.authorization_url("https://oauth.izettle.net/authorize")
			.token_url("https://oauth.izettle.net/token")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("lightspeed")
			.token_route("/lightspeed/oauth2/token")
			.authorization_url("https://api.lightspeedapp.com/resto/oauth2/v1/authorize")
			.token_url("https://api.lightspeedapp.com/resto/oauth2/v1/token")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("lightspeed-k-series")
			.token_route("/lightspeed-k-series/oauth2/token")
			.token_url("https://auth.{region}.lsk.lightspeed.app/oauth/token")
			.template_source(TemplateSource::QueryParam { name: "region".into() })
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("lightspeed-retail")
			.token_route("/lightspeed-retail/oauth2/token")
			.authorization_url("https://cloud.lightspeedapp.com/oauth/authorize.php")
			.token_url("https://cloud.lightspeedapp.com/oauth/access_token.php")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("minox")
			.token_route("/minox/oauth/token")
			.authorization_url("https://app.minox.nl/oauth/authorize")
			.token_url("https://app.minox.nl/oauth/token")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("myob")
			.token_route("/myob/api/oauth2/token")
			.authorization_url("https://secure.myob.com/oauth2/account/authorize")
			.token_url("https://secure.myob.com/oauth2/v1/authorize")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("opentable")
			.token_route("/opentable/oauth2/token")
			.token_url("https://oauth.opentable.com/api/v2/oauth/token")
			.client_credentials()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("procountor")
			.token_route("/procountor/oauth/token")
			.authorization_url("https://api.procountor.com/api/oauth/login")
			.token_url("https://api.procountor.com/api/oauth/token")
			.auth_style(AuthStyle::Body)
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("shiji")
			.token_route("/shiji/oauth2/token")
			.token_url("https://{tenant}.api.abovecloud.io/connect/token")
			.template_source(TemplateSource::QueryParam { name: "tenant".into() })
			.quirks(ProviderQuirks { password_fallback: true, ..Default::default() })
			.authorization_code()
			.password()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("visma-net")
			.token_route("/visma-net/oauth2/token")
			.authorization_url("https://connect.visma.com/connect/authorize")
			.token_url("https://connect.visma.com/connect/token")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("visma-online")
			.token_route("/visma-online/oauth2/token")
			.authorization_url("https://identity.vismaonline.com/connect/authorize")
			.token_url("https://identity.vismaonline.com/connect/token")
			.authorization_code()
			.build()?,
	);
	providers.push(
		ProviderDescriptor::builder("xero")
			.token_route("/xero/connect/token")
			.authorization_url("https://login.xero.com/identity/connect/authorize")
			.token_url("https://identity.xero.com/connect/token")
			.authorization_code()
			.build()?,
	);

	Ok(providers)
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::HashSet;
	// self
	use super::*;
	use crate::provider::descriptor::GrantKind;

	#[test]
	fn catalog_builds_with_unique_names_and_routes() {
		let providers = standard().expect("built-in catalog should validate");

		assert!(providers.len() >= 28);

		let names: HashSet<_> = providers.iter().map(|p| p.name.as_str()).collect();
		let routes: HashSet<_> = providers.iter().map(|p| p.token_route.as_str()).collect();

		assert_eq!(names.len(), providers.len());
		assert_eq!(routes.len(), providers.len());
	}

	#[test]
	fn every_provider_enables_at_least_one_grant() {
		for provider in standard().expect("built-in catalog should validate") {
			assert!(
				!provider.capabilities.is_empty(),
				"{} must enable a grant",
				provider.name,
			);
		}
	}

	#[test]
	fn notable_entries_keep_their_documented_shapes() {
		let providers = standard().expect("built-in catalog should validate");
		let by_name = |name: &str| {
			providers
				.iter()
				.find(|p| p.name == name)
				.unwrap_or_else(|| panic!("{name} should be in the catalog"))
		};

		assert_eq!(by_name("exactonline.nl").token_route, "/exactonline.nl/api/oauth2/token");
		assert_eq!(by_name("quickbooks").token_route, "/quickbooks/oauth2/v1/tokens/bearer");
		assert_eq!(by_name("netsuite").token_url.placeholder(), Some("{account_id}"));
		assert!(by_name("netsuite").quirks.underscore_to_dash);
		assert!(by_name("datev").revoke.is_some());
		assert!(by_name("datev").oidc.is_some());
		assert!(by_name("cockpit").quirks.json_token_exchange);
		assert!(by_name("amadeus").quirks.forward_headers.contains(&"Ocp-Apim-Subscription-Key".to_owned()));
		assert!(by_name("hotel-investor-apps").supports(GrantKind::Password));
		assert!(by_name("hotel-investor-apps").quirks.password_fallback);
		assert!(by_name("opentable").supports(GrantKind::ClientCredentials));
		assert!(!by_name("opentable").supports(GrantKind::RefreshToken));
	}
}
