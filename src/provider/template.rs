//! URL templating for providers whose token endpoints embed a tenant-specific value.
//!
//! A handful of upstreams address their token endpoints per customer: NetSuite by account
//! id, Hotel Investor Apps by subdomain, Lightspeed K-Series by region, Shiji by tenant.
//! One substitution engine serves all of them.

// self
use crate::{_prelude::*, error::UpstreamError};

const PLACEHOLDERS: [&str; 4] = ["{subdomain}", "{tenant}", "{region}", "{account_id}"];

/// Where the template value is read from on an inbound request.
///
/// Precedence when several carriers are present: JSON body field first, then URL query
/// parameter, then named path parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSource {
	/// A JSON body field, falling back to a query parameter of the same name.
	JsonFieldOrQuery {
		/// Field/parameter name, e.g. `company`.
		name: String,
	},
	/// A URL query parameter.
	QueryParam {
		/// Parameter name.
		name: String,
	},
	/// A named path parameter captured by the route.
	PathParam {
		/// Parameter name, e.g. `subdomain`.
		name: String,
	},
}

/// Token endpoint URL that may carry one placeholder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlTemplate(String);
impl UrlTemplate {
	/// Wraps a URL string that may contain a `{subdomain}`/`{tenant}`/`{region}`/
	/// `{account_id}` placeholder.
	pub fn new(template: impl Into<String>) -> Self {
		Self(template.into())
	}

	/// Returns the placeholder present in the template, if any.
	pub fn placeholder(&self) -> Option<&'static str> {
		PLACEHOLDERS.iter().copied().find(|candidate| self.0.contains(candidate))
	}

	/// Substitutes the placeholder and parses the result.
	///
	/// Templates without a placeholder ignore `value`; templates with one require a
	/// non-empty value.
	pub fn resolve(&self, value: Option<&str>) -> Result<Url, UpstreamError> {
		let resolved = match self.placeholder() {
			None => self.0.clone(),
			Some(placeholder) => {
				let value = value.filter(|view| !view.is_empty()).ok_or_else(|| {
					UpstreamError::InvalidEndpoint {
						reason: format!("no value supplied for {placeholder}"),
					}
				})?;

				self.0.replace(placeholder, value)
			},
		};

		Url::parse(&resolved)
			.map_err(|e| UpstreamError::InvalidEndpoint { reason: format!("{resolved}: {e}") })
	}

	/// Returns the raw template text.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
