//! Per-provider route registration and the HTTP handlers.

// std
use std::time::Instant;
// crates.io
use axum::{
	Router,
	body::to_bytes,
	extract::{RawPathParams, Request},
	http::{StatusCode, header},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::post,
};
// self
use crate::{
	_prelude::*,
	clock::Clock,
	coordinator::{IssuedToken, RevokeCoordinator, RevokeParams, TokenCoordinator},
	gateway::body::{TokenRequestBody, error_payload, success_payload},
	oidc::IdTokenVerifier,
	provider::{ProviderDescriptor, TemplateSource, TokenRequestParams},
	store::Store,
	upstream::{UpstreamFacade, UpstreamHttpClient},
};

const BODY_LIMIT: usize = 1 << 20;

/// One provider wired to its coordinators.
#[derive(Clone, Debug)]
pub struct ProviderEntry {
	/// Provider metadata.
	pub descriptor: Arc<ProviderDescriptor>,
	/// Token worker handle.
	pub tokens: TokenCoordinator,
	/// Revoke worker handle, when the provider participates in RFC 7009.
	pub revoker: Option<RevokeCoordinator>,
}

/// All providers, coordinators spawned and ready for routing.
#[derive(Clone, Debug)]
pub struct Registry {
	entries: Vec<Arc<ProviderEntry>>,
}
impl Registry {
	/// Spawns coordinators for every catalog entry.
	///
	/// Construction order is store-first: the store and transport exist before any
	/// coordinator, and the router is built from the finished registry.
	pub fn spawn(
		catalog: Vec<ProviderDescriptor>,
		store: Store,
		http: UpstreamHttpClient,
		clock: Arc<dyn Clock>,
	) -> Self {
		let facade = Arc::new(UpstreamFacade::new(http.clone()));
		let entries = catalog
			.into_iter()
			.map(|descriptor| {
				let descriptor = Arc::new(descriptor);
				let verifier = descriptor
					.oidc
					.as_ref()
					.map(|config| Arc::new(IdTokenVerifier::new(config, http.as_ref().clone())));
				let tokens = TokenCoordinator::spawn(
					descriptor.clone(),
					store.clone(),
					facade.clone(),
					verifier,
					clock.clone(),
				);
				let revoker = descriptor.revoke.as_ref().map(|_| {
					RevokeCoordinator::spawn(
						descriptor.clone(),
						store.clone(),
						http.as_ref().clone(),
						clock.clone(),
					)
				});

				Arc::new(ProviderEntry { descriptor, tokens, revoker })
			})
			.collect();

		Self { entries }
	}

	/// Returns every wired provider.
	pub fn entries(&self) -> &[Arc<ProviderEntry>] {
		&self.entries
	}

	/// Looks a provider up by name.
	pub fn find(&self, name: &str) -> Option<&Arc<ProviderEntry>> {
		self.entries.iter().find(|entry| entry.descriptor.name == name)
	}
}

/// Builds the axum router with one token route per provider plus revoke routes.
pub fn router(registry: &Registry, clock: Arc<dyn Clock>) -> Router {
	let mut router = Router::new();

	for entry in registry.entries() {
		let token_entry = entry.clone();
		let token_clock = clock.clone();

		router = router.route(
			&entry.descriptor.token_route,
			post(move |path: RawPathParams, request: Request| {
				token_endpoint(token_entry.clone(), token_clock.clone(), path, request)
			}),
		);

		if let Some(revoke) = &entry.descriptor.revoke {
			let revoke_entry = entry.clone();

			router = router.route(
				&revoke.route,
				post(move |request: Request| revoke_endpoint(revoke_entry.clone(), request)),
			);
		}
	}

	router.layer(middleware::from_fn(log_requests))
}

async fn log_requests(request: Request, next: Next) -> Response {
	let method = request.method().clone();
	let path = request.uri().path().to_owned();
	let started = Instant::now();
	let response = next.run(request).await;

	tracing::info!(
		%method,
		path,
		status = response.status().as_u16(),
		elapsed_ms = started.elapsed().as_millis() as u64,
		"handled request",
	);

	response
}

async fn token_endpoint(
	entry: Arc<ProviderEntry>,
	clock: Arc<dyn Clock>,
	path: RawPathParams,
	request: Request,
) -> Response {
	match handle_token(&entry, &path, request).await {
		Ok(token) => json_response(200, success_payload(&token, clock.now())),
		Err(err) => {
			let (status, body) = error_payload(&err);

			json_response(status, body)
		},
	}
}

async fn handle_token(
	entry: &ProviderEntry,
	path: &RawPathParams,
	request: Request,
) -> Result<IssuedToken> {
	let (parts, body) = request.into_parts();
	let bytes = to_bytes(body, BODY_LIMIT)
		.await
		.map_err(|_| Error::invalid_request("request body is too large or unreadable"))?;
	let content_type =
		parts.headers.get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok());
	let mut body = TokenRequestBody::parse(content_type, &bytes)?;
	let authorization =
		parts.headers.get(header::AUTHORIZATION).and_then(|value| value.to_str().ok());

	body.apply_basic_auth(authorization)?;

	let query = parts.uri.query().unwrap_or_default();

	// A misbehaving client may put the grant type in the URL; the query wins.
	if let Some(grant_type) = query_param(query, "grant_type")
		&& !grant_type.is_empty()
	{
		body.grant_type = grant_type;
	}

	let descriptor = &entry.descriptor;
	let template_value = resolve_template_value(descriptor, &body, query, path);
	let forwarded_headers = descriptor
		.quirks
		.forward_headers
		.iter()
		.filter_map(|name| {
			parts
				.headers
				.get(name.as_str())
				.and_then(|value| value.to_str().ok())
				.map(|value| (name.clone(), value.to_owned()))
		})
		.collect();
	let params = TokenRequestParams {
		grant_type: body.grant_type,
		client_id: body.client_id,
		client_secret: body.client_secret,
		refresh_token: body.refresh_token,
		code: body.code,
		redirect_uri: body.redirect_uri,
		code_verifier: body.code_verifier,
		username: body.username,
		password: body.password,
		template_value,
		forwarded_headers,
		raw: body.raw,
	};

	entry.tokens.request(params).await
}

async fn revoke_endpoint(entry: Arc<ProviderEntry>, request: Request) -> Response {
	match handle_revoke(&entry, request).await {
		Ok(outcome) => {
			let content_type =
				outcome.content_type.unwrap_or_else(|| "application/json".to_owned());

			(
				StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::BAD_GATEWAY),
				[(header::CONTENT_TYPE, content_type)],
				outcome.body,
			)
				.into_response()
		},
		Err(err) => {
			let (status, body) = error_payload(&err);

			json_response(status, body)
		},
	}
}

async fn handle_revoke(
	entry: &ProviderEntry,
	request: Request,
) -> Result<crate::coordinator::RevokeOutcome> {
	let Some(revoker) = &entry.revoker else {
		return Err(Error::invalid_request(format!(
			"provider {} does not support revocation",
			entry.descriptor.name,
		)));
	};
	let (parts, body) = request.into_parts();
	let bytes = to_bytes(body, BODY_LIMIT)
		.await
		.map_err(|_| Error::invalid_request("request body is too large or unreadable"))?;
	let mut body = TokenRequestBody::parse(
		parts.headers.get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok()),
		&bytes,
	)?;
	let authorization =
		parts.headers.get(header::AUTHORIZATION).and_then(|value| value.to_str().ok());

	body.apply_basic_auth(authorization)?;

	let headers = parts
		.headers
		.iter()
		.filter_map(|(name, value)| {
			value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
		})
		.collect();
	let params = RevokeParams {
		token: body.raw.get("token").and_then(JsonValue::as_str).unwrap_or_default().to_owned(),
		token_type_hint: body
			.raw
			.get("token_type_hint")
			.and_then(JsonValue::as_str)
			.unwrap_or_default()
			.to_owned(),
		client_id: body.client_id,
		headers,
	};

	revoker.revoke(params).await
}

fn query_param(query: &str, name: &str) -> Option<String> {
	url::form_urlencoded::parse(query.as_bytes())
		.find(|(key, _)| key == name)
		.map(|(_, value)| value.into_owned())
}

fn resolve_template_value(
	descriptor: &ProviderDescriptor,
	body: &TokenRequestBody,
	query: &str,
	path: &RawPathParams,
) -> Option<String> {
	let source = descriptor.template_source.as_ref()?;
	let value = match source {
		TemplateSource::JsonFieldOrQuery { name } => body
			.raw
			.get(name)
			.and_then(JsonValue::as_str)
			.map(ToOwned::to_owned)
			.filter(|value| !value.is_empty())
			.or_else(|| query_param(query, name)),
		TemplateSource::QueryParam { name } => query_param(query, name),
		TemplateSource::PathParam { name } => path
			.iter()
			.find(|(key, _)| *key == name.as_str())
			.map(|(_, value)| value.to_owned()),
	};

	value
		.filter(|value| !value.is_empty())
		.map(|value| {
			if descriptor.quirks.underscore_to_dash { value.replace('_', "-") } else { value }
		})
}

fn json_response(status: u16, body: String) -> Response {
	(
		StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
		[(header::CONTENT_TYPE, "application/json; charset=utf-8")],
		body,
	)
		.into_response()
}
