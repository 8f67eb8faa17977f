//! Transport primitives for upstream token calls.
//!
//! Every outbound request runs through an [`UpstreamHandle`] that records the raw
//! response into a [`ResponseCapture`] slot before the `oauth2` crate parses it. The
//! handle also applies the two provider transforms that cannot be expressed as form
//! parameters: rewriting the form body to JSON for upstreams that reject form-encoded
//! exchanges, and injecting forwarded subscription-key headers.

// std
use std::{future::Future, pin::Pin, time::Duration as StdDuration};
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::{
	Client as ReqwestClient, Error as ReqwestError,
	header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue},
};
// self
use crate::{_prelude::*, error::UpstreamError};

const UPSTREAM_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Raw response recorded from the most recent upstream round trip.
#[derive(Clone, Debug)]
pub struct CapturedResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response body bytes, verbatim.
	pub body: Vec<u8>,
}
impl CapturedResponse {
	/// Returns the body as lossily-decoded text.
	pub fn body_text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

/// Thread-safe slot sharing the captured response between transport and error mapping.
///
/// A fresh slot is created per token request; the handle clears it before dispatching so
/// stale captures never leak across retries.
#[derive(Clone, Debug, Default)]
pub struct ResponseCapture(Arc<Mutex<Option<CapturedResponse>>>);
impl ResponseCapture {
	/// Stores the capture for the current request.
	pub fn store(&self, captured: CapturedResponse) {
		*self.0.lock() = Some(captured);
	}

	/// Returns the capture, if any, consuming it from the slot.
	pub fn take(&self) -> Option<CapturedResponse> {
		self.0.lock().take()
	}

	/// Returns a clone of the capture without consuming it.
	pub fn peek(&self) -> Option<CapturedResponse> {
		self.0.lock().clone()
	}
}

/// Per-request transforms derived from provider quirks.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
	/// Rewrite the form body into a JSON object before dispatch.
	pub json_body: bool,
	/// Extra headers copied onto the upstream request.
	pub extra_headers: Vec<(String, String)>,
}

/// Shared reqwest wrapper with the proxy's upstream timeouts baked in.
///
/// Token requests never follow redirects; token endpoints answer directly.
#[derive(Clone, Debug)]
pub struct UpstreamHttpClient(ReqwestClient);
impl UpstreamHttpClient {
	/// Builds the production client: 5 s connect timeout, 5 s overall deadline.
	pub fn new() -> Result<Self, UpstreamError> {
		let client = ReqwestClient::builder()
			.connect_timeout(UPSTREAM_TIMEOUT)
			.timeout(UPSTREAM_TIMEOUT)
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.map_err(|e| UpstreamError::Transport { message: e.to_string() })?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest client; used by tests that relax TLS checks.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a request handle that records outcomes into `capture`.
	pub fn handle(&self, options: RequestOptions, capture: ResponseCapture) -> UpstreamHandle {
		UpstreamHandle(Arc::new(HandleInner { client: self.0.clone(), options, capture }))
	}
}
impl AsRef<ReqwestClient> for UpstreamHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}

#[derive(Debug)]
struct HandleInner {
	client: ReqwestClient,
	options: RequestOptions,
	capture: ResponseCapture,
}

/// [`AsyncHttpClient`] handle tied to one token request.
#[derive(Clone, Debug)]
pub struct UpstreamHandle(Arc<HandleInner>);
impl<'c> AsyncHttpClient<'c> for UpstreamHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let inner = Arc::clone(&self.0);

		Box::pin(async move {
			inner.capture.take();

			let request = apply_options(request, &inner.options)?;
			let response = inner
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response.bytes().await.map_err(Box::new)?.to_vec();

			inner.capture.store(CapturedResponse { status: status.as_u16(), body: body.clone() });

			let mut response_new = HttpResponse::new(body);

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

fn apply_options(
	request: HttpRequest,
	options: &RequestOptions,
) -> Result<HttpRequest, HttpClientError<ReqwestError>> {
	let (mut parts, mut body) = request.into_parts();

	if options.json_body {
		let mut object = JsonMap::new();

		for (key, value) in url::form_urlencoded::parse(&body) {
			object.insert(key.into_owned(), JsonValue::String(value.into_owned()));
		}

		body = serde_json::to_vec(&JsonValue::Object(object))
			.map_err(|e| HttpClientError::Other(format!("failed to encode JSON body: {e}").into()))?;

		parts.headers.remove(CONTENT_LENGTH);
		parts.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
	}

	for (name, value) in &options.extra_headers {
		let name = HeaderName::from_bytes(name.as_bytes())
			.map_err(|e| HttpClientError::Other(format!("invalid forwarded header name: {e}").into()))?;
		let value = HeaderValue::from_str(value)
			.map_err(|e| HttpClientError::Other(format!("invalid forwarded header value: {e}").into()))?;

		parts.headers.insert(name, value);
	}

	Ok(HttpRequest::from_parts(parts, body))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn form_request(body: &str) -> HttpRequest {
		http_request_builder()
			.body(body.as_bytes().to_vec())
			.expect("request fixture should build")
	}

	fn http_request_builder() -> oauth2::http::request::Builder {
		oauth2::http::Request::builder()
			.method("POST")
			.uri("https://example.com/token")
			.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
	}

	#[test]
	fn json_rewrite_replaces_body_and_content_type() {
		let options = RequestOptions { json_body: true, extra_headers: Vec::new() };
		let request = apply_options(
			form_request("grant_type=authorization_code&code=XYZ"),
			&options,
		)
		.expect("transform should succeed");

		assert_eq!(
			request.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
			Some("application/json"),
		);

		let body: JsonValue =
			serde_json::from_slice(request.body()).expect("rewritten body should be JSON");

		assert_eq!(body["grant_type"], "authorization_code");
		assert_eq!(body["code"], "XYZ");
	}

	#[test]
	fn forwarded_headers_are_injected() {
		let options = RequestOptions {
			json_body: false,
			extra_headers: vec![("Ocp-Apim-Subscription-Key".into(), "sub-key".into())],
		};
		let request = apply_options(form_request("grant_type=refresh_token"), &options)
			.expect("transform should succeed");

		assert_eq!(
			request
				.headers()
				.get("Ocp-Apim-Subscription-Key")
				.and_then(|v| v.to_str().ok()),
			Some("sub-key"),
		);
	}

	#[test]
	fn capture_slot_clears_on_take() {
		let capture = ResponseCapture::default();

		capture.store(CapturedResponse { status: 200, body: b"{}".to_vec() });

		assert_eq!(capture.peek().map(|c| c.status), Some(200));
		assert_eq!(capture.take().map(|c| c.status), Some(200));
		assert!(capture.take().is_none());
	}
}
