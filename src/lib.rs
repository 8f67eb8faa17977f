//! Multi-tenant OAuth 2.0 token proxy—terminate token-endpoint traffic from many downstream
//! clients, serialize refreshes per upstream credential, and persist rotating tokens encrypted
//! at rest.

#![deny(clippy::all, missing_docs)]

pub mod clock;
pub mod codec;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod oidc;
pub mod provider;
pub mod store;
pub mod token;
pub mod upstream;

mod _prelude {
	pub use std::{
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::{Map as JsonMap, Value as JsonValue};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use url;
