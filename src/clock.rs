//! Clock seam shared by coordinators, the store, and tests.

// self
use crate::_prelude::*;

/// Time source injected into every component that reasons about expiry.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Returns the current instant in UTC.
	fn now(&self) -> OffsetDateTime;
}

/// Production clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Settable clock used by tests to step through expiry windows.
#[derive(Debug)]
pub struct ManualClock(Mutex<OffsetDateTime>);
impl ManualClock {
	/// Creates a clock pinned at the provided instant.
	pub fn new(at: OffsetDateTime) -> Self {
		Self(Mutex::new(at))
	}

	/// Replaces the current instant.
	pub fn set(&self, at: OffsetDateTime) {
		*self.0.lock() = at;
	}

	/// Moves the clock forward by the provided duration.
	pub fn advance(&self, by: Duration) {
		let mut guard = self.0.lock();

		*guard += by;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}
