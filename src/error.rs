use crate::element::Key;
use thiserror::Error;
use tracing::{error, warn};

/// Everything that can go wrong while reconciling, hydrating or running scheduled work.
///
/// [`Error::InvariantViolation`] is fatal: it is never substituted by a [`Catch`](`crate::element::catch`) fallback
/// and always propagates to the caller. Every other variant is a *render error* in the sense that the nearest
/// enclosing boundary may recover from it.
#[derive(Debug, Error)]
pub enum Error {
	#[error("invariant violation: {0}")]
	InvariantViolation(String),

	#[error("render failed: {0}")]
	Render(String),

	#[error("duplicate key {0:?} in child list")]
	DuplicateKey(Key),

	#[error("depth limit reached")]
	DepthLimit,

	#[error("host adapter failure: {0}")]
	Host(String),

	#[error("could not load `{export}` from {url}: {message}")]
	Load { url: String, export: String, message: String },

	#[error("could not fetch frame content from {src}: {message}")]
	Fetch { src: String, message: String },

	#[error("malformed hydration payload: {0}")]
	Payload(#[from] serde_json::Error),

	#[error("task failed: {0}")]
	Task(String),
}

impl Error {
	pub fn render(message: impl Into<String>) -> Self {
		Self::Render(message.into())
	}

	pub fn invariant(message: impl Into<String>) -> Self {
		Self::InvariantViolation(message.into())
	}

	pub fn task(message: impl Into<String>) -> Self {
		Self::Task(message.into())
	}

	#[must_use]
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::InvariantViolation(_))
	}
}

/// Process-wide destination for render errors.
pub trait ErrorSink {
	/// An error no [`Catch`](`crate::element::catch`) boundary recovered from.
	/// The affected subtree stays in its last successfully committed state.
	fn report(&self, error: &Error);

	/// An error a boundary substituted with its fallback.
	fn caught(&self, error: &Error) {
		let _ = error;
	}
}

/// The default [`ErrorSink`], which only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;
impl ErrorSink for TracingSink {
	fn report(&self, error: &Error) {
		error!("Uncaught render error: {}", error);
	}

	fn caught(&self, error: &Error) {
		warn!("Render error caught by boundary: {}", error);
	}
}
