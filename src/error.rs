use std::fmt;

use thiserror::Error;

use crate::key::CacheKey;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error produced by a [`Pooled::construct`](crate::Pooled::construct) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Where an offending argument sits in an [`Args`](crate::Args) list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgPosition {
	/// Zero-based positional index.
	Positional(usize),
	/// Keyword argument name.
	Keyword(String),
}

impl fmt::Display for ArgPosition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ArgPosition::Positional(index) => write!(f, "positional argument {index}"),
			ArgPosition::Keyword(name) => write!(f, "keyword argument `{name}`"),
		}
	}
}

/// Arguments could not be turned into a stable, comparable [`CacheKey`].
///
/// Raised before any construction is attempted; the pool is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyDerivationError {
	/// A float argument is NaN. NaN is not equal to itself, so it cannot identify an instance.
	#[error("{position} of {type_name} contains NaN, which has no stable identity")]
	NotANumber {
		type_name: &'static str,
		position: ArgPosition,
	},

	/// The same keyword was supplied twice.
	#[error("keyword argument `{name}` given more than once for {type_name}")]
	DuplicateKeyword {
		type_name: &'static str,
		name: String,
	},

	/// Two map entries canonicalize to the same key (for example `0.0` and `-0.0`).
	#[error("{position} of {type_name} holds a map with duplicate keys")]
	DuplicateMapKey {
		type_name: &'static str,
		position: ArgPosition,
	},
}

/// The underlying initializer of a pooled type failed.
///
/// A failed construction never leaves an entry behind in the pool.
#[derive(Error, Debug)]
#[error("failed to construct {key}")]
pub struct ConstructionError {
	key: CacheKey,
	#[source]
	source: BoxError,
}

impl ConstructionError {
	pub(crate) fn new(key: CacheKey, source: impl Into<BoxError>) -> Self {
		Self {
			key,
			source: source.into(),
		}
	}

	/// Key whose construction failed.
	pub fn key(&self) -> &CacheKey {
		&self.key
	}

	/// Error returned by the initializer.
	pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
		self.source.as_ref()
	}

	/// Consume and return the initializer's error.
	pub fn into_inner(self) -> BoxError {
		self.source
	}
}

/// Errors returned by [`Pool`](crate::Pool) and [`Factory`](crate::Factory).
#[derive(Error, Debug)]
pub enum Error {
	#[error(transparent)]
	KeyDerivation(#[from] KeyDerivationError),

	#[error(transparent)]
	Construction(#[from] ConstructionError),

	/// An initializer asked for the instance it is itself building.
	#[error("recursive construction of {key}")]
	Recursive { key: CacheKey },
}

impl Error {
	/// The key involved, when one could be derived.
	pub fn key(&self) -> Option<&CacheKey> {
		match self {
			Error::KeyDerivation(_) => None,
			Error::Construction(err) => Some(err.key()),
			Error::Recursive { key } => Some(key),
		}
	}
}
