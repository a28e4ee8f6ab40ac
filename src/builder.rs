use crate::pool::{DEFAULT_SHARD_COUNT, Pool, compute_shard_count};
use crate::traits::Pooled;

/// Builder for configuring a [`Pool`].
///
/// One builder can configure pools of any pooled type, which is how a
/// [`Factory`](crate::Factory) applies the same settings to every pool it creates.
///
/// # Example
///
/// ```
/// use flyweight_pool::{Args, Pool, PoolBuilder, Pooled};
/// # struct Font;
/// # impl Pooled for Font {
/// #     type Error = std::convert::Infallible;
/// #     fn construct(_: &Args) -> Result<Self, Self::Error> { Ok(Font) }
/// # }
///
/// let pool: Pool<Font> = PoolBuilder::new()
///     .shards(4)
///     .capacity(256)
///     .build();
/// assert_eq!(pool.shard_count(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct PoolBuilder {
	shard_count: Option<usize>,
	capacity: usize,
	prune_on_release: bool,
}

impl PoolBuilder {
	/// Create a new builder with default settings.
	pub fn new() -> Self {
		Self {
			shard_count: None,
			capacity: 0,
			prune_on_release: true,
		}
	}

	/// Set the number of shards.
	///
	/// More shards reduce contention between unrelated keys.
	/// Will be rounded up to the next power of 2.
	///
	/// Default: 16 shards
	pub fn shards(mut self, count: usize) -> Self {
		self.shard_count = Some(count);
		self
	}

	/// Number of entries to preallocate, spread evenly across shards.
	///
	/// Default: 0
	pub fn capacity(mut self, entries: usize) -> Self {
		self.capacity = entries;
		self
	}

	/// Whether dropping the last handle to an instance removes its entry right away.
	///
	/// When off, dead entries linger until a constructing call for the same key or
	/// [`Pool::purge`] clears them. Either way a dead entry is never returned.
	///
	/// Default: true
	pub fn prune_on_release(mut self, enabled: bool) -> Self {
		self.prune_on_release = enabled;
		self
	}

	/// Build the pool with the configured settings.
	pub fn build<T: Pooled>(self) -> Pool<T> {
		let shard_count = compute_shard_count(self.shard_count.unwrap_or(DEFAULT_SHARD_COUNT));
		Pool::with_config(shard_count, self.capacity, self.prune_on_release)
	}
}

impl Default for PoolBuilder {
	fn default() -> Self {
		Self::new()
	}
}
