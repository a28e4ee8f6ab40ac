//! Pool performance metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one pool, updated with relaxed atomics.
#[derive(Debug, Default)]
pub(crate) struct Counters {
	pub hits: AtomicU64,
	pub misses: AtomicU64,
	pub waits: AtomicU64,
	pub constructions: AtomicU64,
	pub construction_failures: AtomicU64,
	pub registrations_lost: AtomicU64,
	pub releases: AtomicU64,
	pub stale_pruned: AtomicU64,
	pub removals: AtomicU64,
}

impl Counters {
	pub fn bump(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub fn add(counter: &AtomicU64, n: u64) {
		counter.fetch_add(n, Ordering::Relaxed);
	}

	pub fn snapshot(&self, live_entries: usize) -> PoolMetrics {
		PoolMetrics {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			waits: self.waits.load(Ordering::Relaxed),
			constructions: self.constructions.load(Ordering::Relaxed),
			construction_failures: self.construction_failures.load(Ordering::Relaxed),
			registrations_lost: self.registrations_lost.load(Ordering::Relaxed),
			releases: self.releases.load(Ordering::Relaxed),
			stale_pruned: self.stale_pruned.load(Ordering::Relaxed),
			removals: self.removals.load(Ordering::Relaxed),
			live_entries,
		}
	}

	pub fn reset(&self) {
		for counter in [
			&self.hits,
			&self.misses,
			&self.waits,
			&self.constructions,
			&self.construction_failures,
			&self.registrations_lost,
			&self.releases,
			&self.stale_pruned,
			&self.removals,
		] {
			counter.store(0, Ordering::Relaxed);
		}
	}
}

/// Snapshot of a pool's counters.
///
/// # Example
///
/// ```
/// use flyweight_pool::{Args, Pool, Pooled};
/// # use std::convert::Infallible;
/// # struct Token;
/// # impl Pooled for Token {
/// #     type Error = Infallible;
/// #     fn construct(_: &Args) -> Result<Self, Infallible> { Ok(Token) }
/// # }
///
/// let pool = Pool::<Token>::new();
/// let _a = pool.construct(&Args::new().arg(1)).unwrap();
/// let _b = pool.construct(&Args::new().arg(1)).unwrap();
///
/// let metrics = pool.metrics();
/// assert_eq!(metrics.misses, 1);
/// assert_eq!(metrics.hits, 1);
/// println!("Hit rate: {:.2}%", metrics.hit_rate() * 100.0);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
	/// `construct` calls answered with an existing instance.
	pub hits: u64,
	/// `construct` calls that had to build (absent or dead entry).
	pub misses: u64,
	/// Times a caller blocked on another thread's construction of the same key.
	pub waits: u64,
	/// Successful runs of the initializer.
	pub constructions: u64,
	/// Failed (or panicked) runs of the initializer.
	pub construction_failures: u64,
	/// Registrations that found a live instance already in place.
	pub registrations_lost: u64,
	/// Entries removed by the release hook when their last handle dropped.
	pub releases: u64,
	/// Dead entries removed lazily by lookups, claims or `purge`.
	pub stale_pruned: u64,
	/// Entries removed through `remove` or `clear`.
	pub removals: u64,
	/// Registered entries whose instance is alive.
	pub live_entries: usize,
}

impl PoolMetrics {
	/// Ratio of hits to all `construct` calls, between 0.0 and 1.0.
	///
	/// Returns 0.0 if nothing was constructed yet.
	pub fn hit_rate(&self) -> f64 {
		let total = self.total_requests();
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}

	/// Total `construct` calls that resolved (hits + misses).
	pub fn total_requests(&self) -> u64 {
		self.hits + self.misses
	}
}
