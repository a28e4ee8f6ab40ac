use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Weak};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::builder::PoolBuilder;
use crate::error::{ConstructionError, Error, Result};
use crate::handle::Handle;
use crate::key::{Args, CacheKey};
#[cfg(feature = "metrics")]
use crate::metrics::{Counters, PoolMetrics};
use crate::shard::{Claim, InFlight, Shard};
use crate::traits::Pooled;

/// Default number of shards per pool.
pub(crate) const DEFAULT_SHARD_COUNT: usize = 16;

/// Upper bound on the shard count.
const MAX_SHARD_COUNT: usize = 1024;

/// Round the requested shard count to a power of two within `1..=MAX_SHARD_COUNT`.
pub(crate) fn compute_shard_count(desired: usize) -> usize {
	desired.clamp(1, MAX_SHARD_COUNT).next_power_of_two()
}

/// One row of [`Pool::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
	pub key: CacheKey,
	/// Whether any strong handle to the instance still exists.
	pub alive: bool,
}

/// Shared state of a pool. Handles reach it through a `Weak` to deregister themselves.
pub(crate) struct PoolInner<T: Pooled> {
	/// Sharded storage
	shards: Box<[Mutex<Shard<T>>]>,
	/// Number of shards, a power of two
	shard_count: usize,
	/// Keys released while their shard was locked; pruned on later operations
	pending_releases: SegQueue<CacheKey>,
	/// Whether handles deregister their entry when the last one drops
	prune_on_release: bool,
	#[cfg(feature = "metrics")]
	counters: Counters,
}

impl<T: Pooled> PoolInner<T> {
	/// Get the shard for a given key.
	fn shard(&self, key: &CacheKey) -> &Mutex<Shard<T>> {
		let index = (key.precomputed_hash() as usize) & (self.shard_count - 1);
		&self.shards[index]
	}

	/// Release hook, run once when the last strong handle to an instance under `key` drops.
	///
	/// Never blocks: if the shard is busy the key is queued and pruned later.
	pub(crate) fn release(&self, key: &CacheKey) {
		match self.shard(key).try_lock() {
			Some(mut shard) => {
				if shard.prune_dead(key) {
					#[cfg(feature = "metrics")]
					Counters::bump(&self.counters.releases);
					trace!(key = %key, "released flyweight entry");
				}
			}
			None => self.pending_releases.push(key.clone()),
		}
	}

	/// Process keys queued by the release hook.
	fn drain_releases(&self) {
		// Limit the number of releases per call to avoid blocking
		const MAX_RELEASES: usize = 16;

		for _ in 0..MAX_RELEASES {
			let Some(key) = self.pending_releases.pop() else {
				break;
			};
			match self.shard(&key).try_lock() {
				Some(mut shard) => {
					if shard.prune_dead(&key) {
						#[cfg(feature = "metrics")]
						Counters::bump(&self.counters.releases);
						trace!(key = %key, "released flyweight entry");
					}
				}
				None => {
					// Put it back for later
					self.pending_releases.push(key);
					break;
				}
			}
		}
	}
}

/// Per-type registry of shared instances, keyed by construction arguments.
///
/// The pool only holds weak handles: an instance lives exactly as long as some caller
/// holds a [`Handle`] to it. Cloning a `Pool` is cheap and yields another handle to the
/// same registry.
///
/// # Concurrency
///
/// Keys are spread over independently locked shards. For a given key, lookup and
/// registration are atomic: concurrent `construct` calls with equal arguments run the
/// initializer once, and every caller receives the same instance. The initializer itself
/// runs with no lock held, so it may construct other pooled instances.
///
/// # Example
///
/// ```
/// use std::convert::Infallible;
/// use flyweight_pool::{Args, Handle, Pool, Pooled};
///
/// struct Color(String);
///
/// impl Pooled for Color {
///     type Error = Infallible;
///
///     fn construct(args: &Args) -> Result<Self, Infallible> {
///         Ok(Color(args.str_at(0).unwrap_or("black").to_string()))
///     }
/// }
///
/// let pool = Pool::<Color>::new();
/// let a = pool.construct(&Args::new().arg("red")).unwrap();
/// let b = pool.construct(&Args::new().arg("red")).unwrap();
/// assert!(Handle::ptr_eq(&a, &b));
/// ```
pub struct Pool<T: Pooled> {
	inner: Arc<PoolInner<T>>,
}

impl<T: Pooled> Pool<T> {
	/// Create a pool with default settings.
	pub fn new() -> Self {
		PoolBuilder::new().build()
	}

	/// Create with custom shard count (rounded up to a power of two).
	pub fn with_shards(shard_count: usize) -> Self {
		PoolBuilder::new().shards(shard_count).build()
	}

	/// Internal constructor used by [`PoolBuilder`]. `shard_count` must already be validated.
	pub(crate) fn with_config(shard_count: usize, capacity: usize, prune_on_release: bool) -> Self {
		let per_shard = capacity.div_ceil(shard_count);
		let shards = (0..shard_count).map(|_| Mutex::new(Shard::new(per_shard))).collect();

		Self {
			inner: Arc::new(PoolInner {
				shards,
				shard_count,
				pending_releases: SegQueue::new(),
				prune_on_release,
				#[cfg(feature = "metrics")]
				counters: Counters::default(),
			}),
		}
	}

	/// Return the shared instance for `args`, constructing it on a miss.
	///
	/// On a hit the initializer does not run; the instance is returned as it currently
	/// stands. On a miss `T::construct` runs once, outside any lock; if it fails the error
	/// is returned and nothing is registered.
	///
	/// # Errors
	///
	/// - [`Error::KeyDerivation`] when `args` has no stable key. Nothing is constructed.
	/// - [`Error::Construction`] when the initializer fails.
	/// - [`Error::Recursive`] when the initializer asks for the key it is building.
	pub fn construct(&self, args: &Args) -> Result<Handle<T>> {
		let key = CacheKey::of::<T>(args)?;
		self.get_or_construct(key, args)
	}

	fn get_or_construct(&self, key: CacheKey, args: &Args) -> Result<Handle<T>> {
		let shard_lock = self.inner.shard(&key);

		loop {
			self.inner.drain_releases();

			let (claim, stale) = shard_lock.lock().claim(&key);
			if stale {
				#[cfg(feature = "metrics")]
				Counters::bump(&self.inner.counters.stale_pruned);
				trace!(key = %key, "replacing dead flyweight entry");
			}

			match claim {
				Claim::Hit(handle) => {
					#[cfg(feature = "metrics")]
					Counters::bump(&self.inner.counters.hits);
					trace!(key = %key, "flyweight hit");
					return Ok(handle);
				}
				Claim::Wait(flight) => {
					if flight.is_owned_by_current_thread() {
						return Err(Error::Recursive {
							key,
						});
					}
					#[cfg(feature = "metrics")]
					Counters::bump(&self.inner.counters.waits);
					trace!(key = %key, "waiting for construction in flight");
					flight.wait();
				}
				Claim::Build(flight) => {
					#[cfg(feature = "metrics")]
					Counters::bump(&self.inner.counters.misses);
					return self.build(key, args, &flight);
				}
			}
		}
	}

	/// Miss path: run the initializer and register the result.
	fn build(&self, key: CacheKey, args: &Args, flight: &Arc<InFlight>) -> Result<Handle<T>> {
		let mut guard = FlightGuard {
			pool: &self.inner,
			key: &key,
			flight,
			settled: false,
		};

		debug!(key = %key, "constructing flyweight");
		let value = match T::construct(args) {
			Ok(value) => value,
			Err(err) => {
				debug!(key = %key, error = %err, "flyweight construction failed");
				return Err(ConstructionError::new(key.clone(), err).into());
			}
		};

		let handle = Handle::new(value, key.clone(), self.home());
		let registered = self.inner.shard(&key).lock().register(&key, &handle);
		guard.settled = true;
		drop(guard);

		#[cfg(feature = "metrics")]
		Counters::bump(&self.inner.counters.constructions);
		if !registered {
			#[cfg(feature = "metrics")]
			Counters::bump(&self.inner.counters.registrations_lost);
			debug!(key = %key, "key registered while constructing, keeping the first instance");
		}
		Ok(handle)
	}

	/// Where new handles report their release, if release pruning is on.
	fn home(&self) -> Weak<PoolInner<T>> {
		if self.inner.prune_on_release {
			Arc::downgrade(&self.inner)
		} else {
			Weak::new()
		}
	}

	/// Existing live instance for `args`, without constructing anything.
	///
	/// # Errors
	///
	/// [`Error::KeyDerivation`] when `args` has no stable key.
	pub fn lookup(&self, args: &Args) -> Result<Option<Handle<T>>> {
		let key = CacheKey::of::<T>(args)?;
		Ok(self.lookup_key(&key))
	}

	/// Existing live instance for an already derived key.
	pub fn lookup_key(&self, key: &CacheKey) -> Option<Handle<T>> {
		self.inner.shard(key).lock().lookup(key)
	}

	/// Register a ready-made instance under `key`; the first registrant wins.
	///
	/// If a live instance is already registered the pool keeps it, and the returned handle
	/// points at `value`, which stays unregistered. Either way the next lookup for `key`
	/// resolves to the single registered instance.
	///
	/// `key` must be derived for `T` (see [`CacheKey::of`]). A key derived for another
	/// type is never registered: `value` is handed back in a detached handle.
	pub fn insert(&self, key: CacheKey, value: T) -> Handle<T> {
		if key.type_id() != TypeId::of::<T>() {
			debug!(key = %key, "insert rejected, key derived for another type");
			return Handle::new(value, key, Weak::new());
		}

		let handle = Handle::new(value, key.clone(), self.home());
		let registered = self.inner.shard(&key).lock().register(&key, &handle);
		if !registered {
			#[cfg(feature = "metrics")]
			Counters::bump(&self.inner.counters.registrations_lost);
			debug!(key = %key, "insert lost to a live instance");
		}
		handle
	}

	/// Forget the entry for `key`. Outstanding handles stay valid.
	///
	/// Returns whether an entry was removed. Constructions in flight are not affected.
	pub fn remove(&self, key: &CacheKey) -> bool {
		let removed = self.inner.shard(key).lock().remove(key);
		if removed {
			#[cfg(feature = "metrics")]
			Counters::bump(&self.inner.counters.removals);
			debug!(key = %key, "removed flyweight entry");
		}
		removed
	}

	/// Every registered key with its liveness, sorted by key.
	///
	/// Read-only: it neither prunes dead entries nor upgrades weak handles.
	pub fn snapshot(&self) -> Vec<SnapshotEntry> {
		let mut rows = Vec::new();
		for shard_lock in self.inner.shards.iter() {
			shard_lock.lock().snapshot_into(&mut rows);
		}
		rows.sort_by(|a, b| a.0.cmp(&b.0));
		rows.into_iter()
			.map(|(key, alive)| SnapshotEntry {
				key,
				alive,
			})
			.collect()
	}

	/// Number of registered entries whose instance is alive.
	pub fn len(&self) -> usize {
		self.inner.shards.iter().map(|shard| shard.lock().live_len()).sum()
	}

	/// Whether no live instance is registered.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drop every dead entry now. Returns how many were removed.
	pub fn purge(&self) -> usize {
		self.inner.drain_releases();
		let purged: usize = self.inner.shards.iter().map(|shard| shard.lock().purge()).sum();

		#[cfg(feature = "metrics")]
		Counters::add(&self.inner.counters.stale_pruned, purged as u64);
		if purged > 0 {
			debug!(purged, "purged dead flyweight entries");
		}
		purged
	}

	/// Forget every registered entry. Outstanding handles stay valid.
	pub fn clear(&self) -> usize {
		let cleared: usize = self.inner.shards.iter().map(|shard| shard.lock().clear()).sum();

		#[cfg(feature = "metrics")]
		Counters::add(&self.inner.counters.removals, cleared as u64);
		cleared
	}

	/// Number of shards.
	pub fn shard_count(&self) -> usize {
		self.inner.shard_count
	}

	/// Whether handles deregister their entry as soon as the last one drops.
	pub fn prunes_on_release(&self) -> bool {
		self.inner.prune_on_release
	}

	/// Get performance metrics snapshot.
	#[cfg(feature = "metrics")]
	pub fn metrics(&self) -> PoolMetrics {
		self.inner.counters.snapshot(self.len())
	}

	/// Reset all counters to zero.
	#[cfg(feature = "metrics")]
	pub fn reset_metrics(&self) {
		self.inner.counters.reset();
	}
}

impl<T: Pooled> Clone for Pool<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T: Pooled> Default for Pool<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Pooled> fmt::Debug for Pool<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Pool")
			.field("type_name", &std::any::type_name::<T>())
			.field("shard_count", &self.inner.shard_count)
			.field("prune_on_release", &self.inner.prune_on_release)
			.finish_non_exhaustive()
	}
}

/// Settles an in-flight construction on every exit path, panics included.
///
/// Unless marked settled, the in-flight marker is removed so the key reads as absent.
/// Waiters are always woken.
struct FlightGuard<'a, T: Pooled> {
	pool: &'a PoolInner<T>,
	key: &'a CacheKey,
	flight: &'a Arc<InFlight>,
	settled: bool,
}

impl<T: Pooled> Drop for FlightGuard<'_, T> {
	fn drop(&mut self) {
		if !self.settled {
			self.pool.shard(self.key).lock().abandon(self.key, self.flight);
			#[cfg(feature = "metrics")]
			Counters::bump(&self.pool.counters.construction_failures);
		}
		self.flight.finish();
	}
}
