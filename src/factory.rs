use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tracing::debug;

use crate::builder::PoolBuilder;
use crate::error::Result;
use crate::handle::Handle;
use crate::key::{Args, CacheKey};
use crate::pool::{Pool, SnapshotEntry};
use crate::traits::Pooled;

/// Type-erased view of a `Pool<T>`, so pools of different types share one map.
trait ErasedPool: Send + Sync {
	fn as_any(&self) -> &dyn Any;
	fn type_name(&self) -> &'static str;
	fn snapshot(&self) -> Vec<SnapshotEntry>;
	fn live_len(&self) -> usize;
	fn purge(&self) -> usize;
	fn clear(&self) -> usize;
}

impl<T: Pooled> ErasedPool for Pool<T> {
	fn as_any(&self) -> &dyn Any {
		self
	}

	fn type_name(&self) -> &'static str {
		std::any::type_name::<T>()
	}

	fn snapshot(&self) -> Vec<SnapshotEntry> {
		Pool::snapshot(self)
	}

	fn live_len(&self) -> usize {
		Pool::len(self)
	}

	fn purge(&self) -> usize {
		Pool::purge(self)
	}

	fn clear(&self) -> usize {
		Pool::clear(self)
	}
}

/// Heterogeneous flyweight registry: one [`Pool`] per pooled type, created on first use.
///
/// Every pool is configured from the factory's [`PoolBuilder`].
///
/// # Example
///
/// ```
/// use flyweight_pool::{Args, Factory, Handle, Pooled};
/// # use std::convert::Infallible;
/// # struct Style(String);
/// # impl Pooled for Style {
/// #     type Error = Infallible;
/// #     fn construct(args: &Args) -> Result<Self, Infallible> {
/// #         Ok(Style(args.str_at(0).unwrap_or_default().to_string()))
/// #     }
/// # }
///
/// let factory = Factory::new();
/// let bold = factory.construct::<Style>(&Args::new().arg("bold")).unwrap();
/// let again = factory.construct::<Style>(&Args::new().arg("bold")).unwrap();
/// assert!(Handle::ptr_eq(&bold, &again));
/// assert_eq!(factory.snapshot::<Style>().len(), 1);
/// ```
pub struct Factory {
	pools: RwLock<HashMap<TypeId, Box<dyn ErasedPool>, ahash::RandomState>>,
	builder: PoolBuilder,
}

impl Factory {
	/// Create a factory whose pools use default settings.
	pub fn new() -> Self {
		Self::with_builder(PoolBuilder::new())
	}

	/// Create a factory whose pools are configured by `builder`.
	pub fn with_builder(builder: PoolBuilder) -> Self {
		Self {
			pools: RwLock::new(HashMap::default()),
			builder,
		}
	}

	/// The pool for `T`, created if this is the first request for the type.
	pub fn pool<T: Pooled>(&self) -> Pool<T> {
		if let Some(pool) = self.existing::<T>() {
			return pool;
		}

		let mut pools = self.pools.write();
		// Another thread may have created it between the two locks
		if let Some(pool) =
			pools.get(&TypeId::of::<T>()).and_then(|pool| pool.as_any().downcast_ref::<Pool<T>>())
		{
			return pool.clone();
		}

		let pool = self.builder.clone().build::<T>();
		pools.insert(TypeId::of::<T>(), Box::new(pool.clone()));
		debug!(type_name = std::any::type_name::<T>(), "created flyweight pool");
		pool
	}

	fn existing<T: Pooled>(&self) -> Option<Pool<T>> {
		let pools = self.pools.read();
		pools.get(&TypeId::of::<T>())?.as_any().downcast_ref::<Pool<T>>().cloned()
	}

	/// Shared instance of `T` for `args`; see [`Pool::construct`].
	pub fn construct<T: Pooled>(&self, args: &Args) -> Result<Handle<T>> {
		self.pool::<T>().construct(args)
	}

	/// Existing live instance of `T` for `args`. Never creates a pool.
	pub fn lookup<T: Pooled>(&self, args: &Args) -> Result<Option<Handle<T>>> {
		match self.existing::<T>() {
			Some(pool) => pool.lookup(args),
			None => {
				// Still report underivable arguments
				CacheKey::of::<T>(args)?;
				Ok(None)
			}
		}
	}

	/// Registered entries of `T`'s pool, sorted by key.
	pub fn snapshot<T: Pooled>(&self) -> Vec<SnapshotEntry> {
		self.snapshot_of(TypeId::of::<T>())
	}

	/// Registered entries of the pool for `type_id`; empty if no such pool exists.
	pub fn snapshot_of(&self, type_id: TypeId) -> Vec<SnapshotEntry> {
		self.pools.read().get(&type_id).map(|pool| pool.snapshot()).unwrap_or_default()
	}

	/// Drop dead entries in every pool. Returns how many were removed.
	pub fn purge(&self) -> usize {
		self.pools.read().values().map(|pool| pool.purge()).sum()
	}

	/// Forget every entry in every pool. Outstanding handles stay valid.
	pub fn clear(&self) -> usize {
		self.pools.read().values().map(|pool| pool.clear()).sum()
	}

	/// Live entries across all pools.
	pub fn len(&self) -> usize {
		self.pools.read().values().map(|pool| pool.live_len()).sum()
	}

	/// Whether no pool holds a live entry.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Number of pools created so far.
	pub fn pool_count(&self) -> usize {
		self.pools.read().len()
	}
}

impl Default for Factory {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for Factory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let pools = self.pools.read();
		let mut types: Vec<_> = pools.values().map(|pool| pool.type_name()).collect();
		types.sort_unstable();
		f.debug_struct("Factory").field("pools", &types).field("builder", &self.builder).finish()
	}
}
