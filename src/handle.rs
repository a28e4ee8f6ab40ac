use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use crate::key::CacheKey;
use crate::pool::PoolInner;
use crate::traits::Pooled;

/// Shared allocation behind a handle: the instance plus what it needs to deregister itself.
pub(crate) struct Slot<T: Pooled> {
	value: T,
	key: CacheKey,
	/// Pool to notify when the last strong handle goes away. Empty when release pruning is off.
	home: Weak<PoolInner<T>>,
}

impl<T: Pooled> Drop for Slot<T> {
	fn drop(&mut self) {
		// Runs once, after the strong count reached zero. `value` is dropped after this body,
		// outside any pool lock.
		if let Some(pool) = self.home.upgrade() {
			pool.release(&self.key);
		}
	}
}

/// Strong handle to a pooled instance. Keeps the instance alive while held.
///
/// Cloning is a reference count bump. Dereferences to the instance.
/// Handles obtained for equal keys from the same pool point at the same instance;
/// use [`Handle::ptr_eq`] to check identity.
pub struct Handle<T: Pooled> {
	slot: Arc<Slot<T>>,
}

impl<T: Pooled> Handle<T> {
	pub(crate) fn new(value: T, key: CacheKey, home: Weak<PoolInner<T>>) -> Self {
		Self {
			slot: Arc::new(Slot {
				value,
				key,
				home,
			}),
		}
	}

	/// Whether both handles refer to the same instance.
	pub fn ptr_eq(this: &Self, other: &Self) -> bool {
		Arc::ptr_eq(&this.slot, &other.slot)
	}

	/// Create a non-owning handle to the same instance.
	pub fn downgrade(this: &Self) -> WeakHandle<T> {
		WeakHandle {
			slot: Arc::downgrade(&this.slot),
		}
	}

	/// Key the instance was constructed under.
	pub fn key(this: &Self) -> &CacheKey {
		&this.slot.key
	}

	/// Number of strong handles to this instance, including `this`.
	pub fn strong_count(this: &Self) -> usize {
		Arc::strong_count(&this.slot)
	}
}

impl<T: Pooled> Clone for Handle<T> {
	fn clone(&self) -> Self {
		Self {
			slot: Arc::clone(&self.slot),
		}
	}
}

impl<T: Pooled> Deref for Handle<T> {
	type Target = T;

	fn deref(&self) -> &T {
		&self.slot.value
	}
}

impl<T: Pooled> AsRef<T> for Handle<T> {
	fn as_ref(&self) -> &T {
		&self.slot.value
	}
}

impl<T: Pooled + fmt::Debug> fmt::Debug for Handle<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Handle")
			.field("key", &format_args!("{}", self.slot.key))
			.field("value", &self.slot.value)
			.finish()
	}
}

impl<T: Pooled + fmt::Display> fmt::Display for Handle<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.slot.value.fmt(f)
	}
}

/// Non-owning handle. Never extends the instance's lifetime.
pub struct WeakHandle<T: Pooled> {
	slot: Weak<Slot<T>>,
}

impl<T: Pooled> WeakHandle<T> {
	/// A handle that was never attached to an instance.
	pub fn new() -> Self {
		Self {
			slot: Weak::new(),
		}
	}

	/// Whether the instance still has at least one strong handle.
	///
	/// Does not upgrade, so asking never keeps the instance alive.
	pub fn is_alive(&self) -> bool {
		self.slot.strong_count() > 0
	}

	/// Temporary strong handle, if the instance is still alive.
	pub fn upgrade(&self) -> Option<Handle<T>> {
		self.slot.upgrade().map(|slot| Handle {
			slot,
		})
	}

	/// Whether both handles point at the same allocation.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		self.slot.ptr_eq(&other.slot)
	}
}

impl<T: Pooled> Default for WeakHandle<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Pooled> Clone for WeakHandle<T> {
	fn clone(&self) -> Self {
		Self {
			slot: Weak::clone(&self.slot),
		}
	}
}

impl<T: Pooled> fmt::Debug for WeakHandle<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WeakHandle").field("alive", &self.is_alive()).finish()
	}
}
