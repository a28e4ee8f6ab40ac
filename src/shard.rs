use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::handle::{Handle, WeakHandle};
use crate::key::CacheKey;
use crate::traits::Pooled;

/// Marker for a key whose instance is being constructed outside the shard lock.
///
/// Other callers asking for the same key block on it instead of constructing a duplicate.
pub(crate) struct InFlight {
	owner: ThreadId,
	done: Mutex<bool>,
	ready: Condvar,
}

impl InFlight {
	fn new() -> Arc<Self> {
		Arc::new(Self {
			owner: thread::current().id(),
			done: Mutex::new(false),
			ready: Condvar::new(),
		})
	}

	/// Whether the calling thread is the one running the construction.
	pub fn is_owned_by_current_thread(&self) -> bool {
		self.owner == thread::current().id()
	}

	/// Block until the construction finished, successfully or not.
	pub fn wait(&self) {
		let mut done = self.done.lock();
		while !*done {
			self.ready.wait(&mut done);
		}
	}

	/// Wake every waiter. Idempotent.
	pub fn finish(&self) {
		*self.done.lock() = true;
		self.ready.notify_all();
	}
}

pub(crate) enum Entry<T: Pooled> {
	/// Registered instance; may already be dead.
	Live(WeakHandle<T>),
	/// Construction running on some thread.
	Building(Arc<InFlight>),
}

/// Outcome of [`Shard::claim`].
pub(crate) enum Claim<T: Pooled> {
	/// A live instance exists.
	Hit(Handle<T>),
	/// Someone else is constructing this key.
	Wait(Arc<InFlight>),
	/// The caller now owns the construction of this key.
	Build(Arc<InFlight>),
}

/// A single shard mapping keys to weak handles.
///
/// The shard is not thread-safe on its own; the pool wraps it in a Mutex.
/// Nothing in here ever holds a strong handle beyond the call that created it,
/// so dropping an instance can never happen while the shard is locked.
pub(crate) struct Shard<T: Pooled> {
	entries: HashMap<CacheKey, Entry<T>, ahash::RandomState>,
}

impl<T: Pooled> Shard<T> {
	pub fn new(capacity: usize) -> Self {
		Self {
			entries: HashMap::with_capacity_and_hasher(capacity, ahash::RandomState::new()),
		}
	}

	/// Strong handle for `key` if registered and alive.
	pub fn lookup(&self, key: &CacheKey) -> Option<Handle<T>> {
		match self.entries.get(key)? {
			Entry::Live(weak) => weak.upgrade(),
			Entry::Building(_) => None,
		}
	}

	/// Decide what a constructing caller must do for `key`.
	///
	/// Returns the claim and whether a dead entry was found in the way.
	pub fn claim(&mut self, key: &CacheKey) -> (Claim<T>, bool) {
		let mut stale = false;
		if let Some(entry) = self.entries.get(key) {
			match entry {
				Entry::Live(weak) => match weak.upgrade() {
					Some(handle) => return (Claim::Hit(handle), false),
					None => stale = true,
				},
				Entry::Building(flight) => return (Claim::Wait(Arc::clone(flight)), false),
			}
		}

		let flight = InFlight::new();
		self.entries.insert(key.clone(), Entry::Building(Arc::clone(&flight)));
		(Claim::Build(flight), stale)
	}

	/// Register `handle` under `key`; first registrant wins.
	///
	/// Replaces an absent, dead or in-flight entry. Returns `false` and leaves the
	/// shard untouched when a live instance is already registered.
	pub fn register(&mut self, key: &CacheKey, handle: &Handle<T>) -> bool {
		if let Some(Entry::Live(existing)) = self.entries.get(key)
			&& existing.is_alive()
		{
			return false;
		}
		self.entries.insert(key.clone(), Entry::Live(Handle::downgrade(handle)));
		true
	}

	/// Drop the in-flight marker for `key` if it is still `flight`.
	pub fn abandon(&mut self, key: &CacheKey, flight: &Arc<InFlight>) {
		if let Some(Entry::Building(current)) = self.entries.get(key)
			&& Arc::ptr_eq(current, flight)
		{
			self.entries.remove(key);
		}
	}

	/// Remove the entry for `key` if its instance is gone.
	pub fn prune_dead(&mut self, key: &CacheKey) -> bool {
		if let Some(Entry::Live(weak)) = self.entries.get(key)
			&& !weak.is_alive()
		{
			self.entries.remove(key);
			return true;
		}
		false
	}

	/// Remove a registered entry, dead or alive. In-flight constructions are left alone.
	pub fn remove(&mut self, key: &CacheKey) -> bool {
		if let Some(Entry::Live(_)) = self.entries.get(key) {
			self.entries.remove(key);
			return true;
		}
		false
	}

	/// Drop every dead entry. Returns how many were removed.
	pub fn purge(&mut self) -> usize {
		let before = self.entries.len();
		self.entries.retain(|_, entry| match entry {
			Entry::Live(weak) => weak.is_alive(),
			Entry::Building(_) => true,
		});
		before - self.entries.len()
	}

	/// Remove every registered entry. Returns how many were removed.
	pub fn clear(&mut self) -> usize {
		let before = self.entries.len();
		self.entries.retain(|_, entry| matches!(entry, Entry::Building(_)));
		before - self.entries.len()
	}

	/// Number of registered entries whose instance is alive.
	pub fn live_len(&self) -> usize {
		self.entries
			.values()
			.filter(|entry| matches!(entry, Entry::Live(weak) if weak.is_alive()))
			.count()
	}

	/// Append `(key, alive)` for every registered entry.
	pub fn snapshot_into(&self, out: &mut Vec<(CacheKey, bool)>) {
		for (key, entry) in &self.entries {
			if let Entry::Live(weak) = entry {
				out.push((key.clone(), weak.is_alive()));
			}
		}
	}

	/// Number of entries of any kind.
	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.entries.len()
	}
}

#[cfg(test)]
mod tests {
	use std::convert::Infallible;
	use std::sync::Weak;

	use super::*;
	use crate::key::Args;

	struct Glyph(char);

	impl Pooled for Glyph {
		type Error = Infallible;

		fn construct(args: &Args) -> Result<Self, Self::Error> {
			Ok(Glyph(args.get(0).and_then(|a| a.as_char()).unwrap_or('?')))
		}
	}

	fn make_key(c: char) -> CacheKey {
		CacheKey::of::<Glyph>(&Args::new().arg(c)).expect("key should derive")
	}

	fn make_handle(c: char) -> Handle<Glyph> {
		Handle::new(Glyph(c), make_key(c), Weak::new())
	}

	#[test]
	fn test_claim_then_register() {
		let mut shard = Shard::new(4);
		let key = make_key('a');

		let (claim, stale) = shard.claim(&key);
		assert!(matches!(claim, Claim::Build(_)));
		assert!(!stale);
		assert!(shard.lookup(&key).is_none(), "in-flight entry must not be visible");

		let handle = make_handle('a');
		assert!(shard.register(&key, &handle));

		let found = shard.lookup(&key).expect("registered instance should be found");
		assert!(Handle::ptr_eq(&found, &handle));
		assert_eq!(shard.live_len(), 1);
	}

	#[test]
	fn test_second_claim_waits() {
		let mut shard = Shard::<Glyph>::new(4);
		let key = make_key('b');

		let (first, _) = shard.claim(&key);
		let (second, _) = shard.claim(&key);

		match (first, second) {
			(Claim::Build(a), Claim::Wait(b)) => assert!(Arc::ptr_eq(&a, &b)),
			_ => panic!("expected build then wait"),
		}
	}

	#[test]
	fn test_first_registrant_wins() {
		let mut shard = Shard::new(4);
		let key = make_key('c');

		let first = make_handle('c');
		let second = make_handle('c');
		assert!(shard.register(&key, &first));
		assert!(!shard.register(&key, &second));

		let found = shard.lookup(&key).expect("first instance should survive");
		assert!(Handle::ptr_eq(&found, &first));
	}

	#[test]
	fn test_dead_entry_is_a_miss() {
		let mut shard = Shard::new(4);
		let key = make_key('d');

		let handle = make_handle('d');
		shard.register(&key, &handle);
		drop(handle);

		assert!(shard.lookup(&key).is_none());
		let (claim, stale) = shard.claim(&key);
		assert!(matches!(claim, Claim::Build(_)));
		assert!(stale);
	}

	#[test]
	fn test_abandon_only_removes_own_flight() {
		let mut shard = Shard::<Glyph>::new(4);
		let key = make_key('e');

		let (claim, _) = shard.claim(&key);
		let Claim::Build(flight) = claim else {
			panic!("expected to build");
		};

		shard.abandon(&key, &InFlight::new());
		assert_eq!(shard.len(), 1);

		shard.abandon(&key, &flight);
		assert_eq!(shard.len(), 0);
	}

	#[test]
	fn test_prune_dead_keeps_live() {
		let mut shard = Shard::new(4);
		let key = make_key('f');

		let handle = make_handle('f');
		shard.register(&key, &handle);
		assert!(!shard.prune_dead(&key));

		drop(handle);
		assert!(shard.prune_dead(&key));
		assert_eq!(shard.len(), 0);
	}

	#[test]
	fn test_purge_and_snapshot() {
		let mut shard = Shard::new(4);
		let kept = make_handle('g');
		shard.register(&make_key('g'), &kept);
		shard.register(&make_key('h'), &make_handle('h'));

		let mut snapshot = Vec::new();
		shard.snapshot_into(&mut snapshot);
		snapshot.sort();
		assert_eq!(snapshot, vec![(make_key('g'), true), (make_key('h'), false)]);

		assert_eq!(shard.purge(), 1);
		assert_eq!(shard.len(), 1);
		assert_eq!(shard.live_len(), 1);
	}

	#[test]
	fn test_clear_leaves_in_flight() {
		let mut shard = Shard::new(4);
		let handle = make_handle('i');
		shard.register(&make_key('i'), &handle);
		let _ = shard.claim(&make_key('j'));

		assert_eq!(shard.clear(), 1);
		assert_eq!(shard.len(), 1);
		assert!(shard.lookup(&make_key('i')).is_none());
	}

	#[test]
	fn test_in_flight_finish_wakes_waiter() {
		let flight = InFlight::new();
		assert!(flight.is_owned_by_current_thread());

		let waiter = {
			let flight = Arc::clone(&flight);
			thread::spawn(move || {
				assert!(!flight.is_owned_by_current_thread());
				flight.wait();
			})
		};

		flight.finish();
		waiter.join().expect("waiter should wake up");
	}
}
