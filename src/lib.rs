//! # Flyweight Pool
//!
//! Share immutable-by-identity instances by their construction arguments:
//! - **Structural keys** derived from typed positional and keyword arguments
//! - **Weak registry**: the pool never keeps an instance alive on its own
//! - **Exactly-once construction** per key, even under concurrent misses
//! - **Read-optimized concurrency** via fine-grained sharding
//!
//! ## Quick Start
//!
//! ```rust
//! use std::convert::Infallible;
//! use std::sync::Mutex;
//! use flyweight_pool::{Args, Handle, Pool, Pooled};
//!
//! struct Card {
//!     value: String,
//!     suit: String,
//!     // Extrinsic state lives behind interior mutability
//!     owner: Mutex<Option<String>>,
//! }
//!
//! impl Pooled for Card {
//!     type Error = Infallible;
//!
//!     fn construct(args: &Args) -> Result<Self, Infallible> {
//!         Ok(Card {
//!             value: args.str_at(0).unwrap_or_default().to_string(),
//!             suit: args.str_at(1).unwrap_or_default().to_string(),
//!             owner: Mutex::new(None),
//!         })
//!     }
//! }
//!
//! let pool = Pool::<Card>::new();
//!
//! let nine = pool.construct(&Args::new().arg("9").arg("h")).unwrap();
//! *nine.owner.lock().unwrap() = Some("alice".into());
//!
//! // Equal arguments give back the very same instance
//! let again = pool.construct(&Args::new().arg("9").arg("h")).unwrap();
//! assert!(Handle::ptr_eq(&nine, &again));
//! assert_eq!(again.owner.lock().unwrap().as_deref(), Some("alice"));
//!
//! // Once every handle is gone the entry disappears
//! drop((nine, again));
//! assert!(pool.snapshot().is_empty());
//! ```
//!
//! ## Many Types
//!
//! [`Factory`] keeps one pool per type, created on first use:
//!
//! ```rust,ignore
//! let factory = Factory::new();
//! let card = factory.construct::<Card>(&Args::new().arg("Q").arg("s"))?;
//! let font = factory.construct::<Font>(&Args::new().arg("serif").kwarg("size", 12))?;
//! ```
//!
//! ## Thread Safety
//!
//! Pools and factories are `Send + Sync`. Concurrent `construct` calls with equal
//! arguments run the initializer once and all receive the same instance. Handles can be
//! held across `.await` points; no lock is held once a call returns.

mod builder;
mod error;
mod factory;
mod handle;
mod key;
#[cfg(feature = "metrics")]
mod metrics;
mod pool;
mod shard;
mod traits;

pub use builder::PoolBuilder;
pub use error::{ArgPosition, BoxError, ConstructionError, Error, KeyDerivationError, Result};
pub use factory::Factory;
pub use handle::{Handle, WeakHandle};
pub use key::{Arg, Args, CacheKey, KeyPart};
#[cfg(feature = "metrics")]
pub use metrics::PoolMetrics;
pub use pool::{Pool, SnapshotEntry};
pub use traits::Pooled;
