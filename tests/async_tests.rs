//! Tests for async usage patterns.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flyweight_pool::{Args, Factory, Handle, Pool, Pooled};

#[derive(Debug)]
struct Session {
	user: String,
	requests: AtomicUsize,
}

impl Pooled for Session {
	type Error = std::convert::Infallible;

	fn construct(args: &Args) -> Result<Self, Self::Error> {
		Ok(Session {
			user: args.str_at(0).unwrap_or("anonymous").to_string(),
			requests: AtomicUsize::new(0),
		})
	}
}

#[tokio::test]
async fn test_handle_held_across_await() {
	let pool = Pool::<Session>::new();

	let session = pool.construct(&Args::new().arg("ada")).unwrap();

	// Handles hold no lock, so awaiting while holding one is fine
	tokio::time::sleep(tokio::time::Duration::from_millis(1)).await;

	let again = pool.construct(&Args::new().arg("ada")).unwrap();
	assert!(Handle::ptr_eq(&session, &again));
	assert_eq!(session.user, "ada");
}

#[tokio::test]
async fn test_concurrent_async_tasks_share_instances() {
	let pool = Pool::<Session>::new();
	let users = ["ada", "grace", "linus", "barbara"];

	// Keep one handle per user alive for the whole test
	let anchors: Vec<_> =
		users.iter().map(|user| pool.construct(&Args::new().arg(*user)).unwrap()).collect();

	let mut tasks = vec![];
	for task_id in 0..10 {
		let pool = pool.clone();
		tasks.push(tokio::spawn(async move {
			for i in 0..100 {
				let user = users[(task_id + i) % users.len()];
				let session = pool.construct(&Args::new().arg(user)).unwrap();
				session.requests.fetch_add(1, Ordering::Relaxed);
				tokio::time::sleep(tokio::time::Duration::from_micros(1)).await;
			}
		}));
	}

	for task in tasks {
		task.await.unwrap();
	}

	let total: usize = anchors.iter().map(|s| s.requests.load(Ordering::Relaxed)).sum();
	assert_eq!(total, 10 * 100, "every request landed on an anchored instance");
	assert_eq!(pool.len(), users.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_construct_from_many_tasks() {
	let factory = Arc::new(Factory::new());

	let tasks: Vec<_> = (0..20)
		.map(|_| {
			let factory = factory.clone();
			tokio::task::spawn_blocking(move || {
				factory.construct::<Session>(&Args::new().arg("shared")).unwrap()
			})
		})
		.collect();

	let mut handles = Vec::new();
	for task in tasks {
		handles.push(task.await.unwrap());
	}

	assert!(handles.iter().all(|h| Handle::ptr_eq(h, &handles[0])));
	assert_eq!(factory.snapshot::<Session>().len(), 1);
}

#[tokio::test]
async fn test_release_after_tasks_finish() {
	let pool = Pool::<Session>::new();

	let tasks: Vec<_> = (0..20)
		.map(|i| {
			let pool = pool.clone();
			tokio::spawn(async move {
				let session = pool.construct(&Args::new().arg(format!("user-{i}"))).unwrap();
				tokio::time::sleep(tokio::time::Duration::from_micros(10)).await;
				session.requests.fetch_add(1, Ordering::Relaxed);
			})
		})
		.collect();

	for task in tasks {
		task.await.unwrap();
	}

	pool.purge();
	assert!(pool.is_empty());
}
