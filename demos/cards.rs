//! Example dealing cards from a shared deck: each (value, suit) exists once,
//! while the seat is extrinsic state set by whoever holds the card.

use std::sync::Mutex;

use flyweight_pool::{Args, Factory, Handle, PoolBuilder, Pooled};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
#[error("unknown suit `{0}`")]
struct UnknownSuit(String);

#[derive(Debug)]
struct Card {
	value: String,
	suit: char,
	seat: Mutex<Option<u8>>,
}

impl Pooled for Card {
	type Error = UnknownSuit;

	fn construct(args: &Args) -> Result<Self, Self::Error> {
		let value = args.keyword("value").and_then(|a| a.as_str()).unwrap_or("?");
		let suit = args.keyword("suit").and_then(|a| a.as_str()).unwrap_or_default();
		let suit = match suit {
			"h" => '♥',
			"d" => '♦',
			"c" => '♣',
			"s" => '♠',
			other => return Err(UnknownSuit(other.to_string())),
		};
		Ok(Card {
			value: value.to_string(),
			suit,
			seat: Mutex::new(None),
		})
	}
}

fn card(value: &str, suit: &str) -> Args {
	Args::new().kwarg("value", value).kwarg("suit", suit)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();

	// Keep dead entries around so the snapshot can show them
	let factory = Factory::with_builder(PoolBuilder::new().prune_on_release(false));

	let first = factory.construct::<Card>(&card("9", "h"))?;
	let second = factory.construct::<Card>(&card("9", "h"))?;
	println!("same instance: {}", Handle::ptr_eq(&first, &second));

	*first.seat.lock().map_err(|_| "poisoned")? = Some(3);
	println!(
		"seat seen through second handle: {:?}",
		*second.seat.lock().map_err(|_| "poisoned")?
	);

	drop(first);
	drop(second);
	for entry in factory.snapshot::<Card>() {
		println!("{} alive={}", entry.key, entry.alive);
	}

	let third = factory.construct::<Card>(&card("9", "h"))?;
	println!(
		"rebuilt {}{} with seat {:?}",
		third.value,
		third.suit,
		*third.seat.lock().map_err(|_| "poisoned")?
	);

	match factory.construct::<Card>(&card("J", "x")) {
		Ok(_) => println!("unexpected card"),
		Err(err) => {
			let cause = std::error::Error::source(&err).map(|s| s.to_string()).unwrap_or_default();
			println!("error: {err} ({cause})");
		}
	}

	#[cfg(feature = "metrics")]
	println!("{:?}", factory.pool::<Card>().metrics());

	Ok(())
}
