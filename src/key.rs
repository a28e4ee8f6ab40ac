use std::any::TypeId;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{ArgPosition, KeyDerivationError};

/// A single construction argument.
///
/// Arguments are typed: the integer `1`, the string `"1"` and the float `1.0` are
/// three different arguments, and a sequence is never flattened into its parent.
/// All primitive integers widen to `i128`, so `1u8` and `1i64` are the same argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
	Unit,
	Bool(bool),
	Int(i128),
	Float(f64),
	Char(char),
	Str(String),
	Bytes(Vec<u8>),
	/// Ordered sequence; element order is significant.
	Seq(Vec<Arg>),
	/// Unordered collection; canonicalized by sorting.
	Set(Vec<Arg>),
	/// Key/value pairs; canonicalized by sorting on the key.
	Map(Vec<(Arg, Arg)>),
}

impl Arg {
	/// Raw byte string argument.
	pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
		Arg::Bytes(bytes.into())
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Arg::Str(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_int(&self) -> Option<i128> {
		match self {
			Arg::Int(i) => Some(*i),
			_ => None,
		}
	}

	pub fn as_float(&self) -> Option<f64> {
		match self {
			Arg::Float(f) => Some(*f),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Arg::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_char(&self) -> Option<char> {
		match self {
			Arg::Char(c) => Some(*c),
			_ => None,
		}
	}

	pub fn as_seq(&self) -> Option<&[Arg]> {
		match self {
			Arg::Seq(items) => Some(items),
			_ => None,
		}
	}
}

macro_rules! arg_from_int {
	($($ty:ty),*) => {
		$(
			impl From<$ty> for Arg {
				fn from(value: $ty) -> Self {
					Arg::Int(value as i128)
				}
			}
		)*
	};
}

arg_from_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize);

impl From<()> for Arg {
	fn from(_: ()) -> Self {
		Arg::Unit
	}
}

impl From<bool> for Arg {
	fn from(value: bool) -> Self {
		Arg::Bool(value)
	}
}

impl From<char> for Arg {
	fn from(value: char) -> Self {
		Arg::Char(value)
	}
}

impl From<f32> for Arg {
	fn from(value: f32) -> Self {
		Arg::Float(value as f64)
	}
}

impl From<f64> for Arg {
	fn from(value: f64) -> Self {
		Arg::Float(value)
	}
}

impl From<&str> for Arg {
	fn from(value: &str) -> Self {
		Arg::Str(value.to_owned())
	}
}

impl From<String> for Arg {
	fn from(value: String) -> Self {
		Arg::Str(value)
	}
}

impl From<&String> for Arg {
	fn from(value: &String) -> Self {
		Arg::Str(value.clone())
	}
}

impl From<Box<str>> for Arg {
	fn from(value: Box<str>) -> Self {
		Arg::Str(value.into())
	}
}

impl<T: Into<Arg>> From<Vec<T>> for Arg {
	fn from(value: Vec<T>) -> Self {
		Arg::Seq(value.into_iter().map(Into::into).collect())
	}
}

impl<T: Into<Arg>, const N: usize> From<[T; N]> for Arg {
	fn from(value: [T; N]) -> Self {
		Arg::Seq(value.into_iter().map(Into::into).collect())
	}
}

impl<T: Into<Arg>> From<BTreeSet<T>> for Arg {
	fn from(value: BTreeSet<T>) -> Self {
		Arg::Set(value.into_iter().map(Into::into).collect())
	}
}

impl<T: Into<Arg>, S> From<HashSet<T, S>> for Arg {
	fn from(value: HashSet<T, S>) -> Self {
		Arg::Set(value.into_iter().map(Into::into).collect())
	}
}

impl<K: Into<Arg>, V: Into<Arg>> From<BTreeMap<K, V>> for Arg {
	fn from(value: BTreeMap<K, V>) -> Self {
		Arg::Map(value.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}

impl<K: Into<Arg>, V: Into<Arg>, S> From<HashMap<K, V, S>> for Arg {
	fn from(value: HashMap<K, V, S>) -> Self {
		Arg::Map(value.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}

macro_rules! arg_from_tuple {
	($($ty:ident $var:ident),+) => {
		impl<$($ty: Into<Arg>),+> From<($($ty,)+)> for Arg {
			fn from(($($var,)+): ($($ty,)+)) -> Self {
				Arg::Seq(vec![$($var.into()),+])
			}
		}
	};
}

arg_from_tuple!(A a, B b);
arg_from_tuple!(A a, B b, C c);
arg_from_tuple!(A a, B b, C c, D d);

/// Construction arguments: positional values plus named keyword values.
///
/// ```
/// use flyweight_pool::Args;
///
/// let args = Args::new().arg("10").arg("h").kwarg("a", 1);
/// assert_eq!(args.str_at(0), Some("10"));
/// assert_eq!(args.keyword("a").and_then(|a| a.as_int()), Some(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
	positional: Vec<Arg>,
	keyword: Vec<(String, Arg)>,
}

impl Args {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a positional argument.
	pub fn arg(mut self, value: impl Into<Arg>) -> Self {
		self.positional.push(value.into());
		self
	}

	/// Append a keyword argument. Order relative to other keywords is irrelevant to the key.
	pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
		self.keyword.push((name.into(), value.into()));
		self
	}

	pub fn positional(&self) -> &[Arg] {
		&self.positional
	}

	/// Keyword arguments in the order they were given.
	pub fn keywords(&self) -> impl Iterator<Item = (&str, &Arg)> {
		self.keyword.iter().map(|(name, value)| (name.as_str(), value))
	}

	pub fn get(&self, index: usize) -> Option<&Arg> {
		self.positional.get(index)
	}

	pub fn keyword(&self, name: &str) -> Option<&Arg> {
		self.keyword.iter().find(|(n, _)| n == name).map(|(_, value)| value)
	}

	pub fn str_at(&self, index: usize) -> Option<&str> {
		self.get(index).and_then(Arg::as_str)
	}

	pub fn int_at(&self, index: usize) -> Option<i128> {
		self.get(index).and_then(Arg::as_int)
	}

	pub fn len(&self) -> usize {
		self.positional.len() + self.keyword.len()
	}

	pub fn is_empty(&self) -> bool {
		self.positional.is_empty() && self.keyword.is_empty()
	}
}

/// Canonical form of one [`Arg`]: totally ordered, hashable and structurally comparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
	Unit,
	Bool(bool),
	Int(i128),
	/// Bit pattern of a non-NaN float, with `-0.0` folded into `0.0`.
	Float(u64),
	Char(char),
	Str(Box<str>),
	Bytes(Box<[u8]>),
	Seq(Box<[KeyPart]>),
	Set(Box<[KeyPart]>),
	Map(Box<[(KeyPart, KeyPart)]>),
}

/// Failure while canonicalizing a single argument, before it is tied to a position.
enum PartError {
	NotANumber,
	DuplicateMapKey,
}

impl KeyPart {
	fn canonicalize(arg: &Arg) -> Result<Self, PartError> {
		Ok(match arg {
			Arg::Unit => KeyPart::Unit,
			Arg::Bool(b) => KeyPart::Bool(*b),
			Arg::Int(i) => KeyPart::Int(*i),
			Arg::Float(f) => {
				if f.is_nan() {
					return Err(PartError::NotANumber);
				}
				// -0.0 == 0.0 but their bits differ
				let f = if *f == 0.0 { 0.0 } else { *f };
				KeyPart::Float(f.to_bits())
			}
			Arg::Char(c) => KeyPart::Char(*c),
			Arg::Str(s) => KeyPart::Str(s.as_str().into()),
			Arg::Bytes(b) => KeyPart::Bytes(b.as_slice().into()),
			Arg::Seq(items) => KeyPart::Seq(
				items.iter().map(Self::canonicalize).collect::<Result<Vec<_>, _>>()?.into(),
			),
			Arg::Set(items) => {
				let mut parts =
					items.iter().map(Self::canonicalize).collect::<Result<Vec<_>, _>>()?;
				parts.sort_unstable();
				parts.dedup();
				KeyPart::Set(parts.into())
			}
			Arg::Map(entries) => {
				let mut parts = entries
					.iter()
					.map(|(k, v)| Ok::<_, PartError>((Self::canonicalize(k)?, Self::canonicalize(v)?)))
					.collect::<Result<Vec<_>, _>>()?;
				parts.sort_unstable_by(|a, b| a.0.cmp(&b.0));
				if parts.windows(2).any(|pair| pair[0].0 == pair[1].0) {
					return Err(PartError::DuplicateMapKey);
				}
				KeyPart::Map(parts.into())
			}
		})
	}
}

impl fmt::Display for KeyPart {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			KeyPart::Unit => f.write_str("()"),
			KeyPart::Bool(b) => write!(f, "{b}"),
			KeyPart::Int(i) => write!(f, "{i}"),
			KeyPart::Float(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
			KeyPart::Char(c) => write!(f, "{c:?}"),
			KeyPart::Str(s) => write!(f, "{s:?}"),
			KeyPart::Bytes(b) => write!(f, "b\"{}\"", b.escape_ascii()),
			KeyPart::Seq(items) => write_list(f, "[", items, "]"),
			KeyPart::Set(items) => write_list(f, "{", items, "}"),
			KeyPart::Map(entries) => {
				f.write_str("{")?;
				for (i, (k, v)) in entries.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{k}: {v}")?;
				}
				f.write_str("}")
			}
		}
	}
}

fn write_list(f: &mut fmt::Formatter<'_>, open: &str, items: &[KeyPart], close: &str) -> fmt::Result {
	f.write_str(open)?;
	for (i, item) in items.iter().enumerate() {
		if i > 0 {
			f.write_str(", ")?;
		}
		write!(f, "{item}")?;
	}
	f.write_str(close)
}

struct KeyData {
	type_id: TypeId,
	type_name: &'static str,
	positional: Box<[KeyPart]>,
	/// Sorted by name.
	keyword: Box<[(Box<str>, KeyPart)]>,
}

/// Canonical identity of a construction request: type plus normalized arguments.
///
/// Equal arguments of the same type always derive equal keys, regardless of the
/// order keyword arguments were given in. The hash is computed once at derivation
/// and the body is shared, so clones are a reference count bump.
#[derive(Clone)]
pub struct CacheKey {
	/// Pre-computed hash of (TypeId, positional, keyword)
	hash: u64,
	data: Arc<KeyData>,
}

impl CacheKey {
	/// Derive the key for constructing `T` from `args`.
	pub fn of<T: ?Sized + 'static>(args: &Args) -> Result<Self, KeyDerivationError> {
		Self::derive(TypeId::of::<T>(), short_type_name::<T>(), args)
	}

	/// Derive a key from an explicit type identity.
	///
	/// `type_name` is used for display and error messages only; identity comes from `type_id`.
	pub fn derive(
		type_id: TypeId,
		type_name: &'static str,
		args: &Args,
	) -> Result<Self, KeyDerivationError> {
		let positional = args
			.positional
			.iter()
			.enumerate()
			.map(|(index, arg)| {
				KeyPart::canonicalize(arg)
					.map_err(|err| part_error(err, type_name, ArgPosition::Positional(index)))
			})
			.collect::<Result<Vec<_>, _>>()?;

		let mut keyword = args
			.keyword
			.iter()
			.map(|(name, arg)| {
				let part = KeyPart::canonicalize(arg).map_err(|err| {
					part_error(err, type_name, ArgPosition::Keyword(name.clone()))
				})?;
				Ok::<_, KeyDerivationError>((Box::<str>::from(name.as_str()), part))
			})
			.collect::<Result<Vec<_>, _>>()?;
		keyword.sort_by(|a, b| a.0.cmp(&b.0));
		if let Some(pair) = keyword.windows(2).find(|pair| pair[0].0 == pair[1].0) {
			return Err(KeyDerivationError::DuplicateKeyword {
				type_name,
				name: pair[0].0.to_string(),
			});
		}

		let data = KeyData {
			type_id,
			type_name,
			positional: positional.into(),
			keyword: keyword.into(),
		};
		Ok(Self {
			hash: Self::compute_hash(&data),
			data: Arc::new(data),
		})
	}

	/// Compute the combined hash of TypeId and arguments.
	fn compute_hash(data: &KeyData) -> u64 {
		let mut hasher = ahash::AHasher::default();
		data.type_id.hash(&mut hasher);
		data.positional.hash(&mut hasher);
		data.keyword.hash(&mut hasher);
		hasher.finish()
	}

	pub fn type_id(&self) -> TypeId {
		self.data.type_id
	}

	pub fn type_name(&self) -> &'static str {
		self.data.type_name
	}

	pub fn positional(&self) -> &[KeyPart] {
		&self.data.positional
	}

	/// Keyword parts, sorted by name.
	pub fn keywords(&self) -> impl Iterator<Item = (&str, &KeyPart)> {
		self.data.keyword.iter().map(|(name, part)| (name.as_ref(), part))
	}

	pub(crate) fn precomputed_hash(&self) -> u64 {
		self.hash
	}
}

fn part_error(err: PartError, type_name: &'static str, position: ArgPosition) -> KeyDerivationError {
	match err {
		PartError::NotANumber => KeyDerivationError::NotANumber {
			type_name,
			position,
		},
		PartError::DuplicateMapKey => KeyDerivationError::DuplicateMapKey {
			type_name,
			position,
		},
	}
}

/// `std::any::type_name` without the module path of the outermost type.
///
/// Tuples, slices, arrays, references, pointers and trait objects keep their full name.
fn short_type_name<T: ?Sized>() -> &'static str {
	let full = std::any::type_name::<T>();
	let base = full.split('<').next().unwrap_or(full);
	if base.contains(['(', '[', '&', '*', ' ']) {
		return full;
	}
	match base.rfind("::") {
		Some(idx) => &full[idx + 2..],
		None => full,
	}
}

impl Hash for CacheKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		// Use pre-computed hash to avoid re-hashing on every lookup
		self.hash.hash(state);
	}
}

impl PartialEq for CacheKey {
	fn eq(&self, other: &Self) -> bool {
		if self.hash != other.hash {
			return false;
		}
		if Arc::ptr_eq(&self.data, &other.data) {
			return true;
		}
		self.data.type_id == other.data.type_id
			&& self.data.positional == other.data.positional
			&& self.data.keyword == other.data.keyword
	}
}

impl Eq for CacheKey {}

/// Orders by type identity, then arguments. `type_name` is display-only and never compared,
/// so the order agrees with `Eq`.
impl Ord for CacheKey {
	fn cmp(&self, other: &Self) -> Ordering {
		self.data
			.type_id
			.cmp(&other.data.type_id)
			.then_with(|| self.data.positional.cmp(&other.data.positional))
			.then_with(|| self.data.keyword.cmp(&other.data.keyword))
	}
}

impl PartialOrd for CacheKey {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl fmt::Display for CacheKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}(", self.data.type_name)?;
		let mut first = true;
		for part in self.data.positional.iter() {
			if !first {
				f.write_str(", ")?;
			}
			first = false;
			write!(f, "{part}")?;
		}
		for (name, part) in self.data.keyword.iter() {
			if !first {
				f.write_str(", ")?;
			}
			first = false;
			write!(f, "{name}={part}")?;
		}
		f.write_str(")")
	}
}

impl fmt::Debug for CacheKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CacheKey")
			.field("type_name", &self.data.type_name)
			.field("hash", &self.hash)
			.field("args", &format_args!("{self}"))
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Card;
	struct Tile;

	fn key<T: 'static>(args: Args) -> CacheKey {
		CacheKey::of::<T>(&args).expect("key should derive")
	}

	#[test]
	fn test_equal_args_equal_keys() {
		let a = key::<Card>(Args::new().arg("9").arg("h"));
		let b = key::<Card>(Args::new().arg("9").arg("h"));

		assert_eq!(a, b);
		assert_eq!(a.precomputed_hash(), b.precomputed_hash());
	}

	#[test]
	fn test_keyword_order_is_irrelevant() {
		let a = key::<Card>(Args::new().kwarg("a", 1).kwarg("b", 2));
		let b = key::<Card>(Args::new().kwarg("b", 2).kwarg("a", 1));

		assert_eq!(a, b);
		assert_eq!(a.to_string(), "Card(a=1, b=2)");
	}

	#[test]
	fn test_type_identity_is_part_of_key() {
		let card = key::<Card>(Args::new().arg("9").arg("h"));
		let tile = key::<Tile>(Args::new().arg("9").arg("h"));

		assert_ne!(card, tile);
		assert_eq!(card.type_id(), TypeId::of::<Card>());
	}

	#[test]
	fn test_no_string_concatenation_collision() {
		let joined = key::<Card>(Args::new().arg("1,2"));
		let split = key::<Card>(Args::new().arg("1").arg("2"));
		let concat = key::<Card>(Args::new().arg("12"));

		assert_ne!(joined, split);
		assert_ne!(concat, split);
	}

	#[test]
	fn test_argument_types_are_distinct() {
		let int = key::<Card>(Args::new().arg(1));
		let string = key::<Card>(Args::new().arg("1"));
		let float = key::<Card>(Args::new().arg(1.0));
		let nested = key::<Card>(Args::new().arg(vec![1]));

		assert_ne!(int, string);
		assert_ne!(int, float);
		assert_ne!(int, nested);
	}

	#[test]
	fn test_integer_widths_unify() {
		assert_eq!(key::<Card>(Args::new().arg(7u8)), key::<Card>(Args::new().arg(7i64)));
	}

	#[test]
	fn test_positional_and_keyword_differ() {
		let positional = key::<Card>(Args::new().arg(1));
		let keyword = key::<Card>(Args::new().kwarg("a", 1));
		assert_ne!(positional, keyword);
	}

	#[test]
	fn test_nan_is_rejected() {
		let err = CacheKey::of::<Card>(&Args::new().arg("x").arg(vec![1.0, f64::NAN]))
			.expect_err("NaN must not derive a key");

		assert_eq!(
			err,
			KeyDerivationError::NotANumber {
				type_name: "Card",
				position: ArgPosition::Positional(1),
			}
		);
	}

	#[test]
	fn test_negative_zero_folds() {
		assert_eq!(key::<Card>(Args::new().arg(-0.0)), key::<Card>(Args::new().arg(0.0)));
	}

	#[test]
	fn test_duplicate_keyword_is_rejected() {
		let err = CacheKey::of::<Card>(&Args::new().kwarg("a", 1).kwarg("a", 2))
			.expect_err("duplicate keyword must not derive a key");

		assert!(matches!(err, KeyDerivationError::DuplicateKeyword { ref name, .. } if name == "a"));
	}

	#[test]
	fn test_duplicate_map_key_is_rejected() {
		let map = Arg::Map(vec![(Arg::Float(0.0), Arg::Int(1)), (Arg::Float(-0.0), Arg::Int(2))]);
		let err = CacheKey::of::<Card>(&Args::new().kwarg("m", map))
			.expect_err("colliding map keys must not derive a key");

		assert_eq!(
			err,
			KeyDerivationError::DuplicateMapKey {
				type_name: "Card",
				position: ArgPosition::Keyword("m".to_string()),
			}
		);
	}

	#[test]
	fn test_hashed_collections_are_canonical() {
		let a: HashSet<u32> = [3, 1, 2].into_iter().collect();
		let b: HashSet<u32> = [2, 3, 1].into_iter().collect();
		assert_eq!(key::<Card>(Args::new().arg(a)), key::<Card>(Args::new().arg(b)));

		let m1: HashMap<&str, i32> = [("x", 1), ("y", 2)].into_iter().collect();
		let m2: BTreeMap<&str, i32> = [("y", 2), ("x", 1)].into_iter().collect();
		assert_eq!(key::<Card>(Args::new().arg(m1)), key::<Card>(Args::new().arg(m2)));
	}

	#[test]
	fn test_set_and_sequence_differ() {
		let set: BTreeSet<u32> = [1, 2].into_iter().collect();
		assert_ne!(key::<Card>(Args::new().arg(set)), key::<Card>(Args::new().arg(vec![1u32, 2])));
	}

	#[test]
	fn test_display() {
		let k = key::<Card>(Args::new().arg("10").arg('h').arg((1, 2.5)).kwarg("tag", Arg::bytes(*b"ab")));
		assert_eq!(k.to_string(), "Card(\"10\", 'h', [1, 2.5], tag=b\"ab\")");
	}

	#[test]
	fn test_short_type_name() {
		assert_eq!(short_type_name::<Card>(), "Card");
		assert_eq!(short_type_name::<Vec<Card>>(), "Vec<flyweight_pool::key::tests::Card>");
		assert_eq!(short_type_name::<(Card, Arg)>(), std::any::type_name::<(Card, Arg)>());
		assert_eq!(short_type_name::<[Card]>(), std::any::type_name::<[Card]>());
		assert_eq!(short_type_name::<&str>(), "&str");
	}

	#[test]
	fn test_type_name_does_not_affect_identity_or_order() {
		let args = Args::new().arg(1);
		let a = CacheKey::derive(TypeId::of::<Card>(), "A", &args).expect("key should derive");
		let b = CacheKey::derive(TypeId::of::<Card>(), "B", &args).expect("key should derive");

		assert_eq!(a, b);
		assert_eq!(a.cmp(&b), Ordering::Equal);

		let mut set = BTreeSet::new();
		set.insert(a);
		assert!(!set.insert(b));
	}

	#[test]
	fn test_ordering_is_total_and_consistent() {
		let mut keys = vec![
			key::<Card>(Args::new().arg(2)),
			key::<Card>(Args::new().arg(1)),
			key::<Card>(Args::new().arg(1)),
		];
		keys.sort();
		assert_eq!(keys[0], keys[1]);
		assert_eq!(keys[0].cmp(&keys[1]), Ordering::Equal);
		assert!(keys[1] < keys[2]);
	}
}
