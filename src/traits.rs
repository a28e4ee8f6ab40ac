use crate::key::Args;

/// A type whose instances are shared by construction arguments.
///
/// Implementors hold only intrinsic state. Anything that must be visible to every
/// holder of a shared instance after construction needs interior mutability
/// (`Mutex`, atomics), because handles only give out `&Self`.
///
/// # Example
///
/// ```
/// use flyweight_pool::{Args, Pooled};
///
/// struct Glyph {
///     ch: char,
/// }
///
/// #[derive(Debug)]
/// struct MissingChar;
///
/// impl std::fmt::Display for MissingChar {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str("expected a char argument")
///     }
/// }
///
/// impl std::error::Error for MissingChar {}
///
/// impl Pooled for Glyph {
///     type Error = MissingChar;
///
///     fn construct(args: &Args) -> Result<Self, Self::Error> {
///         let ch = args.get(0).and_then(|a| a.as_char()).ok_or(MissingChar)?;
///         Ok(Glyph { ch })
///     }
/// }
/// ```
pub trait Pooled: Sized + Send + Sync + 'static {
	/// Error raised by [`construct`](Pooled::construct).
	type Error: std::error::Error + Send + Sync + 'static;

	/// Build a new instance. Called only on a cache miss, never on a hit.
	fn construct(args: &Args) -> Result<Self, Self::Error>;
}
