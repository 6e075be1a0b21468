use core::{
	borrow::Borrow,
	hash::{BuildHasher, Hash},
};
use hashbrown::{
	hash_map::{DefaultHashBuilder, Entry},
	HashMap,
};
use num_traits::{CheckedAdd, CheckedSub, One, Zero};

/// A map of counted entries. Entries whose count drops to zero stay until drained by [`RcHashMap::drain_weak`].
pub struct RcHashMap<K, C, V, S = DefaultHashBuilder>(HashMap<K, (C, V), S>)
where
	K: Hash + Eq,
	C: CheckedAdd + CheckedSub + One + Zero,
	S: BuildHasher;
impl<K, C, V, S> Default for RcHashMap<K, C, V, S>
where
	K: Hash + Eq,
	C: CheckedAdd + CheckedSub + One + Zero,
	S: Default + BuildHasher,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<K, C, V, S> RcHashMap<K, C, V, S>
where
	K: Hash + Eq,
	C: CheckedAdd + CheckedSub + One + Zero,
	S: BuildHasher,
{
	#[must_use]
	pub fn new() -> Self
	where
		S: Default,
	{
		Self(HashMap::with_hasher(S::default()))
	}

	/// Returns the value and whether it was newly inserted.
	pub fn increment_or_insert_with<F: FnOnce() -> V>(&mut self, k: K, v: F) -> Result<(&mut V, bool), CountSaturatedError> {
		match self.0.entry(k) {
			Entry::Occupied(occupied) => {
				let (c, v) = occupied.into_mut();
				let revived = c.is_zero();
				*c = c.checked_add(&C::one()).ok_or(CountSaturatedError)?;
				Ok((v, revived))
			}
			Entry::Vacant(vacant) => {
				let (_, v) = vacant.insert((C::one(), v()));
				Ok((v, true))
			}
		}
	}

	pub fn weak_decrement<Q: ?Sized>(&mut self, k: &Q) -> Result<Option<&mut V>, CountSaturatedError>
	where
		K: Borrow<Q>,
		Q: Eq + Hash,
	{
		match self.0.get_mut(k) {
			Some((c, v)) => {
				*c = c.checked_sub(&C::one()).ok_or(CountSaturatedError)?;
				Ok(Some(v))
			}
			None => Ok(None),
		}
	}

	/// Removes and yields all entries with a count of zero.
	pub fn drain_weak(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
		self.0.drain_filter(|_, (c, _)| c.is_zero()).map(|(k, (_, v))| (k, v))
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSaturatedError;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn entries_are_drained_once_unreferenced() {
		let mut map = RcHashMap::<&str, u8, u32>::new();
		assert_eq!(map.increment_or_insert_with("a", || 1).unwrap(), (&mut 1, true));
		assert_eq!(map.increment_or_insert_with("a", || 2).unwrap(), (&mut 1, false));
		map.weak_decrement("a").unwrap();
		assert_eq!(map.drain_weak().count(), 0);
		map.weak_decrement("a").unwrap();
		assert_eq!(map.drain_weak().collect::<Vec<_>>(), vec![("a", 1)]);
		assert!(map.is_empty());
	}

	#[test]
	fn decrementing_below_zero_is_an_error() {
		let mut map = RcHashMap::<&str, u8, ()>::new();
		map.increment_or_insert_with("a", || ()).unwrap();
		map.weak_decrement("a").unwrap();
		assert_eq!(map.weak_decrement("a").unwrap_err(), CountSaturatedError);
	}
}
