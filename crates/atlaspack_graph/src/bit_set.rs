use std::fmt;

use fixedbitset::FixedBitSet;

/// A set of small integers backed by a fixed size bit vector.
///
/// Reachability and availability sets are indexed by asset or bundle root
/// position, so every set in a single computation shares the same capacity.
/// Inserting past the capacity grows the set rather than panicking.
#[derive(Clone, Default, Eq, Hash, PartialEq)]
pub struct BitSet {
  bits: FixedBitSet,
}

impl BitSet {
  pub fn new(capacity: usize) -> Self {
    Self {
      bits: FixedBitSet::with_capacity(capacity),
    }
  }

  pub fn capacity(&self) -> usize {
    self.bits.len()
  }

  pub fn add(&mut self, bit: usize) {
    if bit >= self.bits.len() {
      self.bits.grow(bit + 1);
    }
    self.bits.insert(bit);
  }

  pub fn has(&self, bit: usize) -> bool {
    self.bits.contains(bit)
  }

  pub fn clear(&mut self) {
    self.bits.clear();
  }

  pub fn is_empty(&self) -> bool {
    self.bits.is_clear()
  }

  pub fn len(&self) -> usize {
    self.bits.count_ones(..)
  }

  /// In place union.
  pub fn union(&mut self, other: &BitSet) {
    self.bits.union_with(&other.bits);
  }

  /// In place intersection.
  pub fn intersect(&mut self, other: &BitSet) {
    self.bits.intersect_with(&other.bits);
  }

  /// Returns a new set containing the members of both sets.
  pub fn union_of(a: &BitSet, b: &BitSet) -> BitSet {
    let mut result = a.clone();
    result.union(b);
    result
  }

  /// Iterates members in ascending order.
  pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
    self.bits.ones()
  }
}

impl fmt::Debug for BitSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.iter()).finish()
  }
}

impl FromIterator<usize> for BitSet {
  fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
    let mut set = BitSet::default();
    for bit in iter {
      set.add(bit);
    }
    set
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn adds_members_once() {
    let mut set = BitSet::new(8);
    set.add(1);
    set.add(5);
    set.add(5);

    assert!(set.has(1));
    assert!(set.has(5));
    assert!(!set.has(2));
    assert_eq!(set.len(), 2);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 5]);
  }

  #[test]
  fn membership_outside_capacity_is_false() {
    let set = BitSet::new(4);
    assert!(!set.has(100));
  }

  #[test]
  fn add_grows_past_capacity() {
    let mut set = BitSet::new(2);
    set.add(10);

    assert!(set.has(10));
    assert!(set.capacity() >= 11);
  }

  #[test]
  fn union_and_intersect_are_in_place() {
    let mut a: BitSet = [1, 2, 3].into_iter().collect();
    let b: BitSet = [2, 3, 4].into_iter().collect();

    let mut intersection = a.clone();
    intersection.intersect(&b);
    assert_eq!(intersection.iter().collect::<Vec<_>>(), vec![2, 3]);

    a.union(&b);
    assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
  }

  #[test]
  fn union_of_leaves_inputs_untouched() {
    let a: BitSet = [0].into_iter().collect();
    let b: BitSet = [7].into_iter().collect();

    let both = BitSet::union_of(&a, &b);

    assert_eq!(both.iter().collect::<Vec<_>>(), vec![0, 7]);
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
  }

  #[test]
  fn clone_is_independent() {
    let mut a = BitSet::new(4);
    a.add(1);
    let mut b = a.clone();
    b.add(2);

    assert!(!a.has(2));
    assert!(b.has(1));
  }

  #[test]
  fn clear_empties_the_set() {
    let mut set: BitSet = [1, 3].into_iter().collect();
    assert!(!set.is_empty());

    set.clear();
    assert!(set.is_empty());
    assert_eq!(format!("{:?}", set), "{}");
  }
}
