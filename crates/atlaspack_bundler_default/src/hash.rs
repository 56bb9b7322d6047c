use xxhash_rust::xxh3::xxh3_128;
use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh3::Xxh3;

/// Hasher used for asset, dependency and environment ids
pub type IdentifierHasher = Xxh3;

pub fn hash_string(s: impl AsRef<str>) -> String {
  format!("{:016x}", xxh3_64(s.as_ref().as_bytes()))
}

/// Picks which of `split` sibling bundles a manual shared bundle member lands in
///
/// The shard is derived from the asset id alone, so it does not change between
/// builds as long as the asset keeps its id.
pub fn manual_shared_bundle_shard(asset_id: &str, split: u32) -> u32 {
  let shard = xxh3_128(asset_id.as_bytes()).checked_rem(u128::from(split));
  shard.and_then(|s| u32::try_from(s).ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn hash_string_is_zero_padded_hex() {
    let hash = hash_string("bundle:index.js");
    assert_eq!(hash.len(), 16);
    assert_eq!(hash, hash_string("bundle:index.js"));
  }

  #[test]
  fn shard_is_within_split() {
    for id in ["a", "b", "c", "d", "e"] {
      assert!(manual_shared_bundle_shard(id, 3) < 3);
      assert_eq!(manual_shared_bundle_shard(id, 1), 0);
    }
  }

  #[test]
  fn shard_of_zero_split_is_zero() {
    assert_eq!(manual_shared_bundle_shard("a", 0), 0);
  }
}
