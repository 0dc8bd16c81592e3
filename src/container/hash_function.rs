use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use xxhash_rust::xxh3::Xxh3;

/// Seeded 64-bit hash function for a given key type. The low bits of the
/// digest route to the directory and the next 16 bits pick the starting
/// probe slot inside a bucket, so the algorithm needs good avalanche in both
/// halves; xxh3 qualifies.
pub struct HashFunction<K> {
    seed: u64,
    _marker: PhantomData<K>,
}

impl<K> HashFunction<K> {
    /// Creates a new `HashFunction` with the default seed.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Creates a new `HashFunction` mixing `seed` into every digest.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            _marker: PhantomData,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl<K> Default for HashFunction<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> HashFunction<K>
where
    K: Hash,
{
    /// Returns the 64-bit digest of the given key.
    pub fn get_hash(&self, key: &K) -> u64 {
        let mut hasher = Xxh3::with_seed(self.seed);
        key.hash(&mut hasher);
        hasher.finish()
    }
}
