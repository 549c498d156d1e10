//! Collection type aliases that switch hashers based on feature flags.
//!
//! With the `gxhash` feature the maps use `GxBuildHasher`, which needs AES-NI
//! and SSE2 (or NEON on aarch64). Without it they fall back to the std
//! `RandomState`. Build collections with `::default()` so both configurations
//! share one call site.

/// Hasher used by every map and set in the crate
#[cfg(feature = "gxhash")]
pub type BuildHasher = gxhash::GxBuildHasher;

/// Hasher used by every map and set in the crate
#[cfg(not(feature = "gxhash"))]
pub type BuildHasher = std::collections::hash_map::RandomState;

/// Unordered map keyed by node or type identity
pub type HashMap<K, V> = std::collections::HashMap<K, V, BuildHasher>;

/// Unordered set of identities
pub type HashSet<T> = std::collections::HashSet<T, BuildHasher>;

/// Map that remembers first-insertion order (chronological recording order)
pub type IndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasher>;

/// Set that remembers first-insertion order
pub type IndexSet<T> = indexmap::IndexSet<T, BuildHasher>;
