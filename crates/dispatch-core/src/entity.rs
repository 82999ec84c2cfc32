//! Entity abstraction shared by repositories and change tracking.

use crate::changes::TrackedEntity;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::cmp::Ordering;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// A persistent aggregate with identity and an optimistic-concurrency version.
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: Copy
        + Eq
        + Ord
        + Hash
        + Debug
        + Display
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
    type Filter: EntityFilter<Self>;
    type Sort: EntitySort<Self>;

    /// Singular name, used in errors and cache keys.
    const NAME: &'static str;

    fn id(&self) -> Self::Id;

    /// Version read from storage; compared on update and delete.
    fn version(&self) -> u64;

    /// Used by persistence adapters after a successful write.
    fn set_version(&mut self, version: u64);

    fn into_tracked(self) -> TrackedEntity;
}

/// Serializable predicate over an entity.
///
/// Filters are plain data so they can be turned into SQL and into stable
/// cache keys.
pub trait EntityFilter<E>:
    Clone + Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn matches(&self, entity: &E) -> bool;
}

/// Serializable ordering over an entity.
pub trait EntitySort<E>:
    Copy + Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn compare(&self, a: &E, b: &E) -> Ordering;
}

/// Case-insensitive substring match used by the name filters.
pub(crate) fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
