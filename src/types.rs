use indexmap::IndexMap as _IndexMap;
use rustc_hash::FxBuildHasher;
use std::collections::HashSet as _HashSet;

/// Boxed, thread-safe error used as the cause of a failed worker.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Position of a work item inside a fan-out, starting at zero.
pub type WorkIndex = usize;

/// `IndexMap` type with fast hasher.
pub type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
pub(crate) type HashSet<T> = _HashSet<T, FxBuildHasher>;
