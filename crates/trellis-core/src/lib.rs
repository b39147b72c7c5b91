//! Declarative tree reconciliation for retained-mode node libraries.
//!
//! Components are plain functions from props to an [`Element`] tree. A
//! [`RenderContext`] expands that tree (render phase), then diffs it
//! against the previous pass and applies the minimal set of node
//! operations through a [`Backend`] (consolidation phase), repeating the
//! two until no state change is flagged. Hooks ([`use_state`],
//! [`use_effect`], [`use_memo`], ...) attach per-instance state to the
//! component whose render function is executing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

mod context;
pub mod element;
pub mod error;
pub mod hooks;
pub mod node;
pub mod render;

pub use element::{
    component, Component, DeclSite, Element, ElementId, FunctionComponent, Props, RenderFn,
};
pub use error::{InvariantViolation, RenderError, RenderErrorKind};
pub use hooks::{
    cleanup, force_update, get_node, provide_context, use_callback, use_context, use_effect,
    use_effect_deps, use_memo, use_reducer, use_ref, use_state, use_state_eq, use_state_keyed,
    Dispatch, MutableRef, SetState,
};
pub use node::{
    Backend, NativeType, NodeError, NodeId, ObserverId, PropHandler, PropMap, PropSpec, PropValue,
    TargetNode,
};
pub use render::{render, render_fixed, RenderContext, DEFAULT_MAX_ITERATIONS};

pub(crate) type Map<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;
pub(crate) type Set<T> = hashbrown::HashSet<T, ahash::RandomState>;

/// Key under which every root element renders.
pub const ROOT_KEY: &str = "ROOT::";

/// Child key paths are plain concatenations of their ancestors' keys.
pub fn join_key(parent: &str, key: &str) -> String {
    format!("{parent}{key}")
}

/// Stable-within-a-process hash used for effect/memo dependency values.
pub fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
