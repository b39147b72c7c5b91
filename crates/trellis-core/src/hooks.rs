//! Hooks: per-component-instance state, effects, memoization and context
//! values. All of them resolve against the component whose render function
//! is currently executing, so they may only be called from inside one.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use crate::context::{EffectFn, MemoEntry};
use crate::element::Element;
use crate::error::RenderError;
use crate::node::NodeId;
use crate::render::{with_active_inner, RenderInner};
use crate::hash_key;

type EqFn<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Setter half of a state slot. Cloneable and usable from handlers and
/// effects; holds only weak references, so it quietly becomes a no-op when
/// the owning component instance is gone.
pub struct SetState<T> {
    value: Weak<RefCell<T>>,
    inner: Weak<RenderInner>,
    key: String,
    eq: EqFn<T>,
}

impl<T> std::fmt::Debug for SetState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetState")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<T> Clone for SetState<T> {
    fn clone(&self) -> Self {
        Self {
            value: Weak::clone(&self.value),
            inner: Weak::clone(&self.inner),
            key: self.key.clone(),
            eq: Rc::clone(&self.eq),
        }
    }
}

impl<T: 'static> SetState<T> {
    /// Store a new value. Equal values (under the slot's equality) are
    /// suppressed entirely; otherwise a re-render is scheduled, deferred if
    /// a pass is already in flight.
    pub fn set(&self, new: T) -> Result<(), RenderError> {
        let Some(cell) = self.value.upgrade() else {
            log::debug!("setter for {:?} outlived its component; ignoring", self.key);
            return Ok(());
        };
        let changed = {
            let mut current = cell.borrow_mut();
            if (self.eq)(&current, &new) {
                false
            } else {
                *current = new;
                true
            }
        };
        if !changed {
            log::debug!("state {:?} unchanged; no render scheduled", self.key);
            return Ok(());
        }
        match self.inner.upgrade() {
            Some(inner) => inner.schedule_update(format!("state {:?} changed", self.key)),
            None => Ok(()),
        }
    }

    /// Compute the new value from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<(), RenderError> {
        let Some(cell) = self.value.upgrade() else {
            return Ok(());
        };
        let new = f(&cell.borrow());
        self.set(new)
    }
}

fn state_cell<T: 'static>(
    key: Option<String>,
    initial: impl FnOnce() -> T,
) -> Result<(Rc<RefCell<T>>, String, Rc<RenderInner>), RenderError> {
    with_active_inner(|inner| {
        let context = Rc::clone(&inner.current.borrow());
        let key = match key {
            Some(key) => key,
            None => {
                let index = context.state_index.get();
                context.state_index.set(index + 1);
                format!("__state_{index}")
            }
        };
        let existing: Option<Rc<RefCell<T>>> = context
            .state
            .borrow()
            .get(&key)
            .and_then(|slot| slot.downcast_ref::<Rc<RefCell<T>>>())
            .map(Rc::clone);
        let cell = match existing {
            Some(cell) => cell,
            None => {
                let cell = Rc::new(RefCell::new(initial()));
                context
                    .state
                    .borrow_mut()
                    .insert(key.clone(), Box::new(Rc::clone(&cell)));
                cell
            }
        };
        Ok((cell, key, Rc::clone(inner)))
    })
}

fn state_slot<T: Clone + 'static>(
    key: Option<String>,
    initial: impl FnOnce() -> T,
    eq: EqFn<T>,
) -> Result<(T, SetState<T>), RenderError> {
    let (cell, key, inner) = state_cell(key, initial)?;
    let value = cell.borrow().clone();
    let setter = SetState {
        value: Rc::downgrade(&cell),
        inner: Rc::downgrade(&inner),
        key,
        eq,
    };
    Ok((value, setter))
}

/// A state slot addressed by call order. First render stores `initial()`;
/// later renders return the stored value.
pub fn use_state<T: Clone + PartialEq + 'static>(
    initial: impl FnOnce() -> T,
) -> Result<(T, SetState<T>), RenderError> {
    state_slot(None, initial, Rc::new(|a: &T, b: &T| a == b))
}

/// Like [`use_state`] but addressed by an explicit key, independent of call
/// order.
pub fn use_state_keyed<T: Clone + PartialEq + 'static>(
    key: impl Into<String>,
    initial: impl FnOnce() -> T,
) -> Result<(T, SetState<T>), RenderError> {
    state_slot(Some(key.into()), initial, Rc::new(|a: &T, b: &T| a == b))
}

/// Like [`use_state`] with a custom equality used for setter suppression.
pub fn use_state_eq<T: Clone + 'static>(
    initial: impl FnOnce() -> T,
    eq: impl Fn(&T, &T) -> bool + 'static,
) -> Result<(T, SetState<T>), RenderError> {
    state_slot(None, initial, Rc::new(eq))
}

/// Wrap a closure's return value for use as an effect cleanup.
pub fn cleanup(f: impl FnOnce() + 'static) -> Option<Box<dyn FnOnce()>> {
    Some(Box::new(f))
}

fn effect_slot(run: EffectFn, deps: Option<u64>) -> Result<(), RenderError> {
    with_active_inner(|inner| {
        let context = Rc::clone(&inner.current.borrow());
        inner.register_effect(&context, run, deps);
        Ok(())
    })
}

/// Schedule `effect` to run after this component's subtree consolidates.
/// With no dependency value it reruns (after cleaning up) on every
/// consolidation.
pub fn use_effect(
    effect: impl FnOnce() -> Option<Box<dyn FnOnce()>> + 'static,
) -> Result<(), RenderError> {
    effect_slot(Box::new(effect), None)
}

/// Like [`use_effect`], but the effect only reruns when the hash of `deps`
/// changes; an unchanged registration is discarded without running.
pub fn use_effect_deps<D: Hash>(
    effect: impl FnOnce() -> Option<Box<dyn FnOnce()>> + 'static,
    deps: &D,
) -> Result<(), RenderError> {
    effect_slot(Box::new(effect), Some(hash_key(deps)))
}

/// Cache a computed value, recomputing only when the hash of `deps`
/// changes.
pub fn use_memo<T: Clone + 'static, D: Hash>(
    compute: impl FnOnce() -> T,
    deps: &D,
) -> Result<T, RenderError> {
    with_active_inner(|inner| {
        let context = Rc::clone(&inner.current.borrow());
        let index = context.memo_index.get();
        context.memo_index.set(index + 1);
        let deps = hash_key(deps);
        let cached: Option<T> = {
            let memo = context.memo.borrow();
            memo.get(index)
                .filter(|entry| entry.deps == deps)
                .and_then(|entry| entry.value.downcast_ref::<T>())
                .cloned()
        };
        if let Some(value) = cached {
            return Ok(value);
        }
        let value = compute();
        let entry = MemoEntry {
            value: Rc::new(value.clone()),
            deps,
        };
        let mut memo = context.memo.borrow_mut();
        if index < memo.len() {
            memo[index] = entry;
        } else {
            memo.push(entry);
        }
        Ok(value)
    })
}

/// Memoize a closure; the same `Rc` comes back while `deps` is unchanged,
/// so it stays pointer-equal for handler-binding purposes.
pub fn use_callback<F: 'static, D: Hash>(
    build: impl FnOnce() -> F,
    deps: &D,
) -> Result<Rc<F>, RenderError> {
    use_memo(|| Rc::new(build()), deps)
}

/// Mutable cell surviving re-renders without ever scheduling one.
pub struct MutableRef<T> {
    cell: Rc<RefCell<T>>,
}

impl<T> Clone for MutableRef<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> MutableRef<T> {
    pub fn set(&self, value: T) {
        *self.cell.borrow_mut() = value;
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.borrow())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.cell.borrow_mut())
    }
}

impl<T: Clone> MutableRef<T> {
    pub fn get(&self) -> T {
        self.cell.borrow().clone()
    }
}

/// A [`MutableRef`] slot, sharing cursor space with [`use_state`].
pub fn use_ref<T: 'static>(initial: impl FnOnce() -> T) -> Result<MutableRef<T>, RenderError> {
    let (cell, _, _) = state_cell(None, initial)?;
    Ok(MutableRef { cell })
}

/// Dispatcher half of [`use_reducer`]. Cloneable; actions fold into the
/// state through the reducer and schedule a re-render.
pub struct Dispatch<A> {
    dispatch: Rc<dyn Fn(A) -> Result<(), RenderError>>,
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self {
            dispatch: Rc::clone(&self.dispatch),
        }
    }
}

impl<A> Dispatch<A> {
    pub fn dispatch(&self, action: A) -> Result<(), RenderError> {
        (self.dispatch)(action)
    }
}

/// State folded through a reducer. Every dispatched action schedules a
/// re-render; no equality suppression is applied.
pub fn use_reducer<S: Clone + 'static, A: 'static>(
    reduce: impl Fn(&S, A) -> S + 'static,
    initial: impl FnOnce() -> S,
) -> Result<(S, Dispatch<A>), RenderError> {
    let (state, setter) = state_slot(None, initial, Rc::new(|_: &S, _: &S| false))?;
    let reduce = Rc::new(reduce);
    let dispatch = Rc::new(move |action: A| setter.update(|current| reduce(current, action)));
    Ok((state, Dispatch { dispatch }))
}

/// Publish a value to this component's subtree, retrievable with
/// [`use_context`] under the same key.
pub fn provide_context<T: 'static>(key: impl Into<String>, value: T) -> Result<(), RenderError> {
    with_active_inner(|inner| {
        let context = Rc::clone(&inner.current.borrow());
        context.provided.borrow_mut().insert(key.into(), Rc::new(value));
        Ok(())
    })
}

/// Find the nearest provided value under `key`, walking from this component
/// up through its ancestors. Fails with `ContextNotFound` when no ancestor
/// provided one (or the provided value has a different type).
pub fn use_context<T: 'static>(key: &str) -> Result<Rc<T>, RenderError> {
    with_active_inner(|inner| {
        let context = Rc::clone(&inner.current.borrow());
        let value = context
            .lookup_provided(key)
            .ok_or_else(|| RenderError::context_not_found(key))?;
        value
            .downcast::<T>()
            .map_err(|_| RenderError::context_not_found(key))
    })
}

/// The live target node behind an element of the current tree. Only valid
/// once the element has consolidated, e.g. from inside an effect.
pub fn get_node(element: &Element) -> Result<NodeId, RenderError> {
    with_active_inner(|inner| inner.node_for(element))
}

/// Flag a state change without going through a state slot; the current
/// cycle re-runs before consolidating.
pub fn force_update() -> Result<(), RenderError> {
    with_active_inner(|inner| inner.schedule_update("force_update".into()))
}
