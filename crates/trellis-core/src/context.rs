//! Per-component-instance state: hook slots, pending/committed element
//! maps, child contexts and node ownership.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::element::{Element, ElementId};
use crate::Set;

pub(crate) type ContextRef = Rc<ComponentContext>;

/// State attached to one function-component instance at one key path.
/// Created the first time the component renders there, reused while the
/// same component occupies the key, torn down when its invoking element is
/// removed during consolidation.
pub(crate) struct ComponentContext {
    /// Back-reference only; the parent owns us through `children`.
    pub(crate) parent: RefCell<Weak<ComponentContext>>,
    /// The element in the parent context that invoked this component.
    pub(crate) invoke_element: RefCell<Option<Element>>,
    /// Root element returned by the render function.
    pub(crate) root_element: RefCell<Option<Element>>,
    /// key -> element rendered this pass; moves to `elements` as each entry
    /// is consolidated.
    pub(crate) elements_next: RefCell<BTreeMap<String, Element>>,
    /// key -> element from the previous consolidation.
    pub(crate) elements: RefCell<BTreeMap<String, Element>>,
    /// key -> child context published this pass (function components only).
    pub(crate) children_next: RefCell<BTreeMap<String, ContextRef>>,
    /// key -> child context from the previous consolidation.
    pub(crate) children: RefCell<BTreeMap<String, ContextRef>>,

    // Hook slots. State is addressed by key (explicit or stringified call
    // index); effects and memos by call order.
    pub(crate) state: RefCell<BTreeMap<String, Box<dyn Any>>>,
    pub(crate) state_index: Cell<usize>,
    pub(crate) effects: RefCell<Vec<Rc<Effect>>>,
    pub(crate) effect_index: Cell<usize>,
    pub(crate) memo: RefCell<Vec<MemoEntry>>,
    pub(crate) memo_index: Cell<usize>,

    /// Values published through `provide_context`.
    pub(crate) provided: RefCell<BTreeMap<String, Rc<dyn Any>>>,
    /// Keys resolved in this context during the current pass; cleared when
    /// the context's root element re-enters the render phase.
    pub(crate) used_keys: RefCell<Set<String>>,
    /// Elements whose target node this context currently owns.
    pub(crate) owns: RefCell<Set<ElementId>>,
}

impl ComponentContext {
    pub(crate) fn new(parent: Option<&ContextRef>) -> ContextRef {
        Rc::new(Self {
            parent: RefCell::new(parent.map(Rc::downgrade).unwrap_or_default()),
            invoke_element: RefCell::new(None),
            root_element: RefCell::new(None),
            elements_next: RefCell::new(BTreeMap::new()),
            elements: RefCell::new(BTreeMap::new()),
            children_next: RefCell::new(BTreeMap::new()),
            children: RefCell::new(BTreeMap::new()),
            state: RefCell::new(BTreeMap::new()),
            state_index: Cell::new(0),
            effects: RefCell::new(Vec::new()),
            effect_index: Cell::new(0),
            memo: RefCell::new(Vec::new()),
            memo_index: Cell::new(0),
            provided: RefCell::new(BTreeMap::new()),
            used_keys: RefCell::new(Set::default()),
            owns: RefCell::new(Set::default()),
        })
    }

    /// Hook cursors restart at every invocation of the render function.
    pub(crate) fn reset_cursors(&self) {
        self.state_index.set(0);
        self.effect_index.set(0);
        self.memo_index.set(0);
    }

    /// Walk from this context up through its parents looking for a provided
    /// value.
    pub(crate) fn lookup_provided(&self, key: &str) -> Option<Rc<dyn Any>> {
        if let Some(value) = self.provided.borrow().get(key) {
            return Some(Rc::clone(value));
        }
        let parent = self.parent.borrow().upgrade();
        parent.and_then(|parent| parent.lookup_provided(key))
    }

    /// Run every live effect cleanup, in declaration order. Used when the
    /// context is torn down.
    pub(crate) fn run_effect_cleanups(&self) {
        let effects: Vec<Rc<Effect>> = self.effects.borrow().clone();
        for effect in effects {
            effect.run_cleanup();
        }
    }
}

/// Closure run as an effect; returns an optional cleanup run before the
/// effect re-runs or when the owning context is torn down.
pub(crate) type EffectFn = Box<dyn FnOnce() -> Option<Box<dyn FnOnce()>>>;

/// One effect slot. `deps == None` means "always rerun". A registration
/// landing on a slot whose effect already executed becomes `next`; the
/// consolidation phase decides whether `next` replaces the slot (deps
/// changed) or is discarded (deps equal and non-null).
pub(crate) struct Effect {
    run: RefCell<Option<EffectFn>>,
    pub(crate) deps: Option<u64>,
    cleanup: RefCell<Option<Box<dyn FnOnce()>>>,
    pub(crate) executed: Cell<bool>,
    pub(crate) next: RefCell<Option<Rc<Effect>>>,
}

impl Effect {
    pub(crate) fn new(run: EffectFn, deps: Option<u64>) -> Rc<Self> {
        Rc::new(Self {
            run: RefCell::new(Some(run)),
            deps,
            cleanup: RefCell::new(None),
            executed: Cell::new(false),
            next: RefCell::new(None),
        })
    }

    /// Run the effect once; later invocations are no-ops.
    pub(crate) fn invoke(&self) {
        if self.executed.replace(true) {
            return;
        }
        let run = self.run.borrow_mut().take();
        if let Some(run) = run {
            let cleanup = run();
            *self.cleanup.borrow_mut() = cleanup;
        }
    }

    pub(crate) fn run_cleanup(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

/// Memo slot: cached value plus the dependency hash it was computed from.
pub(crate) struct MemoEntry {
    pub(crate) value: Rc<dyn Any>,
    pub(crate) deps: u64,
}
