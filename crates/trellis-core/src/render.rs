//! The reconciler: render phase, consolidation phase, removal, and the
//! stabilization loop that repeats render+consolidate until no state
//! change is flagged.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::context::{ComponentContext, ContextRef, Effect, EffectFn};
use crate::element::{Component, ContainerAdder, Element, ElementId, Props};
use crate::error::{InvariantViolation, RenderError, RenderErrorKind};
use crate::node::{Backend, NativeType, NodeError, NodeId, PropHandler, PropMap, PropValue, TargetNode};
use crate::{hash_key, join_key, Map, Set, ROOT_KEY};

/// Default bound on render-phase iterations within one stabilization loop.
pub const DEFAULT_MAX_ITERATIONS: usize = 50;

thread_local! {
    // Stack of active render contexts on this thread; the top one receives
    // hook calls and element declarations.
    static CURRENT: RefCell<Vec<Rc<RenderInner>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn current_inner() -> Option<Rc<RenderInner>> {
    CURRENT.with(|stack| stack.borrow().last().cloned())
}

pub(crate) fn with_active_inner<R>(
    f: impl FnOnce(&Rc<RenderInner>) -> Result<R, RenderError>,
) -> Result<R, RenderError> {
    match current_inner() {
        Some(inner) => f(&inner),
        None => Err(RenderError::no_active_render_context()),
    }
}

struct CurrentGuard;

impl CurrentGuard {
    fn push(inner: &Rc<RenderInner>) -> Self {
        CURRENT.with(|stack| stack.borrow_mut().push(Rc::clone(inner)));
        CurrentGuard
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Called from `Element::new`: an element declared while a collector block
/// is open becomes a candidate child of the enclosing element.
pub(crate) fn offer_to_container_adder(element: &Element) {
    if let Some(inner) = current_inner() {
        if let Some(adder) = inner.adders.borrow_mut().last_mut() {
            adder.add(element);
        }
    }
}

/// Backs `Element::nest`: push a collector, run the block, then assign the
/// collected top-level elements as children.
pub(crate) fn with_container_adder(
    element: &Element,
    body: impl FnOnce(),
) -> Result<(), RenderError> {
    let inner = current_inner().ok_or_else(RenderError::no_active_render_context)?;
    inner
        .adders
        .borrow_mut()
        .push(ContainerAdder::new(element.clone()));
    body();
    let adder = inner.adders.borrow_mut().pop();
    if let Some(adder) = adder {
        adder.assign();
    }
    Ok(())
}

/// Orchestrator state for one independently rendered tree.
pub(crate) struct RenderInner {
    pub(crate) backend: RefCell<Box<dyn Backend>>,
    pub(crate) root_element: RefCell<Option<Element>>,
    pub(crate) container: Cell<Option<NodeId>>,
    pub(crate) context_root: ContextRef,
    /// Context receiving hook calls and key bookkeeping right now.
    pub(crate) current: RefCell<ContextRef>,
    /// element id -> live target node.
    pub(crate) nodes: RefCell<Map<ElementId, NodeId>>,
    /// node -> last property map written to it; diffs are computed against
    /// this so unchanged properties are never rewritten.
    pub(crate) applied: RefCell<Map<NodeId, PropMap>>,
    /// Elements rendered this pass, not yet consolidated.
    pub(crate) pending: RefCell<Set<ElementId>>,
    /// Elements live in the committed tree.
    pub(crate) committed: RefCell<Set<ElementId>>,
    /// Every element id that ever entered a pass; distinguishes stale
    /// lookups from unknown elements.
    pub(crate) seen: RefCell<Set<ElementId>>,
    /// node -> auxiliary nodes created alongside it, closed jointly.
    pub(crate) orphans: RefCell<Map<NodeId, Set<NodeId>>>,
    pub(crate) adders: RefCell<Vec<ContainerAdder>>,
    pub(crate) is_rendering: Cell<bool>,
    pub(crate) state_changed: Cell<bool>,
    pub(crate) state_changed_reason: RefCell<Option<String>>,
    pub(crate) first_render: Cell<bool>,
    pub(crate) render_count: Cell<usize>,
    pub(crate) max_iterations: Cell<usize>,
    pub(crate) last_root_node: Cell<Option<NodeId>>,
    pub(crate) debug_trace: Cell<bool>,
    pub(crate) trace_sites: RefCell<Vec<crate::element::DeclSite>>,
    pub(crate) closed: Cell<bool>,
}

impl RenderInner {
    fn new(backend: Box<dyn Backend>, container: Option<NodeId>) -> Rc<Self> {
        let context_root = ComponentContext::new(None);
        Rc::new(Self {
            backend: RefCell::new(backend),
            root_element: RefCell::new(None),
            container: Cell::new(container),
            current: RefCell::new(Rc::clone(&context_root)),
            context_root,
            nodes: RefCell::new(Map::default()),
            applied: RefCell::new(Map::default()),
            pending: RefCell::new(Set::default()),
            committed: RefCell::new(Set::default()),
            seen: RefCell::new(Set::default()),
            orphans: RefCell::new(Map::default()),
            adders: RefCell::new(Vec::new()),
            is_rendering: Cell::new(false),
            state_changed: Cell::new(false),
            state_changed_reason: RefCell::new(None),
            first_render: Cell::new(true),
            render_count: Cell::new(0),
            max_iterations: Cell::new(DEFAULT_MAX_ITERATIONS),
            last_root_node: Cell::new(None),
            debug_trace: Cell::new(false),
            trace_sites: RefCell::new(Vec::new()),
            closed: Cell::new(false),
        })
    }

    /// Record an element's declaration site for error augmentation.
    fn traced(&self, err: RenderError, element: &Element) -> RenderError {
        if self.debug_trace.get() {
            self.trace_sites.borrow_mut().push(element.decl_site());
        }
        err
    }

    /// Flag a state change; the stabilization loop picks it up. Starts a
    /// fresh cycle immediately when no pass is in flight.
    pub(crate) fn schedule_update(self: &Rc<Self>, reason: String) -> Result<(), RenderError> {
        if !self.state_changed.replace(true) {
            *self.state_changed_reason.borrow_mut() = Some(reason);
        }
        if self.is_rendering.get() {
            log::debug!("state change deferred; a pass is in flight");
            return Ok(());
        }
        let root = self.root_element.borrow().clone();
        match root {
            Some(root) => self.render_root(root).map(|_| ()),
            None => Ok(()),
        }
    }

    /// One full entry point invocation: render phase(s), then consolidation,
    /// repeated until stable (outermost call only).
    pub(crate) fn render_root(
        self: &Rc<Self>,
        element: Element,
    ) -> Result<Option<NodeId>, RenderError> {
        let _guard = CurrentGuard::push(self);
        let was_rendering = self.is_rendering.replace(true);
        let main = !was_rendering;
        *self.root_element.borrow_mut() = Some(element.clone());
        self.state_changed.set(false);
        *self.state_changed_reason.borrow_mut() = None;
        self.trace_sites.borrow_mut().clear();
        let pass = self.render_count.get();
        self.render_count.set(pass + 1);
        log::info!(
            "render pass {pass} ({})",
            if main { "main" } else { "nested" }
        );
        let previous_context = self.current.replace(Rc::clone(&self.context_root));
        *self.context_root.root_element.borrow_mut() = Some(element.clone());

        let result = self.render_cycle(&element, main);

        *self.current.borrow_mut() = previous_context;
        self.is_rendering.set(was_rendering);
        result.map_err(|mut err| {
            for site in self.trace_sites.borrow_mut().drain(..) {
                err.push_site(site);
            }
            err
        })
    }

    fn render_cycle(
        self: &Rc<Self>,
        element: &Element,
        main: bool,
    ) -> Result<Option<NodeId>, RenderError> {
        self.pending.borrow_mut().clear();
        self.render_el(element, "/", ROOT_KEY)?;
        self.first_render.set(false);
        if !main {
            return Ok(None);
        }

        let mut iterations = 0usize;
        let node = loop {
            while self.state_changed.get() {
                iterations += 1;
                if iterations > self.max_iterations.get() {
                    return Err(RenderError::unstable_render_loop(iterations));
                }
                log::info!(
                    "re-running render phase: {:?}",
                    self.state_changed_reason.borrow()
                );
                self.state_changed.set(false);
                *self.state_changed_reason.borrow_mut() = None;
                self.pending.borrow_mut().clear();
                self.render_el(element, "/", ROOT_KEY)?;
            }

            // the root context has no render function to reset its cursors
            self.context_root.reset_cursors();
            let node = self.consolidate_el(element, "/", ROOT_KEY)?;
            let pending_count = self.pending.borrow().len();
            if pending_count != 0 {
                return Err(RenderError::invariant(InvariantViolation::PendingNotEmpty {
                    count: pending_count,
                }));
            }
            self.run_effects(&self.context_root);
            if !self.state_changed.get() {
                break node;
            }
            log::info!("consolidation flagged a state change; repeating cycle");
        };

        match self.last_root_node.get() {
            None => {
                self.last_root_node.set(Some(node));
                if let Some(container) = self.container.get() {
                    self.set_container_children(container, node)?;
                }
            }
            Some(previous) if previous != node => {
                if let Some(container) = self.container.get() {
                    self.set_container_children(container, node)?;
                    self.last_root_node.set(Some(node));
                } else {
                    return Err(RenderError::new(RenderErrorKind::RootNodeTypeChanged));
                }
            }
            Some(_) => {}
        }
        Ok(Some(node))
    }

    fn set_container_children(&self, container: NodeId, node: NodeId) -> Result<(), RenderError> {
        self.backend.borrow_mut().set_prop(
            container,
            crate::element::CHILDREN_PROP,
            PropValue::List(vec![PropValue::Node(node)]),
        )?;
        Ok(())
    }

    // ---- render phase -----------------------------------------------------

    fn render_el(
        self: &Rc<Self>,
        el: &Element,
        default_key: &str,
        parent_key: &str,
    ) -> Result<(), RenderError> {
        self.seen.borrow_mut().insert(el.id());
        let context = Rc::clone(&self.current.borrow());
        let mut base = default_key.to_owned();
        if base == "/" {
            // entering a context's root: per-pass key and pending-map state
            // restarts here
            context.used_keys.borrow_mut().clear();
            context.elements_next.borrow_mut().clear();
            base = format!("{}/", el.component().name());
        }
        let key = el.explicit_key().unwrap_or(base);
        log::debug!("render ({parent_key},{key}) {el:?}");

        if !context.used_keys.borrow_mut().insert(key.clone()) {
            return Err(self.traced(RenderError::key_collision(&key), el));
        }
        if self.pending.borrow().contains(&el.id()) {
            // shared reference: expand only once per pass
            log::debug!("render: already rendered this pass");
            return Ok(());
        }
        context
            .elements_next
            .borrow_mut()
            .insert(key.clone(), el.clone());
        self.pending.borrow_mut().insert(el.id());

        if matches!(el.component(), Component::Native(_)) && !el.args().is_empty() {
            return Err(self.traced(
                RenderError::new(RenderErrorKind::NativeElementArgs {
                    element: el.describe(),
                }),
                el,
            ));
        }

        // argument elements render in the declaring context, children first
        self.render_arguments(el, &key, parent_key)?;

        if let Component::Function(function) = el.component() {
            let context_previous = {
                let next = context.children_next.borrow();
                next.get(&key).cloned()
            }
            .or_else(|| context.children.borrow().get(&key).cloned());

            let child = match context_previous {
                Some(previous) => {
                    let same = previous
                        .invoke_element
                        .borrow()
                        .as_ref()
                        .map(|invoke| invoke.component().same(el.component()))
                        .unwrap_or(false);
                    if same {
                        *previous.parent.borrow_mut() = Rc::downgrade(&context);
                        previous
                    } else {
                        // different component at this key; the stale context
                        // is torn down during consolidation
                        log::debug!("render: component changed at {key:?}, fresh context");
                        ComponentContext::new(Some(&context))
                    }
                }
                None => ComponentContext::new(Some(&context)),
            };
            *child.invoke_element.borrow_mut() = Some(el.clone());

            // collector blocks never leak across a component invocation
            let saved_adders = std::mem::take(&mut *self.adders.borrow_mut());
            let previous_context = self.current.replace(Rc::clone(&child));
            let result = (|| {
                child.reset_cursors();
                let props = Props {
                    args: el.args().to_vec(),
                    kwargs: el.kwargs_clone(),
                };
                let count_before = self.render_count.get();
                let root = function.invoke(&props).map_err(|err| self.traced(err, el))?;
                if self.render_count.get() != count_before {
                    return Err(RenderError::invariant(InvariantViolation::RecursiveRender));
                }
                *child.root_element.borrow_mut() = Some(root.clone());
                self.render_el(&root, "/", &join_key(parent_key, &key))
            })();
            *self.current.borrow_mut() = previous_context;
            *self.adders.borrow_mut() = saved_adders;
            result?;
            // publish only after a successful recursion
            context.children_next.borrow_mut().insert(key, child);
        }
        Ok(())
    }

    fn render_arguments(
        self: &Rc<Self>,
        el: &Element,
        key: &str,
        parent_key: &str,
    ) -> Result<(), RenderError> {
        for (index, value) in el.args().iter().enumerate() {
            self.render_value(value, &format!("{key}{index}/"), parent_key)?;
        }
        let kwargs = el.kwargs_clone();
        for (name, value) in &kwargs {
            self.render_value(value, &format!("{key}{name}/"), parent_key)?;
        }
        Ok(())
    }

    fn render_value(
        self: &Rc<Self>,
        value: &PropValue,
        default_key: &str,
        parent_key: &str,
    ) -> Result<(), RenderError> {
        match value {
            PropValue::Element(child) => self.render_el(child, default_key, parent_key),
            PropValue::List(values) => {
                for (index, value) in values.iter().enumerate() {
                    self.render_value(value, &format!("{default_key}{index}/"), parent_key)?;
                }
                Ok(())
            }
            PropValue::Map(map) => {
                for (name, value) in map {
                    self.render_value(value, &format!("{default_key}{name}/"), parent_key)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ---- consolidation phase ---------------------------------------------

    fn consolidate_el(
        self: &Rc<Self>,
        el: &Element,
        default_key: &str,
        parent_key: &str,
    ) -> Result<NodeId, RenderError> {
        let context = Rc::clone(&self.current.borrow());
        let mut base = default_key.to_owned();
        if base == "/" {
            base = format!("{}/", el.component().name());
        }
        let key = el.explicit_key().unwrap_or(base);
        log::debug!("consolidate ({parent_key},{key}) {el:?}");

        if !self.pending.borrow().contains(&el.id()) {
            // a shared element consolidated earlier in this pass keeps its
            // existing node
            if self.committed.borrow().contains(&el.id()) {
                return self
                    .nodes
                    .borrow()
                    .get(&el.id())
                    .copied()
                    .ok_or_else(|| {
                        RenderError::ownership(format!("no node recorded for shared element {el:?}"))
                    });
            }
            return Err(RenderError::ownership(format!(
                "element {el:?} reached consolidation while neither pending nor committed"
            )));
        }

        let el_prev = context.elements.borrow().get(&key).cloned();
        let result = match el.component() {
            Component::Function(_) => {
                self.consolidate_function(el, &key, parent_key, el_prev.as_ref(), &context)
            }
            Component::Native(ty) => {
                let ty = ty.clone();
                self.consolidate_native(el, &ty, &key, parent_key, el_prev.as_ref(), &context)
            }
        };
        let node = result.map_err(|err| self.traced(err, el))?;

        // the element moves from pending to committed
        context.elements.borrow_mut().insert(key.clone(), el.clone());
        context.elements_next.borrow_mut().remove(&key);
        if let Some(previous) = &el_prev {
            if previous.id() != el.id() {
                self.committed.borrow_mut().remove(&previous.id());
                self.nodes.borrow_mut().remove(&previous.id());
            }
        }
        self.committed.borrow_mut().insert(el.id());
        if !self.pending.borrow_mut().remove(&el.id()) {
            return Err(RenderError::ownership(format!(
                "element {el:?} was not pending at commit time"
            )));
        }
        Ok(node)
    }

    fn consolidate_function(
        self: &Rc<Self>,
        el: &Element,
        key: &str,
        parent_key: &str,
        el_prev: Option<&Element>,
        context: &ContextRef,
    ) -> Result<NodeId, RenderError> {
        let child_parent_key = join_key(parent_key, key);
        // nested argument elements consolidate in the declaring context
        self.consolidate_arguments(el, key, parent_key)?;

        let child_prev = context.children.borrow().get(key).cloned();
        let child = context
            .children_next
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| {
                RenderError::invariant(InvariantViolation::MissingChildContext {
                    key: key.to_owned(),
                })
            })?;
        if let Some(previous) = &child_prev {
            if !Rc::ptr_eq(previous, &child) {
                // the component occupying this key changed; tear down the
                // replaced subtree before building the new one
                let previous_el = el_prev.cloned().ok_or_else(|| {
                    RenderError::ownership(
                        "previous child context exists without a committed element",
                    )
                })?;
                self.remove_el(&previous_el, "/", parent_key)?;
            }
        }

        let previous_context = self.current.replace(Rc::clone(&child));
        let result = (|| {
            let root = child.root_element.borrow().clone().ok_or_else(|| {
                RenderError::ownership("child context has no root element")
            })?;
            let committed_before: BTreeMap<String, Element> = child.elements.borrow().clone();
            let pending_now: BTreeMap<String, Element> = child.elements_next.borrow().clone();

            let node = self.consolidate_el(&root, "/", &child_parent_key)?;
            self.nodes.borrow_mut().insert(el.id(), node);

            for (removed_key, removed_el) in &committed_before {
                if !pending_now.contains_key(removed_key) {
                    log::info!("element at {removed_key:?} dropped out of the tree");
                    self.remove_el(removed_el, removed_key, parent_key)?;
                }
            }

            self.run_effects(&child);

            // anything still pending in this context must have been consumed
            // by another element's consolidation
            let leftovers: Vec<(String, Element)> = child
                .elements_next
                .borrow()
                .iter()
                .map(|(key, el)| (key.clone(), el.clone()))
                .collect();
            let mut unreferenced = Vec::new();
            for (leftover_key, leftover_el) in leftovers {
                if self.committed.borrow().contains(&leftover_el.id()) {
                    child
                        .elements
                        .borrow_mut()
                        .insert(leftover_key.clone(), leftover_el);
                    child.elements_next.borrow_mut().remove(&leftover_key);
                } else {
                    unreferenced.push(leftover_el.describe());
                }
            }
            if !unreferenced.is_empty() {
                return Err(RenderError::invariant(
                    InvariantViolation::UnreferencedElements {
                        elements: unreferenced,
                    },
                ));
            }
            Ok(node)
        })();
        *self.current.borrow_mut() = previous_context;
        let node = result?;

        let published = context.children_next.borrow_mut().remove(key);
        if let Some(published) = published {
            context.children.borrow_mut().insert(key.to_owned(), published);
        }
        Ok(node)
    }

    fn consolidate_arguments(
        self: &Rc<Self>,
        el: &Element,
        key: &str,
        parent_key: &str,
    ) -> Result<(), RenderError> {
        for (index, value) in el.args().iter().enumerate() {
            self.consolidate_value(value, &format!("{key}{index}/"), parent_key)?;
        }
        let kwargs = el.kwargs_clone();
        for (name, value) in &kwargs {
            self.consolidate_value(value, &format!("{key}{name}/"), parent_key)?;
        }
        Ok(())
    }

    /// Consolidate any elements embedded in a property value, replacing them
    /// with their target-node ids.
    fn consolidate_value(
        self: &Rc<Self>,
        value: &PropValue,
        default_key: &str,
        parent_key: &str,
    ) -> Result<PropValue, RenderError> {
        Ok(match value {
            PropValue::Element(child) => {
                PropValue::Node(self.consolidate_el(child, default_key, parent_key)?)
            }
            PropValue::List(values) => {
                let mut resolved = Vec::with_capacity(values.len());
                for (index, value) in values.iter().enumerate() {
                    resolved.push(self.consolidate_value(
                        value,
                        &format!("{default_key}{index}/"),
                        parent_key,
                    )?);
                }
                PropValue::List(resolved)
            }
            PropValue::Map(map) => {
                let mut resolved = BTreeMap::new();
                for (name, value) in map {
                    resolved.insert(
                        name.clone(),
                        self.consolidate_value(
                            value,
                            &format!("{default_key}{name}/"),
                            parent_key,
                        )?,
                    );
                }
                PropValue::Map(resolved)
            }
            other => other.clone(),
        })
    }

    fn consolidate_native(
        self: &Rc<Self>,
        el: &Element,
        ty: &NativeType,
        key: &str,
        parent_key: &str,
        el_prev: Option<&Element>,
        context: &ContextRef,
    ) -> Result<NodeId, RenderError> {
        let (plain, bindings) = split_kwargs(el, ty);
        let mut resolved = PropMap::new();
        for (name, value) in &plain {
            resolved.insert(
                name.clone(),
                self.consolidate_value(value, &format!("{key}{name}/"), parent_key)?,
            );
        }

        let before: Set<NodeId> = self.backend.borrow().live_ids().into_iter().collect();
        let node_prev = el_prev.and_then(|prev| self.nodes.borrow().get(&prev.id()).copied());

        let node = match (node_prev, el_prev) {
            (Some(previous_node), Some(previous_el))
                if self.backend.borrow().node_type_id(previous_node)? == ty.node_type_id() =>
            {
                // same concrete type at the same key: update in place
                log::info!("updating node {previous_node}: {previous_el:?} -> {el:?}");
                self.nodes.borrow_mut().insert(el.id(), previous_node);
                self.update_native(previous_node, ty, &resolved)?;
                context.owns.borrow_mut().remove(&previous_el.id());
                context.owns.borrow_mut().insert(el.id());
                self.register_handler_effects(previous_node, &bindings, context);
                previous_node
            }
            (Some(previous_node), Some(previous_el)) => {
                // type changed: the old node (and its orphans) goes away and
                // a fresh node takes the key
                log::info!("replacing node {previous_node}: {previous_el:?} -> {el:?}");
                let previous_el = previous_el.clone();
                self.remove_el(&previous_el, key, parent_key)?;
                self.create_native(el, ty, &resolved, &bindings, context)?
            }
            _ => self.create_native(el, ty, &resolved, &bindings, context)?,
        };

        // nodes that appeared as a side effect of building this one are
        // orphans, cleaned up jointly with it
        let mut fresh = Set::default();
        for id in self.backend.borrow().live_ids() {
            if id != node && !before.contains(&id) {
                fresh.insert(id);
            }
        }
        if !fresh.is_empty() {
            log::debug!("node {node} picked up orphans {fresh:?}");
            self.orphans.borrow_mut().entry(node).or_default().extend(fresh);
        }
        Ok(node)
    }

    fn create_native(
        self: &Rc<Self>,
        el: &Element,
        ty: &NativeType,
        resolved: &PropMap,
        bindings: &[(String, PropHandler)],
        context: &ContextRef,
    ) -> Result<NodeId, RenderError> {
        if self.nodes.borrow().contains_key(&el.id()) {
            return Err(RenderError::ownership(format!(
                "element {el:?} already has a node"
            )));
        }
        log::info!("creating node for {el:?}");
        let node = self.backend.borrow_mut().create(ty, resolved)?;
        self.nodes.borrow_mut().insert(el.id(), node);
        self.applied.borrow_mut().insert(node, resolved.clone());
        context.owns.borrow_mut().insert(el.id());
        self.register_handler_effects(node, bindings, context);
        Ok(node)
    }

    /// Apply changed properties inside the node's batched-write scope and
    /// reset dropped properties to their declared defaults.
    fn update_native(
        &self,
        node: NodeId,
        ty: &NativeType,
        resolved: &PropMap,
    ) -> Result<(), RenderError> {
        let previous = self.applied.borrow().get(&node).cloned().unwrap_or_default();
        let changed: Vec<(&String, &PropValue)> = resolved
            .iter()
            .filter(|(name, value)| previous.get(*name) != Some(*value))
            .collect();
        let dropped: Vec<&String> = previous
            .keys()
            .filter(|name| !resolved.contains_key(*name))
            .collect();
        if changed.is_empty() && dropped.is_empty() {
            return Ok(());
        }

        let mut backend = self.backend.borrow_mut();
        backend.begin_batch(node)?;
        let mut write_result = Ok(());
        for (name, value) in changed {
            if let Err(err) = backend.set_prop(node, name, value.clone()) {
                write_result = Err(err);
                break;
            }
        }
        if write_result.is_ok() {
            for name in dropped {
                let Some(default) = ty.default_of(name) else {
                    continue;
                };
                if let Err(err) = backend.set_prop(node, name, default) {
                    write_result = Err(err);
                    break;
                }
            }
        }
        let ended = backend.end_batch(node);
        drop(backend);
        write_result?;
        ended?;
        self.applied.borrow_mut().insert(node, resolved.clone());
        Ok(())
    }

    /// Handler (de)registration goes through the effect protocol, so an
    /// unchanged binding survives passes untouched and a changed one is
    /// unobserved and reobserved.
    fn register_handler_effects(
        self: &Rc<Self>,
        node: NodeId,
        bindings: &[(String, PropHandler)],
        context: &ContextRef,
    ) {
        for (prop, handler) in bindings {
            let deps = hash_key(&(
                node,
                prop.as_str(),
                Rc::as_ptr(handler) as *const () as usize,
            ));
            let weak = Rc::downgrade(self);
            let prop_name = prop.clone();
            let handler = Rc::clone(handler);
            let run: EffectFn = Box::new(move || {
                let inner = weak.upgrade()?;
                let observer = match inner
                    .backend
                    .borrow_mut()
                    .observe(node, &prop_name, Rc::clone(&handler))
                {
                    Ok(observer) => observer,
                    Err(err) => {
                        log::error!("observe {prop_name:?} on node {node} failed: {err}");
                        return None;
                    }
                };
                let weak = weak.clone();
                let prop_name = prop_name.clone();
                Some(Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        // the node may already be gone when the owning
                        // context unwinds
                        if let Err(err) =
                            inner.backend.borrow_mut().unobserve(node, &prop_name, observer)
                        {
                            log::debug!("unobserve {prop_name:?} on node {node}: {err}");
                        }
                    }
                }))
            });
            self.register_effect(context, run, Some(deps));
        }
    }

    /// Shared slot logic for `use_effect` and handler bindings: first
    /// registration fills the slot; a registration over an executed effect
    /// queues as its pending replacement; over an unexecuted one it simply
    /// replaces it.
    pub(crate) fn register_effect(
        &self,
        context: &ContextRef,
        run: EffectFn,
        deps: Option<u64>,
    ) {
        let index = context.effect_index.get();
        let mut effects = context.effects.borrow_mut();
        if effects.len() <= index {
            effects.push(Effect::new(run, deps));
        } else {
            let previous = Rc::clone(&effects[index]);
            if previous.executed.get() {
                *previous.next.borrow_mut() = Some(Effect::new(run, deps));
            } else {
                effects[index] = Effect::new(run, deps);
            }
        }
        context.effect_index.set(index + 1);
    }

    /// Run a context's effects after its subtree consolidated. Pending
    /// replacements with equal non-null dependencies are discarded;
    /// otherwise the previous cleanup runs and the replacement takes the
    /// slot and executes.
    fn run_effects(&self, context: &ContextRef) {
        let mut index = 0;
        loop {
            let effect = {
                let effects = context.effects.borrow();
                match effects.get(index) {
                    Some(effect) => Rc::clone(effect),
                    None => break,
                }
            };
            effect.invoke();
            let next = effect.next.borrow_mut().take();
            if let Some(next) = next {
                if next.deps.is_some() && next.deps == effect.deps {
                    log::debug!("effect {index}: dependencies unchanged, keeping current");
                } else {
                    effect.run_cleanup();
                    context.effects.borrow_mut()[index] = Rc::clone(&next);
                    next.invoke();
                }
            }
            index += 1;
        }
    }

    // ---- removal ----------------------------------------------------------

    fn remove_el(
        self: &Rc<Self>,
        el: &Element,
        default_key: &str,
        parent_key: &str,
    ) -> Result<(), RenderError> {
        let context = Rc::clone(&self.current.borrow());
        let mut base = default_key.to_owned();
        if base == "/" {
            base = format!("{}/", el.component().name());
        }
        let key = el.explicit_key().unwrap_or(base);
        log::info!("remove ({parent_key},{key}) {el:?}");

        if !self.committed.borrow_mut().remove(&el.id()) {
            // not live: removing is a no-op
            return Ok(());
        }
        let key_created = context
            .elements
            .borrow()
            .iter()
            .find(|(_, committed)| committed.id() == el.id())
            .map(|(key, _)| key.clone())
            .ok_or_else(|| {
                RenderError::ownership(format!("element {el:?} not committed in its context"))
            })?;

        // nested argument elements go first
        self.remove_arguments(el, &key, parent_key)?;

        match el.component() {
            Component::Function(_) => {
                let child = context
                    .children
                    .borrow()
                    .get(&key_created)
                    .cloned()
                    .ok_or_else(|| {
                        RenderError::invariant(InvariantViolation::MissingChildContext {
                            key: key_created.clone(),
                        })
                    })?;
                child.run_effect_cleanups();
                let previous_context = self.current.replace(Rc::clone(&child));
                let result = (|| {
                    let root = child.root_element.borrow().clone().ok_or_else(|| {
                        RenderError::ownership("removing a context with no root element")
                    })?;
                    self.remove_el(&root, "/", &join_key(parent_key, &key))
                })();
                *self.current.borrow_mut() = previous_context;
                result?;
                // the context and its hook state go with the element
                context.children.borrow_mut().remove(&key_created);
                self.nodes.borrow_mut().remove(&el.id());
            }
            Component::Native(_) => {
                let node = self.nodes.borrow_mut().remove(&el.id());
                if let Some(node) = node {
                    let orphan_ids: Vec<NodeId> = self
                        .orphans
                        .borrow_mut()
                        .remove(&node)
                        .map(|set| set.into_iter().collect())
                        .unwrap_or_default();
                    let mut backend = self.backend.borrow_mut();
                    for orphan in orphan_ids {
                        if backend.contains(orphan) {
                            backend.close_node(orphan)?;
                        }
                    }
                    backend.close_node(node)?;
                    drop(backend);
                    self.applied.borrow_mut().remove(&node);
                }
                context.owns.borrow_mut().remove(&el.id());
            }
        }
        context.elements.borrow_mut().remove(&key_created);
        Ok(())
    }

    fn remove_arguments(
        self: &Rc<Self>,
        el: &Element,
        key: &str,
        parent_key: &str,
    ) -> Result<(), RenderError> {
        for (index, value) in el.args().iter().enumerate() {
            self.remove_value(value, &format!("{key}{index}/"), parent_key)?;
        }
        let kwargs = el.kwargs_clone();
        for (name, value) in &kwargs {
            self.remove_value(value, &format!("{key}{name}/"), parent_key)?;
        }
        Ok(())
    }

    fn remove_value(
        self: &Rc<Self>,
        value: &PropValue,
        default_key: &str,
        parent_key: &str,
    ) -> Result<(), RenderError> {
        match value {
            PropValue::Element(child) => self.remove_el(child, default_key, parent_key),
            PropValue::List(values) => {
                for (index, value) in values.iter().enumerate() {
                    self.remove_value(value, &format!("{default_key}{index}/"), parent_key)?;
                }
                Ok(())
            }
            PropValue::Map(map) => {
                for (name, value) in map {
                    self.remove_value(value, &format!("{default_key}{name}/"), parent_key)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ---- teardown and lookups ---------------------------------------------

    pub(crate) fn close(self: &Rc<Self>) -> Result<(), RenderError> {
        if self.closed.replace(true) {
            return Ok(());
        }
        let root = self.root_element.borrow().clone();
        if let Some(root) = root {
            self.remove_el(&root, "/", ROOT_KEY)?;
        }
        self.context_root.run_effect_cleanups();
        if let Some(container) = self.container.get() {
            self.backend.borrow_mut().close_node(container)?;
        }
        let committed_count = self.committed.borrow().len();
        if committed_count != 0 {
            return Err(RenderError::resource_leak(format!(
                "{committed_count} element(s) not cleaned up"
            )));
        }
        let orphan_count: usize = self.orphans.borrow().values().map(|set| set.len()).sum();
        if orphan_count != 0 {
            return Err(RenderError::resource_leak(format!(
                "{orphan_count} orphan node(s) not cleaned up"
            )));
        }
        Ok(())
    }

    pub(crate) fn node_for(&self, el: &Element) -> Result<NodeId, RenderError> {
        if let Some(node) = self.nodes.borrow().get(&el.id()) {
            return Ok(*node);
        }
        if self.seen.borrow().contains(&el.id()) {
            Err(RenderError::stale_element(format!(
                "{el:?} (from a previous render)"
            )))
        } else {
            Err(RenderError::stale_element(el.describe()))
        }
    }

    pub(crate) fn force_update(self: &Rc<Self>) -> Result<(), RenderError> {
        if self.is_rendering.get() {
            return Ok(());
        }
        let root = self.root_element.borrow().clone();
        match root {
            Some(root) => self.render_root(root).map(|_| ()),
            None => Ok(()),
        }
    }
}

fn split_kwargs(el: &Element, ty: &NativeType) -> (PropMap, Vec<(String, PropHandler)>) {
    let mut plain = PropMap::new();
    let mut bindings = el.bound_handlers();
    for (name, value) in el.kwargs_clone() {
        if let Some(prop) = name.strip_prefix("on_") {
            if !ty.declares(&name) {
                if let PropValue::Handler(handler) = value {
                    bindings.push((prop.to_owned(), handler));
                    continue;
                }
            }
        }
        plain.insert(name, value);
    }
    (plain, bindings)
}

/// Handle to one independently rendered tree. Driving it is single-writer:
/// the handle is not `Send`, and a setter fired while a pass is in flight
/// defers to the stabilization loop instead of nesting a pass.
pub struct RenderContext {
    inner: Rc<RenderInner>,
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext").finish_non_exhaustive()
    }
}

impl RenderContext {
    /// A context with no root container; the root component must keep
    /// producing the same node across renders (`RootNodeTypeChanged`
    /// otherwise).
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            inner: RenderInner::new(Box::new(backend), None),
        }
    }

    /// A context rendering into a fresh root container created by the
    /// backend.
    pub fn with_container(backend: impl Backend + 'static) -> Result<Self, RenderError> {
        let mut backend: Box<dyn Backend> = Box::new(backend);
        let container = backend.create_container()?;
        Ok(Self {
            inner: RenderInner::new(backend, Some(container)),
        })
    }

    /// Render (or re-render) the tree rooted at `element`. Returns the root
    /// target node for outermost passes, `None` for re-entrant ones.
    pub fn render(&self, element: Element) -> Result<Option<NodeId>, RenderError> {
        self.inner.render_root(element)
    }

    /// Tear down the whole tree. Fails with `ResourceLeak` if any node or
    /// orphan survived removal.
    pub fn close(&self) -> Result<(), RenderError> {
        self.inner.close()
    }

    pub fn container(&self) -> Option<NodeId> {
        self.inner.container.get()
    }

    /// The live target node for an element of the current tree.
    pub fn node_for(&self, element: &Element) -> Result<NodeId, RenderError> {
        self.inner.node_for(element)
    }

    /// Re-render without a state change. No-op while a pass is in flight.
    pub fn force_update(&self) -> Result<(), RenderError> {
        self.inner.force_update()
    }

    /// Number of render phases executed so far.
    pub fn render_count(&self) -> usize {
        self.inner.render_count.get()
    }

    pub fn is_first_render(&self) -> bool {
        self.inner.first_render.get()
    }

    /// Bound on render-phase iterations per stabilization loop
    /// (default [`DEFAULT_MAX_ITERATIONS`]).
    pub fn set_max_iterations(&self, bound: usize) {
        self.inner.max_iterations.set(bound);
    }

    /// When enabled, errors carry the chain of element declaration sites
    /// collected while the failing pass unwound.
    pub fn set_debug_trace(&self, enabled: bool) {
        self.inner.debug_trace.set(enabled);
    }

    pub fn with_backend<R>(&self, f: impl FnOnce(&mut dyn Backend) -> R) -> R {
        f(self.inner.backend.borrow_mut().as_mut())
    }

    /// Typed access to a live node.
    pub fn with_node<N: TargetNode, R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut N) -> R,
    ) -> Result<R, RenderError> {
        let mut backend = self.inner.backend.borrow_mut();
        let node = backend.node_mut(id)?;
        let typed = node
            .as_any_mut()
            .downcast_mut::<N>()
            .ok_or(NodeError::TypeMismatch {
                id,
                expected: std::any::type_name::<N>(),
            })?;
        Ok(f(typed))
    }

    /// Simulate an external change of an observed property: write the value,
    /// then invoke the bound handlers. Handlers may call setters, which
    /// start a new render cycle.
    pub fn emit(&self, id: NodeId, name: &str, value: PropValue) -> Result<(), RenderError> {
        let handlers = self.inner.backend.borrow().observers_of(id, name)?;
        self.inner.backend.borrow_mut().set_prop(id, name, value.clone())?;
        for handler in handlers {
            handler(&value);
        }
        Ok(())
    }

    pub(crate) fn inner(&self) -> &Rc<RenderInner> {
        &self.inner
    }
}

impl Clone for RenderContext {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Render `element` into a fresh root container created by the backend.
/// Returns the container node and the live render context.
pub fn render(
    element: Element,
    backend: impl Backend + 'static,
) -> Result<(NodeId, RenderContext), RenderError> {
    let rc = RenderContext::with_container(backend)?;
    rc.render(element)?;
    let container = rc
        .container()
        .ok_or_else(|| RenderError::ownership("container missing after render"))?;
    Ok((container, rc))
}

/// Render without a container; returns the root target node directly.
pub fn render_fixed(
    element: Element,
    backend: impl Backend + 'static,
) -> Result<(NodeId, RenderContext), RenderError> {
    let rc = RenderContext::new(backend);
    let node = rc
        .render(element)?
        .ok_or_else(|| RenderError::ownership("main render pass produced no node"))?;
    Ok((node, rc))
}
