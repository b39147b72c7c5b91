//! Elements: immutable declarative descriptions of what to render, plus the
//! component kinds that produce them and the scoped child collector.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::panic::Location;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RenderError;
use crate::node::{NativeType, PropHandler, PropMap, PropValue};
use crate::render;
use crate::Set;

/// Stable per-instance identity, assigned at construction. All reconciler
/// bookkeeping (pending/committed sets, element→node map) is keyed by this
/// id rather than by address.
pub type ElementId = u64;

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_element_id() -> ElementId {
    NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Declaration site of an element, captured through `#[track_caller]` at
/// construction. Attached to errors when debug tracing is enabled.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DeclSite {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl DeclSite {
    #[track_caller]
    pub(crate) fn capture() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for DeclSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

impl fmt::Debug for DeclSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// The render function of a function component. Receives the element's
/// props and returns the root element of the component's subtree.
pub type RenderFn = dyn Fn(&Props) -> Result<Element, RenderError>;

struct FunctionComponentInner {
    name: String,
    render: Box<RenderFn>,
}

/// A component backed by a render function. Equality is pointer identity:
/// the same `FunctionComponent` value (however widely cloned) is the same
/// component; two separately built ones never compare equal.
#[derive(Clone)]
pub struct FunctionComponent {
    inner: Rc<FunctionComponentInner>,
}

impl FunctionComponent {
    pub fn new(
        name: impl Into<String>,
        render: impl Fn(&Props) -> Result<Element, RenderError> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(FunctionComponentInner {
                name: name.into(),
                render: Box::new(render),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn invoke(&self, props: &Props) -> Result<Element, RenderError> {
        (self.inner.render)(props)
    }

    /// Build an element invoking this component.
    #[track_caller]
    pub fn el(&self, props: Props) -> Element {
        Element::new(Component::Function(self.clone()), props)
    }
}

impl PartialEq for FunctionComponent {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FunctionComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionComponent({})", self.name())
    }
}

/// What an element renders: a function component expanded during the render
/// phase, or a native component realized as a target node during
/// consolidation.
#[derive(Clone, Debug)]
pub enum Component {
    Function(FunctionComponent),
    Native(NativeType),
}

impl Component {
    pub fn name(&self) -> &str {
        match self {
            Component::Function(f) => f.name(),
            Component::Native(ty) => ty.name(),
        }
    }

    /// Whether two elements may share one component context / target node.
    pub(crate) fn same(&self, other: &Component) -> bool {
        match (self, other) {
            (Component::Function(a), Component::Function(b)) => a == b,
            (Component::Native(a), Component::Native(b)) => a == b,
            _ => false,
        }
    }
}

/// Shorthand for defining a function component.
pub fn component(
    name: impl Into<String>,
    render: impl Fn(&Props) -> Result<Element, RenderError> + 'static,
) -> FunctionComponent {
    FunctionComponent::new(name, render)
}

/// Positional and keyword arguments of an element.
#[derive(Clone, Default)]
pub struct Props {
    pub args: Vec<PropValue>,
    pub kwargs: PropMap,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<PropValue>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.kwargs.get(name)
    }

    pub fn str_of(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropValue::as_str)
    }

    pub fn int_of(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(PropValue::as_int)
    }

    pub fn bool_of(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(PropValue::as_bool)
    }

    pub fn elements_of(&self, name: &str) -> Vec<Element> {
        match self.get(name) {
            Some(PropValue::List(values)) => values
                .iter()
                .filter_map(|v| v.as_element().cloned())
                .collect(),
            Some(PropValue::Element(el)) => vec![el.clone()],
            _ => Vec::new(),
        }
    }
}

pub(crate) struct ElementInner {
    id: ElementId,
    component: Component,
    args: Vec<PropValue>,
    // Interior mutability: the container adder appends collected children
    // and `.key()` / `.on()` are fluent post-construction setters.
    kwargs: RefCell<PropMap>,
    key: RefCell<Option<String>>,
    handlers: RefCell<Vec<(String, PropHandler)>>,
    decl_site: DeclSite,
}

/// Immutable description of a node to render. Cheap to clone; clones share
/// identity. The same element value may be reused unchanged across passes.
#[derive(Clone)]
pub struct Element {
    inner: Rc<ElementInner>,
}

impl Element {
    #[track_caller]
    pub fn new(component: Component, props: Props) -> Self {
        let element = Self {
            inner: Rc::new(ElementInner {
                id: next_element_id(),
                component,
                args: props.args,
                kwargs: RefCell::new(props.kwargs),
                key: RefCell::new(None),
                handlers: RefCell::new(Vec::new()),
                decl_site: DeclSite::capture(),
            }),
        };
        // Elements declared inside an open `nest` block are collected by
        // the innermost container adder.
        render::offer_to_container_adder(&element);
        element
    }

    /// Returns the same element with a custom key set. Keys give elements a
    /// stable identity independent of their position.
    pub fn key(self, key: impl Into<String>) -> Self {
        *self.inner.key.borrow_mut() = Some(key.into());
        self
    }

    /// Bind a handler to external changes of the named node property. The
    /// registration is managed as an effect during consolidation.
    pub fn on(self, name: impl Into<String>, handler: impl Fn(&PropValue) + 'static) -> Self {
        self.inner
            .handlers
            .borrow_mut()
            .push((name.into(), Rc::new(handler)));
        self
    }

    /// Open a scoped block collecting declared elements: elements created
    /// inside `body` that are not nested inside another collected element
    /// become this element's `children`. Requires an active render pass.
    pub fn nest(self, body: impl FnOnce()) -> Result<Element, RenderError> {
        render::with_container_adder(&self, body)?;
        Ok(self)
    }

    pub fn id(&self) -> ElementId {
        self.inner.id
    }

    pub fn component(&self) -> &Component {
        &self.inner.component
    }

    pub(crate) fn explicit_key(&self) -> Option<String> {
        self.inner.key.borrow().clone()
    }

    pub(crate) fn args(&self) -> &[PropValue] {
        &self.inner.args
    }

    pub(crate) fn kwargs(&self) -> Ref<'_, PropMap> {
        self.inner.kwargs.borrow()
    }

    pub(crate) fn kwargs_clone(&self) -> PropMap {
        self.inner.kwargs.borrow().clone()
    }

    pub(crate) fn append_children(&self, prop: &str, children: Vec<Element>) {
        let mut kwargs = self.inner.kwargs.borrow_mut();
        let list = match kwargs.remove(prop) {
            Some(PropValue::List(values)) => values,
            Some(other) => vec![other],
            None => Vec::new(),
        };
        let mut list = list;
        list.extend(children.into_iter().map(PropValue::Element));
        kwargs.insert(prop.to_owned(), PropValue::List(list));
    }

    pub(crate) fn bound_handlers(&self) -> Vec<(String, PropHandler)> {
        self.inner.handlers.borrow().clone()
    }

    pub(crate) fn decl_site(&self) -> DeclSite {
        self.inner.decl_site
    }

    /// Human-readable description used in logs and errors.
    pub fn describe(&self) -> String {
        let kwargs = self.inner.kwargs.borrow();
        let mut parts: Vec<String> = self
            .inner
            .args
            .iter()
            .map(|value| format!("{value:?}"))
            .collect();
        parts.extend(
            kwargs
                .iter()
                .map(|(name, value)| format!("{name}={value:?}")),
        );
        format!("{}({})", self.inner.component.name(), parts.join(", "))
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Collect every element embedded (at any depth) in `element`'s arguments.
pub(crate) fn find_children(element: &Element, out: &mut Set<ElementId>) {
    for value in element.args() {
        find_children_in_value(value, out);
    }
    for value in element.kwargs().values() {
        find_children_in_value(value, out);
    }
}

fn find_children_in_value(value: &PropValue, out: &mut Set<ElementId>) {
    match value {
        PropValue::Element(child) => {
            out.insert(child.id());
            find_children(child, out);
        }
        PropValue::List(values) => {
            for value in values {
                find_children_in_value(value, out);
            }
        }
        PropValue::Map(map) => {
            for value in map.values() {
                find_children_in_value(value, out);
            }
        }
        _ => {}
    }
}

/// Scoped helper behind [`Element::nest`]: records elements declared inside
/// the block and, on assignment, appends the top-level ones (those not
/// already nested inside another recorded element) to the enclosing
/// element's `children` property.
pub(crate) struct ContainerAdder {
    element: Element,
    prop: &'static str,
    created: Vec<Element>,
}

pub(crate) const CHILDREN_PROP: &str = "children";

impl ContainerAdder {
    pub(crate) fn new(element: Element) -> Self {
        Self {
            element,
            prop: CHILDREN_PROP,
            created: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, element: &Element) {
        self.created.push(element.clone());
    }

    pub(crate) fn assign(self) {
        let mut nested = Set::default();
        for element in &self.created {
            find_children(element, &mut nested);
        }
        let top_level: Vec<Element> = self
            .created
            .into_iter()
            .filter(|element| !nested.contains(&element.id()))
            .collect();
        self.element.append_children(self.prop, top_level);
    }
}
