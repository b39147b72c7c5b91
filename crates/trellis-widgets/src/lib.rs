//! A small in-memory widget set plus the [`MemoryBackend`] that stores it.
//! Real toolkits plug into the reconciler the same way: one `TargetNode`
//! impl per widget, one [`NativeType`] descriptor, and element helpers.

use std::collections::BTreeMap;

use trellis_core::element::{Component, Element, Props};
use trellis_core::node::{
    Backend, NativeType, NodeError, NodeId, ObserverId, PropHandler, PropMap, PropSpec, PropValue,
    TargetNode,
};

/// Per-widget observer registry keyed by property name.
#[derive(Default)]
pub struct Observers {
    next: ObserverId,
    entries: BTreeMap<String, Vec<(ObserverId, PropHandler)>>,
}

impl Observers {
    pub fn observe(&mut self, name: &str, handler: PropHandler) -> ObserverId {
        let id = self.next;
        self.next += 1;
        self.entries
            .entry(name.to_owned())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn unobserve(&mut self, name: &str, observer: ObserverId) {
        if let Some(list) = self.entries.get_mut(name) {
            list.retain(|(id, _)| *id != observer);
        }
    }

    pub fn of(&self, name: &str) -> Vec<PropHandler> {
        self.entries
            .get(name)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.entries.get(name).map(Vec::len).unwrap_or(0)
    }
}

fn unknown(node: &'static str, name: &str) -> NodeError {
    NodeError::UnknownProperty {
        node,
        name: name.to_owned(),
    }
}

// ---- Label ----------------------------------------------------------------

#[derive(Default)]
pub struct Label {
    pub text: String,
    pub closed: bool,
    observers: Observers,
}

fn default_text() -> PropValue {
    PropValue::Str(String::new())
}

static LABEL_PROPS: &[PropSpec] = &[PropSpec {
    name: "text",
    default: default_text,
}];

impl TargetNode for Label {
    fn type_name(&self) -> &'static str {
        "Label"
    }

    fn get(&self, name: &str) -> Option<PropValue> {
        match name {
            "text" => Some(PropValue::Str(self.text.clone())),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: PropValue) -> Result<(), NodeError> {
        match name {
            "text" => {
                self.text = value.as_str().unwrap_or_default().to_owned();
                Ok(())
            }
            _ => Err(unknown("Label", name)),
        }
    }

    fn observe(&mut self, name: &str, handler: PropHandler) -> ObserverId {
        self.observers.observe(name, handler)
    }

    fn unobserve(&mut self, name: &str, observer: ObserverId) {
        self.observers.unobserve(name, observer);
    }

    fn observers(&self, name: &str) -> Vec<PropHandler> {
        self.observers.of(name)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

pub fn label_type() -> NativeType {
    NativeType::new::<Label>("Label", || Box::<Label>::default(), LABEL_PROPS)
}

/// A text label element.
#[track_caller]
pub fn label(text: impl Into<String>) -> Element {
    Element::new(
        Component::Native(label_type()),
        Props::new().with("text", text.into()),
    )
}

// ---- Button ---------------------------------------------------------------

#[derive(Default)]
pub struct Button {
    pub description: String,
    pub disabled: bool,
    pub clicks: i64,
    pub closed: bool,
    observers: Observers,
}

fn default_false() -> PropValue {
    PropValue::Bool(false)
}

fn default_zero() -> PropValue {
    PropValue::Int(0)
}

static BUTTON_PROPS: &[PropSpec] = &[
    PropSpec {
        name: "description",
        default: default_text,
    },
    PropSpec {
        name: "disabled",
        default: default_false,
    },
    PropSpec {
        name: "clicks",
        default: default_zero,
    },
];

impl TargetNode for Button {
    fn type_name(&self) -> &'static str {
        "Button"
    }

    fn get(&self, name: &str) -> Option<PropValue> {
        match name {
            "description" => Some(PropValue::Str(self.description.clone())),
            "disabled" => Some(PropValue::Bool(self.disabled)),
            "clicks" => Some(PropValue::Int(self.clicks)),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: PropValue) -> Result<(), NodeError> {
        match name {
            "description" => self.description = value.as_str().unwrap_or_default().to_owned(),
            "disabled" => self.disabled = value.as_bool().unwrap_or_default(),
            "clicks" => self.clicks = value.as_int().unwrap_or_default(),
            _ => return Err(unknown("Button", name)),
        }
        Ok(())
    }

    fn observe(&mut self, name: &str, handler: PropHandler) -> ObserverId {
        self.observers.observe(name, handler)
    }

    fn unobserve(&mut self, name: &str, observer: ObserverId) {
        self.observers.unobserve(name, observer);
    }

    fn observers(&self, name: &str) -> Vec<PropHandler> {
        self.observers.of(name)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

impl Button {
    pub fn click_observers(&self) -> usize {
        self.observers.count("clicks")
    }
}

pub fn button_type() -> NativeType {
    NativeType::new::<Button>("Button", || Box::<Button>::default(), BUTTON_PROPS)
}

/// A clickable button element; bind click handlers with
/// `.on("clicks", ...)` or an `on_clicks` handler property.
#[track_caller]
pub fn button(description: impl Into<String>) -> Element {
    Element::new(
        Component::Native(button_type()),
        Props::new().with("description", description.into()),
    )
}

// ---- Slider ---------------------------------------------------------------

/// Companion node a [`Slider`] brings along, the way real toolkits attach
/// style objects. The backend stores it separately and the reconciler
/// tracks it as an orphan of the slider.
pub struct SliderStyle {
    pub handle_color: String,
    pub closed: bool,
    observers: Observers,
}

impl Default for SliderStyle {
    fn default() -> Self {
        Self {
            handle_color: "gray".to_owned(),
            closed: false,
            observers: Observers::default(),
        }
    }
}

impl TargetNode for SliderStyle {
    fn type_name(&self) -> &'static str {
        "SliderStyle"
    }

    fn get(&self, name: &str) -> Option<PropValue> {
        match name {
            "handle_color" => Some(PropValue::Str(self.handle_color.clone())),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: PropValue) -> Result<(), NodeError> {
        match name {
            "handle_color" => {
                self.handle_color = value.as_str().unwrap_or_default().to_owned();
                Ok(())
            }
            _ => Err(unknown("SliderStyle", name)),
        }
    }

    fn observe(&mut self, name: &str, handler: PropHandler) -> ObserverId {
        self.observers.observe(name, handler)
    }

    fn unobserve(&mut self, name: &str, observer: ObserverId) {
        self.observers.unobserve(name, observer);
    }

    fn observers(&self, name: &str) -> Vec<PropHandler> {
        self.observers.of(name)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

pub struct Slider {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub closed: bool,
    style: Option<Box<SliderStyle>>,
    observers: Observers,
}

impl Default for Slider {
    fn default() -> Self {
        Self {
            value: 0.0,
            min: 0.0,
            max: 100.0,
            closed: false,
            style: Some(Box::<SliderStyle>::default()),
            observers: Observers::default(),
        }
    }
}

fn default_float_zero() -> PropValue {
    PropValue::Float(0.0)
}

fn default_float_hundred() -> PropValue {
    PropValue::Float(100.0)
}

static SLIDER_PROPS: &[PropSpec] = &[
    PropSpec {
        name: "value",
        default: default_float_zero,
    },
    PropSpec {
        name: "min",
        default: default_float_zero,
    },
    PropSpec {
        name: "max",
        default: default_float_hundred,
    },
];

impl TargetNode for Slider {
    fn type_name(&self) -> &'static str {
        "Slider"
    }

    fn get(&self, name: &str) -> Option<PropValue> {
        match name {
            "value" => Some(PropValue::Float(self.value)),
            "min" => Some(PropValue::Float(self.min)),
            "max" => Some(PropValue::Float(self.max)),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: PropValue) -> Result<(), NodeError> {
        match name {
            "value" => self.value = value.as_float().unwrap_or_default(),
            "min" => self.min = value.as_float().unwrap_or_default(),
            "max" => self.max = value.as_float().unwrap_or_default(),
            _ => return Err(unknown("Slider", name)),
        }
        Ok(())
    }

    fn observe(&mut self, name: &str, handler: PropHandler) -> ObserverId {
        self.observers.observe(name, handler)
    }

    fn unobserve(&mut self, name: &str, observer: ObserverId) {
        self.observers.unobserve(name, observer);
    }

    fn observers(&self, name: &str) -> Vec<PropHandler> {
        self.observers.of(name)
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn take_companions(&mut self) -> Vec<Box<dyn TargetNode>> {
        match self.style.take() {
            Some(style) => {
                let style: Box<dyn TargetNode> = style;
                vec![style]
            }
            None => Vec::new(),
        }
    }
}

pub fn slider_type() -> NativeType {
    NativeType::new::<Slider>("Slider", || Box::<Slider>::default(), SLIDER_PROPS)
}

/// A slider element with a companion style node.
#[track_caller]
pub fn slider(value: f64) -> Element {
    Element::new(
        Component::Native(slider_type()),
        Props::new().with("value", value),
    )
}

// ---- Column ---------------------------------------------------------------

/// Vertical container holding an ordered list of child nodes. Also serves
/// as the root container [`MemoryBackend::create_container`] hands out.
#[derive(Default)]
pub struct Column {
    pub children: Vec<NodeId>,
    pub closed: bool,
    observers: Observers,
}

fn default_children() -> PropValue {
    PropValue::List(Vec::new())
}

static COLUMN_PROPS: &[PropSpec] = &[PropSpec {
    name: "children",
    default: default_children,
}];

impl TargetNode for Column {
    fn type_name(&self) -> &'static str {
        "Column"
    }

    fn get(&self, name: &str) -> Option<PropValue> {
        match name {
            "children" => Some(PropValue::List(
                self.children.iter().map(|id| PropValue::Node(*id)).collect(),
            )),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: PropValue) -> Result<(), NodeError> {
        match name {
            "children" => {
                self.children = value
                    .as_list()
                    .map(|values| values.iter().filter_map(PropValue::as_node).collect())
                    .unwrap_or_default();
                Ok(())
            }
            _ => Err(unknown("Column", name)),
        }
    }

    fn observe(&mut self, name: &str, handler: PropHandler) -> ObserverId {
        self.observers.observe(name, handler)
    }

    fn unobserve(&mut self, name: &str, observer: ObserverId) {
        self.observers.unobserve(name, observer);
    }

    fn observers(&self, name: &str) -> Vec<PropHandler> {
        self.observers.of(name)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

pub fn column_type() -> NativeType {
    NativeType::new::<Column>("Column", || Box::<Column>::default(), COLUMN_PROPS)
}

/// A column element; fill it with `.nest(|| { ... })` or an explicit
/// `children` list.
#[track_caller]
pub fn column() -> Element {
    Element::new(Component::Native(column_type()), Props::new())
}

// ---- MemoryBackend --------------------------------------------------------

/// Backend storing widgets in a slab of boxed nodes. Ids are never reused,
/// so a stale id reliably reports `Missing` instead of aliasing a newer
/// widget.
#[derive(Default)]
pub struct MemoryBackend {
    nodes: Vec<Option<Box<dyn TargetNode>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, node: Box<dyn TargetNode>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Some(node));
        id
    }

    fn node(&self, id: NodeId) -> Result<&dyn TargetNode, NodeError> {
        self.nodes
            .get(id)
            .and_then(|slot| slot.as_deref())
            .ok_or(NodeError::Missing { id })
    }
}

impl Backend for MemoryBackend {
    fn create(&mut self, ty: &NativeType, props: &PropMap) -> Result<NodeId, NodeError> {
        let mut node = ty.construct();
        for (name, value) in props {
            node.set(name, value.clone())?;
        }
        let companions = node.take_companions();
        let id = self.insert(node);
        for companion in companions {
            self.insert(companion);
        }
        Ok(id)
    }

    fn create_container(&mut self) -> Result<NodeId, NodeError> {
        Ok(self.insert(Box::<Column>::default()))
    }

    fn set_prop(&mut self, id: NodeId, name: &str, value: PropValue) -> Result<(), NodeError> {
        self.node_mut(id)?.set(name, value)
    }

    fn get_prop(&self, id: NodeId, name: &str) -> Result<Option<PropValue>, NodeError> {
        Ok(self.node(id)?.get(name))
    }

    fn observe(
        &mut self,
        id: NodeId,
        name: &str,
        handler: PropHandler,
    ) -> Result<ObserverId, NodeError> {
        Ok(self.node_mut(id)?.observe(name, handler))
    }

    fn unobserve(
        &mut self,
        id: NodeId,
        name: &str,
        observer: ObserverId,
    ) -> Result<(), NodeError> {
        self.node_mut(id)?.unobserve(name, observer);
        Ok(())
    }

    fn observers_of(&self, id: NodeId, name: &str) -> Result<Vec<PropHandler>, NodeError> {
        Ok(self.node(id)?.observers(name))
    }

    fn begin_batch(&mut self, id: NodeId) -> Result<(), NodeError> {
        self.node_mut(id)?.begin_batch();
        Ok(())
    }

    fn end_batch(&mut self, id: NodeId) -> Result<(), NodeError> {
        self.node_mut(id)?.end_batch();
        Ok(())
    }

    fn close_node(&mut self, id: NodeId) -> Result<(), NodeError> {
        let slot = self
            .nodes
            .get_mut(id)
            .ok_or(NodeError::Missing { id })?;
        let mut node = slot.take().ok_or(NodeError::Missing { id })?;
        log::debug!("closing node {id} ({})", node.type_name());
        node.close();
        Ok(())
    }

    fn node_type_id(&self, id: NodeId) -> Result<std::any::TypeId, NodeError> {
        Ok(self.node(id)?.as_any().type_id())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut dyn TargetNode, NodeError> {
        self.nodes
            .get_mut(id)
            .and_then(|slot| slot.as_deref_mut())
            .ok_or(NodeError::Missing { id })
    }

    fn live_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
            .collect()
    }

    fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id), Some(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn backend_creates_and_updates_widgets() {
        let mut backend = MemoryBackend::new();
        let mut props = PropMap::new();
        props.insert("text".to_owned(), PropValue::Str("hi".to_owned()));
        let id = backend.create(&label_type(), &props).unwrap();
        assert_eq!(
            backend.get_prop(id, "text").unwrap(),
            Some(PropValue::Str("hi".to_owned()))
        );
        backend
            .set_prop(id, "text", PropValue::Str("bye".to_owned()))
            .unwrap();
        assert_eq!(
            backend.get_prop(id, "text").unwrap(),
            Some(PropValue::Str("bye".to_owned()))
        );
    }

    #[test]
    fn unknown_property_is_rejected() {
        let mut backend = MemoryBackend::new();
        let id = backend.create(&label_type(), &PropMap::new()).unwrap();
        let err = backend
            .set_prop(id, "nope", PropValue::Null)
            .unwrap_err();
        assert!(matches!(err, NodeError::UnknownProperty { .. }));
    }

    #[test]
    fn slider_brings_its_style_companion() {
        let mut backend = MemoryBackend::new();
        let id = backend.create(&slider_type(), &PropMap::new()).unwrap();
        let live = backend.live_ids();
        assert_eq!(live.len(), 2);
        assert!(live.contains(&id));
    }

    #[test]
    fn closed_ids_are_not_reused() {
        let mut backend = MemoryBackend::new();
        let a = backend.create(&label_type(), &PropMap::new()).unwrap();
        backend.close_node(a).unwrap();
        assert!(!backend.contains(a));
        let b = backend.create(&label_type(), &PropMap::new()).unwrap();
        assert_ne!(a, b);
        assert!(matches!(
            backend.get_prop(a, "text").unwrap_err(),
            NodeError::Missing { .. }
        ));
    }

    #[test]
    fn observers_fire_per_property() {
        let mut backend = MemoryBackend::new();
        let id = backend.create(&button_type(), &PropMap::new()).unwrap();
        let hits = Rc::new(Cell::new(0));
        let hits2 = Rc::clone(&hits);
        let observer = backend
            .observe(
                id,
                "clicks",
                Rc::new(move |_| hits2.set(hits2.get() + 1)),
            )
            .unwrap();
        for handler in backend.observers_of(id, "clicks").unwrap() {
            handler(&PropValue::Int(1));
        }
        assert_eq!(hits.get(), 1);
        backend.unobserve(id, "clicks", observer).unwrap();
        assert!(backend.observers_of(id, "clicks").unwrap().is_empty());
    }
}
