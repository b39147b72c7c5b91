//! Interface boundary to the target-node library: property values, the
//! node contract, and the backend that owns node storage.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::element::Element;

pub type NodeId = usize;
pub type ObserverId = u64;

/// Callback bound to a named node property; invoked with the new value when
/// the property changes externally.
pub type PropHandler = Rc<dyn Fn(&PropValue)>;

/// Ordered property map. Deterministic iteration keeps diffs and child key
/// paths stable across passes.
pub type PropMap = BTreeMap<String, PropValue>;

/// Dynamic property value. `Element` variants may appear anywhere inside a
/// `List` or `Map`; consolidation resolves them to `Node` ids bottom-up
/// before values reach a target node.
#[derive(Clone)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Element(Element),
    List(Vec<PropValue>),
    Map(BTreeMap<String, PropValue>),
    Node(NodeId),
    Handler(PropHandler),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropValue::Float(v) => Some(*v),
            PropValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            PropValue::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            PropValue::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropValue]> {
        match self {
            PropValue::List(values) => Some(values),
            _ => None,
        }
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Null, PropValue::Null) => true,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Float(a), PropValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Element(a), PropValue::Element(b)) => a.id() == b.id(),
            (PropValue::List(a), PropValue::List(b)) => a == b,
            (PropValue::Map(a), PropValue::Map(b)) => a == b,
            (PropValue::Node(a), PropValue::Node(b)) => a == b,
            (PropValue::Handler(a), PropValue::Handler(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => write!(f, "null"),
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => write!(f, "{v:?}"),
            PropValue::Element(el) => write!(f, "{el:?}"),
            PropValue::List(values) => f.debug_list().entries(values).finish(),
            PropValue::Map(map) => f.debug_map().entries(map).finish(),
            PropValue::Node(id) => write!(f, "node#{id}"),
            PropValue::Handler(_) => write!(f, "<handler>"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

impl From<Element> for PropValue {
    fn from(value: Element) -> Self {
        PropValue::Element(value)
    }
}

impl From<Vec<PropValue>> for PropValue {
    fn from(values: Vec<PropValue>) -> Self {
        PropValue::List(values)
    }
}

impl From<Vec<Element>> for PropValue {
    fn from(elements: Vec<Element>) -> Self {
        PropValue::List(elements.into_iter().map(PropValue::Element).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    Missing { id: NodeId },
    TypeMismatch { id: NodeId, expected: &'static str },
    UnknownProperty { node: &'static str, name: String },
    CreateFailed { type_name: &'static str, reason: String },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Missing { id } => write!(f, "node {id} missing"),
            NodeError::TypeMismatch { id, expected } => {
                write!(f, "node {id} type mismatch; expected {expected}")
            }
            NodeError::UnknownProperty { node, name } => {
                write!(f, "node type {node} has no property {name:?}")
            }
            NodeError::CreateFailed { type_name, reason } => {
                write!(f, "could not create {type_name}: {reason}")
            }
        }
    }
}

impl std::error::Error for NodeError {}

/// Contract a live target node must satisfy: named gettable/settable
/// properties, property observation, an optional batched-write scope, and
/// closure. Implementations live outside the reconciler.
pub trait TargetNode: Any {
    fn type_name(&self) -> &'static str;
    fn get(&self, name: &str) -> Option<PropValue>;
    fn set(&mut self, name: &str, value: PropValue) -> Result<(), NodeError>;
    fn observe(&mut self, name: &str, handler: PropHandler) -> ObserverId;
    fn unobserve(&mut self, name: &str, observer: ObserverId);
    fn observers(&self, name: &str) -> Vec<PropHandler>;
    fn begin_batch(&mut self) {}
    fn end_batch(&mut self) {}
    fn close(&mut self) {}
    /// Auxiliary nodes built alongside this one (styles, layouts). The
    /// backend drains them into its own storage right after `create`; the
    /// reconciler then tracks them as orphans of this node.
    fn take_companions(&mut self) -> Vec<Box<dyn TargetNode>> {
        Vec::new()
    }
}

impl dyn TargetNode {
    pub fn as_any(&self) -> &dyn Any {
        self
    }

    pub fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Property declared by a native node type, with the default restored when
/// a previously supplied property is dropped.
pub struct PropSpec {
    pub name: &'static str,
    pub default: fn() -> PropValue,
}

/// Descriptor for a concrete target-node type: what a `NativeComponent`
/// wraps. Identity is the `TypeId` of the node struct, which is also what
/// "same concrete type" means during update-in-place decisions.
#[derive(Clone)]
pub struct NativeType {
    name: &'static str,
    node_type: TypeId,
    construct: fn() -> Box<dyn TargetNode>,
    props: &'static [PropSpec],
}

impl NativeType {
    pub fn new<N: TargetNode>(
        name: &'static str,
        construct: fn() -> Box<dyn TargetNode>,
        props: &'static [PropSpec],
    ) -> Self {
        Self {
            name,
            node_type: TypeId::of::<N>(),
            construct,
            props,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn node_type_id(&self) -> TypeId {
        self.node_type
    }

    pub fn declares(&self, name: &str) -> bool {
        self.props.iter().any(|spec| spec.name == name)
    }

    pub fn default_of(&self, name: &str) -> Option<PropValue> {
        self.props
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| (spec.default)())
    }

    pub fn construct(&self) -> Box<dyn TargetNode> {
        (self.construct)()
    }
}

impl PartialEq for NativeType {
    fn eq(&self, other: &Self) -> bool {
        self.node_type == other.node_type
    }
}

impl fmt::Debug for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeType({})", self.name)
    }
}

/// Storage and operation surface for target nodes. The reconciler consumes
/// exactly these operations; concrete backends (in-memory, real toolkit)
/// implement them.
pub trait Backend {
    fn create(&mut self, ty: &NativeType, props: &PropMap) -> Result<NodeId, NodeError>;
    /// A root container node exposing a mutable ordered `children` list.
    fn create_container(&mut self) -> Result<NodeId, NodeError>;
    fn set_prop(&mut self, id: NodeId, name: &str, value: PropValue) -> Result<(), NodeError>;
    fn get_prop(&self, id: NodeId, name: &str) -> Result<Option<PropValue>, NodeError>;
    fn observe(
        &mut self,
        id: NodeId,
        name: &str,
        handler: PropHandler,
    ) -> Result<ObserverId, NodeError>;
    fn unobserve(&mut self, id: NodeId, name: &str, observer: ObserverId)
        -> Result<(), NodeError>;
    fn observers_of(&self, id: NodeId, name: &str) -> Result<Vec<PropHandler>, NodeError>;
    fn begin_batch(&mut self, id: NodeId) -> Result<(), NodeError>;
    fn end_batch(&mut self, id: NodeId) -> Result<(), NodeError>;
    fn close_node(&mut self, id: NodeId) -> Result<(), NodeError>;
    fn node_type_id(&self, id: NodeId) -> Result<TypeId, NodeError>;
    fn node_mut(&mut self, id: NodeId) -> Result<&mut dyn TargetNode, NodeError>;
    fn live_ids(&self) -> Vec<NodeId>;
    fn contains(&self, id: NodeId) -> bool;
}
