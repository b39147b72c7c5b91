//! Test support: a backend wrapper that records every mutating operation,
//! so tests can assert not just on final widget state but on how many
//! operations it took to get there (in particular: zero for a no-op pass).

use std::any::TypeId;
use std::cell::RefCell;
use std::rc::Rc;

use trellis_core::node::{
    Backend, NativeType, NodeError, NodeId, ObserverId, PropHandler, PropMap, PropValue,
    TargetNode,
};
use trellis_widgets::MemoryBackend;

/// One mutating backend operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Create { id: NodeId, type_name: &'static str },
    CreateContainer { id: NodeId },
    SetProp { id: NodeId, name: String },
    Observe { id: NodeId, name: String },
    Unobserve { id: NodeId, name: String },
    BeginBatch { id: NodeId },
    EndBatch { id: NodeId },
    Close { id: NodeId },
}

/// Shared handle onto a [`RecordingBackend`]'s log; take one before moving
/// the backend into a render context.
#[derive(Clone, Default)]
pub struct OpLog {
    ops: Rc<RefCell<Vec<Op>>>,
}

impl OpLog {
    pub fn take(&self) -> Vec<Op> {
        std::mem::take(&mut *self.ops.borrow_mut())
    }

    pub fn clear(&self) {
        self.ops.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.ops.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.borrow().is_empty()
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.ops.borrow().iter().filter(|op| pred(op)).count()
    }

    /// Property writes, optionally restricted to one property name.
    pub fn set_props(&self, name: Option<&str>) -> usize {
        self.count(|op| match op {
            Op::SetProp { name: n, .. } => name.map_or(true, |want| want == n),
            _ => false,
        })
    }

    pub fn creates(&self) -> usize {
        self.count(|op| matches!(op, Op::Create { .. }))
    }

    pub fn closes(&self) -> usize {
        self.count(|op| matches!(op, Op::Close { .. }))
    }

    fn push(&self, op: Op) {
        self.ops.borrow_mut().push(op);
    }
}

/// Backend decorator recording every mutating operation into an [`OpLog`].
/// Reads pass through unrecorded.
pub struct RecordingBackend<B> {
    inner: B,
    log: OpLog,
}

impl<B: Backend> RecordingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            log: OpLog::default(),
        }
    }

    pub fn log(&self) -> OpLog {
        self.log.clone()
    }
}

/// A recording in-memory backend plus its log handle; the usual test
/// fixture.
pub fn recording_memory() -> (RecordingBackend<MemoryBackend>, OpLog) {
    let backend = RecordingBackend::new(MemoryBackend::new());
    let log = backend.log();
    (backend, log)
}

impl<B: Backend> Backend for RecordingBackend<B> {
    fn create(&mut self, ty: &NativeType, props: &PropMap) -> Result<NodeId, NodeError> {
        let id = self.inner.create(ty, props)?;
        self.log.push(Op::Create {
            id,
            type_name: ty.name(),
        });
        Ok(id)
    }

    fn create_container(&mut self) -> Result<NodeId, NodeError> {
        let id = self.inner.create_container()?;
        self.log.push(Op::CreateContainer { id });
        Ok(id)
    }

    fn set_prop(&mut self, id: NodeId, name: &str, value: PropValue) -> Result<(), NodeError> {
        self.inner.set_prop(id, name, value)?;
        self.log.push(Op::SetProp {
            id,
            name: name.to_owned(),
        });
        Ok(())
    }

    fn get_prop(&self, id: NodeId, name: &str) -> Result<Option<PropValue>, NodeError> {
        self.inner.get_prop(id, name)
    }

    fn observe(
        &mut self,
        id: NodeId,
        name: &str,
        handler: PropHandler,
    ) -> Result<ObserverId, NodeError> {
        let observer = self.inner.observe(id, name, handler)?;
        self.log.push(Op::Observe {
            id,
            name: name.to_owned(),
        });
        Ok(observer)
    }

    fn unobserve(
        &mut self,
        id: NodeId,
        name: &str,
        observer: ObserverId,
    ) -> Result<(), NodeError> {
        self.inner.unobserve(id, name, observer)?;
        self.log.push(Op::Unobserve {
            id,
            name: name.to_owned(),
        });
        Ok(())
    }

    fn observers_of(&self, id: NodeId, name: &str) -> Result<Vec<PropHandler>, NodeError> {
        self.inner.observers_of(id, name)
    }

    fn begin_batch(&mut self, id: NodeId) -> Result<(), NodeError> {
        self.inner.begin_batch(id)?;
        self.log.push(Op::BeginBatch { id });
        Ok(())
    }

    fn end_batch(&mut self, id: NodeId) -> Result<(), NodeError> {
        self.inner.end_batch(id)?;
        self.log.push(Op::EndBatch { id });
        Ok(())
    }

    fn close_node(&mut self, id: NodeId) -> Result<(), NodeError> {
        self.inner.close_node(id)?;
        self.log.push(Op::Close { id });
        Ok(())
    }

    fn node_type_id(&self, id: NodeId) -> Result<TypeId, NodeError> {
        self.inner.node_type_id(id)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut dyn TargetNode, NodeError> {
        self.inner.node_mut(id)
    }

    fn live_ids(&self) -> Vec<NodeId> {
        self.inner.live_ids()
    }

    fn contains(&self, id: NodeId) -> bool {
        self.inner.contains(id)
    }
}
