use std::fmt;

use crate::element::DeclSite;
use crate::node::NodeError;

/// Error raised by `render`, `close` or a state setter. Carries a kind that
/// tests can match on, plus (in debug-trace mode) the chain of element
/// declaration sites collected while the failing pass unwound.
#[derive(Debug)]
pub struct RenderError {
    kind: RenderErrorKind,
    trace: Vec<DeclSite>,
}

/// User-facing error taxonomy. `Invariant` is the internal family: those
/// indicate a bug in the reconciler, not in the caller's components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderErrorKind {
    /// Two elements resolved to the same key within one context and pass.
    KeyCollision { key: String },
    /// A hook was invoked while no render pass was executing.
    NoActiveRenderContext,
    /// `use_context` exhausted the parent chain without finding the key.
    ContextNotFound { key: String },
    /// Node lookup for an element that is not part of the live tree.
    StaleElementReference { element: String },
    /// The stabilization loop exceeded its iteration bound.
    UnstableRenderLoop { iterations: usize },
    /// A container-less root produced a different node across renders.
    RootNodeTypeChanged,
    /// Teardown found nodes or orphans that were never cleaned up.
    ResourceLeak { detail: String },
    /// Positional arguments were supplied to a native element.
    NativeElementArgs { element: String },
    /// The target-node backend failed.
    Node(NodeError),
    /// Internal-invariant violation; should never occur.
    Invariant(InvariantViolation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Elements were constructed during a pass but never consumed as a
    /// context's output or nested inside another element's node.
    UnreferencedElements { elements: Vec<String> },
    /// The pending set was not empty at the end of consolidation.
    PendingNotEmpty { count: usize },
    /// A component function re-entrantly drove a render pass.
    RecursiveRender,
    /// No child context was published for a rendered function element.
    MissingChildContext { key: String },
    /// Element/node bookkeeping disagreed about ownership.
    NodeOwnership { detail: String },
}

impl RenderError {
    pub(crate) fn new(kind: RenderErrorKind) -> Self {
        Self {
            kind,
            trace: Vec::new(),
        }
    }

    pub(crate) fn key_collision(key: impl Into<String>) -> Self {
        Self::new(RenderErrorKind::KeyCollision { key: key.into() })
    }

    pub(crate) fn no_active_render_context() -> Self {
        Self::new(RenderErrorKind::NoActiveRenderContext)
    }

    pub(crate) fn context_not_found(key: impl Into<String>) -> Self {
        Self::new(RenderErrorKind::ContextNotFound { key: key.into() })
    }

    pub(crate) fn stale_element(element: impl Into<String>) -> Self {
        Self::new(RenderErrorKind::StaleElementReference {
            element: element.into(),
        })
    }

    pub(crate) fn unstable_render_loop(iterations: usize) -> Self {
        Self::new(RenderErrorKind::UnstableRenderLoop { iterations })
    }

    pub(crate) fn resource_leak(detail: impl Into<String>) -> Self {
        Self::new(RenderErrorKind::ResourceLeak {
            detail: detail.into(),
        })
    }

    pub(crate) fn invariant(violation: InvariantViolation) -> Self {
        Self::new(RenderErrorKind::Invariant(violation))
    }

    pub(crate) fn ownership(detail: impl Into<String>) -> Self {
        Self::invariant(InvariantViolation::NodeOwnership {
            detail: detail.into(),
        })
    }

    pub fn kind(&self) -> &RenderErrorKind {
        &self.kind
    }

    /// True for the assertion-grade internal family.
    pub fn is_internal(&self) -> bool {
        matches!(self.kind, RenderErrorKind::Invariant(_))
    }

    /// Declaration sites of the elements on the failing path, innermost
    /// first. Empty unless debug tracing was enabled on the render context.
    pub fn declaration_trace(&self) -> &[DeclSite] {
        &self.trace
    }

    pub(crate) fn push_site(&mut self, site: DeclSite) {
        self.trace.push(site);
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RenderErrorKind::KeyCollision { key } => write!(f, "duplicate key {key:?}")?,
            RenderErrorKind::NoActiveRenderContext => {
                write!(f, "no active render context; hooks may only be called from a component render function")?
            }
            RenderErrorKind::ContextNotFound { key } => write!(
                f,
                "no value provided under context key {key:?} in this or any parent component"
            )?,
            RenderErrorKind::StaleElementReference { element } => write!(
                f,
                "element {element} is not part of the live tree; you may have used a stale element"
            )?,
            RenderErrorKind::UnstableRenderLoop { iterations } => write!(
                f,
                "render loop did not stabilize after {iterations} iterations"
            )?,
            RenderErrorKind::RootNodeTypeChanged => write!(
                f,
                "no container in use and the root produced a new node; the root must keep returning the same node type"
            )?,
            RenderErrorKind::ResourceLeak { detail } => write!(f, "teardown leak: {detail}")?,
            RenderErrorKind::NativeElementArgs { element } => write!(
                f,
                "native element {element} only takes keyword properties, not positional arguments"
            )?,
            RenderErrorKind::Node(err) => write!(f, "{err}")?,
            RenderErrorKind::Invariant(violation) => write!(f, "{violation}")?,
        }
        for site in &self.trace {
            write!(f, "\n  element declared at {site}")?;
        }
        Ok(())
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::UnreferencedElements { elements } => {
                write!(f, "internal: unreferenced elements {elements:?}")
            }
            InvariantViolation::PendingNotEmpty { count } => {
                write!(f, "internal: {count} element(s) left pending after consolidation")
            }
            InvariantViolation::RecursiveRender => {
                write!(f, "internal: recursive render detected inside a component function")
            }
            InvariantViolation::MissingChildContext { key } => {
                write!(f, "internal: no child context published for key {key:?}")
            }
            InvariantViolation::NodeOwnership { detail } => {
                write!(f, "internal: node ownership violated: {detail}")
            }
        }
    }
}

impl std::error::Error for RenderError {}

impl From<NodeError> for RenderError {
    fn from(err: NodeError) -> Self {
        Self::new(RenderErrorKind::Node(err))
    }
}
