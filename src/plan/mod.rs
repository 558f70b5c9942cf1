//! The plan data model: [`PlanStep`], [`QueryPlan`], and the insertion-point [`Path`] grammar.
//!
//! See `spec.md` §3 and the `FetchNode`/`FetchDataPathElement` family in the teacher's
//! `query_plan/mod.rs`, which this is a deliberately smaller cousin of: no `@defer`, no
//! subscriptions, no rewrites — just fetch, sequence, and the insertion point that stitches a
//! fetch's result back into the tree.

pub mod operation;
pub mod planner;
pub mod printer;

use std::fmt;
use std::sync::Arc;

use crate::plan::operation::NormalizedSelectionSet;
use crate::queryer::Queryer;

/// One point of an insertion path. See `spec.md` §3's Path grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPoint {
    /// `fieldName` — descend into an object field.
    Field(String),
    /// `fieldName:index` — descend into the index-th element of a list field.
    ListIndex { field: String, index: usize },
    /// `fieldName#id` — an object field whose concrete id has been discovered.
    FieldWithId { field: String, id: String },
    /// `fieldName:index#id` — a list element whose concrete id has been discovered.
    ListIndexWithId {
        field: String,
        index: usize,
        id: String,
    },
}

impl PathPoint {
    pub fn field_name(&self) -> &str {
        match self {
            PathPoint::Field(f)
            | PathPoint::ListIndex { field: f, .. }
            | PathPoint::FieldWithId { field: f, .. }
            | PathPoint::ListIndexWithId { field: f, .. } => f,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            PathPoint::FieldWithId { id, .. } | PathPoint::ListIndexWithId { id, .. } => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for PathPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPoint::Field(name) => write!(f, "{name}"),
            PathPoint::ListIndex { field, index } => write!(f, "{field}:{index}"),
            PathPoint::FieldWithId { field, id } => write!(f, "{field}#{id}"),
            PathPoint::ListIndexWithId { field, index, id } => {
                write!(f, "{field}:{index}#{id}")
            }
        }
    }
}

/// An ordered sequence of [`PathPoint`]s identifying where in the response tree a step's result
/// belongs. Abstract (plan-time, names only) or concrete (execution-time, with list indices and
/// discovered ids), depending on who built it; the type is shared because the grammar is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path(pub Vec<PathPoint>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn push_field(&self, field: impl Into<String>) -> Self {
        let mut points = self.0.clone();
        points.push(PathPoint::Field(field.into()));
        Path(points)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .0
            .iter()
            .map(PathPoint::to_string)
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{rendered}")
    }
}

/// Whether a step's rendered document is a `query` or a `mutation`. Only ever `Mutation` for a
/// mutation operation's own top-level chained steps; every entity (`node(id:)`) fetch spawned by
/// `descend` is a plain query regardless of what kind of operation spawned it (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// One node of the plan tree.
///
/// `selection_set` is an owned, freestanding tree built by the planner for exactly this step (not
/// a borrow into the client's document), so the printer can render it without any lifetime tied
/// back to the original request.
pub struct PlanStep {
    /// The GraphQL type this step's `selection_set` is rooted at (`"Query"`, `"Mutation"`, or an
    /// object type name for a dependent/entity step).
    pub parent_type: String,
    /// What to ask `queryer`'s service for.
    pub selection_set: NormalizedSelectionSet,
    /// Bound to exactly one upstream URL.
    pub queryer: Arc<dyn Queryer>,
    /// Where in the final response this step's result is merged. Abstract: names and aliases
    /// only, no indices or ids — those are resolved at execution time against the partially
    /// stitched result (`spec.md` §4.4).
    pub insertion_point: Path,
    /// Whether this step must be wrapped as `node(id: $id) { ... }` against the service it
    /// targets — true for every non-root step (`parent_type` is not `Query`/`Mutation`).
    pub is_entity_fetch: bool,
    /// Whether this step's own rendered document is a `query` or a `mutation`.
    pub operation_kind: OperationKind,
    /// Dependent steps that may only execute once this one's result is stitched in. `Arc`-wrapped
    /// so the executor can hand a step to a spawned task without borrowing from the plan tree.
    pub then: Vec<Arc<PlanStep>>,
    /// Subset of the operation's variables referenced inside `selection_set`.
    pub variables_used: Vec<String>,
    /// Synthetic `id` fields this step's selection carries purely so a dependent can be
    /// stitched in later; scrubbed from the final response unless the client also asked for them.
    pub synthetic_ids: Vec<Path>,
}

impl fmt::Debug for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanStep")
            .field("parent_type", &self.parent_type)
            .field("insertion_point", &self.insertion_point)
            .field("is_entity_fetch", &self.is_entity_fetch)
            .field("variables_used", &self.variables_used)
            .field("then", &self.then)
            .finish()
    }
}

/// One operation's complete plan.
///
/// Fragment definitions are not retained here: `operation.rs`'s `apply_fragments` inlines every
/// fragment spread and inline fragment at normalization time, so each step's `selection_set` is
/// already fragment-free by the time a `QueryPlan` exists. Sub-queries are re-emitted from that
/// normalized form rather than with the client's original fragment spreads honored faithfully —
/// a deliberate deviation from `spec.md` §4.3 step 1, recorded in `DESIGN.md`.
pub struct QueryPlan {
    pub operation_name: Option<String>,
    /// Top-level steps. For a query, these run concurrently. For a mutation, this holds exactly
    /// one entry — the first top-level field's step — with the remaining top-level mutation
    /// fields chained through successive `then` entries in document order (`spec.md` §5).
    pub root_steps: Vec<Arc<PlanStep>>,
    /// Every variable the client's operation declares, by name, printed as its wire type
    /// (`"ID!"`, `"[String]"`, ...). Each step's `variables_used` indexes into this map when the
    /// printer needs `$name: Type` declarations for the subset it actually references.
    pub variable_types: std::collections::HashMap<String, String>,
}
