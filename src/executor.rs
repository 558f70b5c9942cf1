//! Parallel executor (`spec.md` §4.4): walks a [`QueryPlan`], issuing sub-queries concurrently in
//! dependency order, discovering concrete insertion points (including list fan-out) against the
//! partially stitched result, and assembling the final response tree.
//!
//! Concurrency shape follows `spec.md` §9's design note: a wait-group-like counter (how many
//! steps are still outstanding), an error slot written at most once, and a single mutex around the
//! shared result tree — no finer-grained locking, since step completions arrive in coarse bursts.
//! Every step's `tokio::spawn` handle is kept in the engine so the first error (or an elapsed
//! deadline) can abort every in-flight and not-yet-spawned step in one sweep (`spec.md` §5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use apollo_compiler::ast::{OperationType, Value as AstValue};
use apollo_compiler::executable::Argument;
use apollo_compiler::{Name, Node};
use serde_json::Value;
use tokio::sync::Notify;

use crate::error::GatewayError;
use crate::middleware::ResponseMiddleware;
use crate::plan::operation::NormalizedField;
use crate::plan::printer::{print_document, VariableDecl};
use crate::plan::{OperationKind, Path, PathPoint, PlanStep, QueryPlan};
use crate::queryer::QueryerInput;

/// The variable name bound to the discovered entity id on every `node(id: $__insertionId)` query
/// the executor issues. Namespaced so it can never collide with a client-declared variable.
const ENTITY_ID_VARIABLE: &str = "__insertionId";

/// Per-request execution state (`spec.md` §3's `ExecutionContext`, minus the parts — caller's
/// request context, request middlewares — that belong to the HTTP layer rather than the core).
pub struct ExecutionContext {
    pub variables: HashMap<String, Value>,
    /// Response middlewares to run, in order, once the result tree is fully stitched. The
    /// gateway facade is responsible for putting `scrubInsertionIDs` first (`spec.md` §4.7).
    pub response_middlewares: Vec<Arc<dyn ResponseMiddleware>>,
    /// Optional wall-clock deadline; steps still in flight when it elapses are abandoned and the
    /// whole execution fails with [`GatewayError::Cancelled`] (`spec.md` §5).
    pub deadline: Option<std::time::Duration>,
}

struct Engine {
    result: Mutex<Value>,
    variable_types: HashMap<String, String>,
    variables: HashMap<String, Value>,
    counter: AtomicI64,
    error: Mutex<Option<GatewayError>>,
    done: Notify,
    /// Every step task spawned so far. Aborted wholesale the moment the error slot is first
    /// written or the deadline elapses, so an in-flight upstream call and any not-yet-spawned
    /// dependents are actually dropped rather than left running in the background
    /// (`spec.md` §5).
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    fn abort_all(&self) {
        for handle in self.handles.lock().unwrap().iter() {
            handle.abort();
        }
    }
}

/// Executes `plan` to completion and returns the stitched, middleware-processed response tree.
pub async fn execute(plan: &QueryPlan, ctx: ExecutionContext) -> Result<Value, GatewayError> {
    let mut response = run_plan(plan, &ctx).await?;
    let scrub_paths = collect_synthetic_id_paths(plan);
    for middleware in &ctx.response_middlewares {
        middleware.apply(&mut response, &scrub_paths);
    }
    Ok(response)
}

async fn run_plan(plan: &QueryPlan, ctx: &ExecutionContext) -> Result<Value, GatewayError> {
    if plan.root_steps.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let engine = Arc::new(Engine {
        result: Mutex::new(Value::Object(serde_json::Map::new())),
        variable_types: plan.variable_types.clone(),
        variables: ctx.variables.clone(),
        counter: AtomicI64::new(plan.root_steps.len() as i64),
        error: Mutex::new(None),
        done: Notify::new(),
        handles: Mutex::new(Vec::new()),
    });

    for step in &plan.root_steps {
        spawn_step(engine.clone(), Arc::clone(step), Path::root());
    }

    match ctx.deadline {
        Some(duration) => {
            if tokio::time::timeout(duration, wait_for_completion(&engine))
                .await
                .is_err()
            {
                engine.abort_all();
                return Err(GatewayError::Cancelled(
                    "execution deadline elapsed".to_string(),
                ));
            }
        }
        None => wait_for_completion(&engine).await,
    }

    if let Some(err) = engine.error.lock().unwrap().take() {
        engine.abort_all();
        return Err(err);
    }
    Ok(engine.result.lock().unwrap().clone())
}

async fn wait_for_completion(engine: &Arc<Engine>) {
    loop {
        if engine.counter.load(Ordering::SeqCst) <= 0 {
            return;
        }
        if engine.error.lock().unwrap().is_some() {
            return;
        }
        engine.done.notified().await;
    }
}

fn spawn_step(engine: Arc<Engine>, step: Arc<PlanStep>, concrete_point: Path) {
    let registry = engine.clone();
    let handle = tokio::spawn(async move {
        if engine.error.lock().unwrap().is_some() {
            finish_step(&engine, 1);
            return;
        }
        match run_step(&engine, &step, &concrete_point).await {
            Ok(launches) => {
                let extra = launches.len() as i64;
                if extra > 0 {
                    engine.counter.fetch_add(extra, Ordering::SeqCst);
                }
                for (child, point) in launches {
                    spawn_step(engine.clone(), child, point);
                }
                finish_step(&engine, 1);
            }
            Err(err) => {
                let mut slot = engine.error.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(err);
                }
                drop(slot);
                finish_step(&engine, 1);
                engine.abort_all();
            }
        }
    });
    registry.handles.lock().unwrap().push(handle);
}

fn finish_step(engine: &Arc<Engine>, completed: i64) {
    if completed != 0 {
        engine.counter.fetch_sub(completed, Ordering::SeqCst);
    }
    engine.done.notify_waiters();
}

/// Executes one step: renders its query, sends it, stitches the response into the shared result,
/// and returns the concrete launches for its dependents (not yet spawned by the caller).
async fn run_step(
    engine: &Engine,
    step: &PlanStep,
    concrete_point: &Path,
) -> Result<Vec<(Arc<PlanStep>, Path)>, GatewayError> {
    let entity_id = if step.is_entity_fetch {
        Some(
            concrete_point
                .0
                .last()
                .and_then(PathPoint::id)
                .ok_or_else(|| {
                    GatewayError::StitchError(
                        "entity fetch launched without a discovered id".to_string(),
                    )
                })?
                .to_string(),
        )
    } else {
        None
    };

    let (document, variables) = render_step(engine, step, entity_id.as_deref());

    let response = step
        .queryer
        .query(QueryerInput {
            query: document,
            operation_name: None,
            variables,
        })
        .await?;

    let data = if step.is_entity_fetch {
        response
            .get("node")
            .cloned()
            .ok_or_else(|| GatewayError::StitchError("node query missing .node".to_string()))?
    } else {
        response
    };

    {
        let mut result = engine.result.lock().unwrap();
        stitch(&mut result, concrete_point, data)?;
    }

    let mut launches = Vec::new();
    for child in &step.then {
        if child.is_entity_fetch {
            let result = engine.result.lock().unwrap();
            for point in expand_insertion_points(&result, &child.insertion_point)? {
                launches.push((Arc::clone(child), point));
            }
        } else {
            // A mutation's next chained field: always a single launch at the document root.
            launches.push((Arc::clone(child), Path::root()));
        }
    }
    Ok(launches)
}

/// Renders `step`'s document and the variable map to send with it. Entity-fetch steps wrap the
/// step's own selection in a synthetic `node(id: $__insertionId) { ... }` field (`spec.md` §4.3
/// step 4's join mechanism); root/mutation-chain steps print their selection directly.
fn render_step(
    engine: &Engine,
    step: &PlanStep,
    entity_id: Option<&str>,
) -> (String, HashMap<String, Value>) {
    let mut variable_decls: Vec<VariableDecl> = step
        .variables_used
        .iter()
        .map(|name| VariableDecl {
            name: name.clone(),
            ty: engine
                .variable_types
                .get(name)
                .cloned()
                .unwrap_or_else(|| "String".to_string()),
        })
        .collect();

    let mut variables: HashMap<String, Value> = step
        .variables_used
        .iter()
        .filter_map(|name| {
            engine
                .variables
                .get(name)
                .map(|v| (name.clone(), v.clone()))
        })
        .collect();

    if step.is_entity_fetch {
        let id = entity_id.expect("entity fetch step always carries a discovered id");
        variable_decls.push(VariableDecl {
            name: ENTITY_ID_VARIABLE.to_string(),
            ty: "ID!".to_string(),
        });
        variables.insert(
            ENTITY_ID_VARIABLE.to_string(),
            Value::String(id.to_string()),
        );

        let node_field = NormalizedField {
            alias: None,
            name: "node".to_string(),
            arguments: vec![Node::new(Argument {
                name: Name::new("id"),
                value: Node::new(AstValue::Variable(Name::new(ENTITY_ID_VARIABLE))),
            })],
            selection_set: step.selection_set.clone(),
            synthetic: false,
        };
        let mut root = crate::plan::operation::NormalizedSelectionSet::default();
        root.insert(node_field);

        let document = print_document(OperationType::Query, None, &variable_decls, &root);
        (document, variables)
    } else {
        let operation_type = match step.operation_kind {
            OperationKind::Query => OperationType::Query,
            OperationKind::Mutation => OperationType::Mutation,
        };
        let document = print_document(operation_type, None, &variable_decls, &step.selection_set);
        (document, variables)
    }
}

/// Merges `data` into the shared result tree at `path`, creating any intermediate objects/arrays
/// the path requires (`spec.md` §4.4's stitching rule).
fn stitch(result: &mut Value, path: &Path, data: Value) -> Result<(), GatewayError> {
    if path.is_root() {
        merge_shallow(result, data);
        return Ok(());
    }
    let target = navigate_mut(result, &path.0)?;
    merge_shallow(target, data);
    Ok(())
}

/// Walks `points` from `value`, creating objects (and, for list points, padding arrays with
/// `null`) as needed, and returns a mutable reference to the addressed slot.
fn navigate_mut<'a>(value: &'a mut Value, points: &[PathPoint]) -> Result<&'a mut Value, GatewayError> {
    let Some((head, rest)) = points.split_first() else {
        return Ok(value);
    };

    match head {
        PathPoint::Field(field) | PathPoint::FieldWithId { field, .. } => {
            if !value.is_object() {
                *value = Value::Object(serde_json::Map::new());
            }
            let map = value.as_object_mut().unwrap();
            let entry = map.entry(field.clone()).or_insert(Value::Null);
            navigate_mut(entry, rest)
        }
        PathPoint::ListIndex { field, index } | PathPoint::ListIndexWithId { field, index, .. } => {
            if !value.is_object() {
                *value = Value::Object(serde_json::Map::new());
            }
            let map = value.as_object_mut().unwrap();
            let entry = map.entry(field.clone()).or_insert(Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            let array = entry.as_array_mut().unwrap();
            while array.len() <= *index {
                array.push(Value::Null);
            }
            navigate_mut(&mut array[*index], rest)
        }
    }
}

/// Merges `incoming` into `target` in place. Objects merge key-by-key (recursing on shared keys),
/// arrays merge positionally (recursing per index, appending any extra incoming elements), and
/// anything else is replaced only if `target` was `null`.
fn merge_shallow(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge_shallow(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(existing), Value::Array(incoming)) => {
            let mut incoming = incoming.into_iter();
            for slot in existing.iter_mut() {
                if let Some(value) = incoming.next() {
                    merge_shallow(slot, value);
                }
            }
            existing.extend(incoming);
        }
        (slot, value) => {
            if slot.is_null() {
                *slot = value;
            }
        }
    }
}

/// Resolves an abstract (plan-time) insertion point into every concrete point it addresses in the
/// partially stitched result, fanning out over list fields and attaching the discovered `id` at
/// the final point (`spec.md` §4.4's "discover concrete insertion points").
fn expand_insertion_points(result: &Value, abstract_path: &Path) -> Result<Vec<Path>, GatewayError> {
    let expanded = expand_points(result, &abstract_path.0)?;
    let mut out = Vec::with_capacity(expanded.len());
    for (points, leaf) in expanded {
        let id = leaf
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::StitchError(
                    "entity join target is missing its stitched id".to_string(),
                )
            })?
            .to_string();
        out.push(Path(with_id(points, id)));
    }
    Ok(out)
}

fn expand_points<'a>(
    value: &'a Value,
    points: &[PathPoint],
) -> Result<Vec<(Vec<PathPoint>, &'a Value)>, GatewayError> {
    let Some((head, rest)) = points.split_first() else {
        return Ok(vec![(Vec::new(), value)]);
    };

    let field = head.field_name();
    let next = match value {
        Value::Object(map) => map.get(field).unwrap_or(&Value::Null),
        Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(GatewayError::StitchError(format!(
                "expected an object while descending into `{field}`"
            )))
        }
    };

    match next {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => {
            let mut out = Vec::new();
            for (index, item) in items.iter().enumerate() {
                let fanned = expand_points(item, rest)?;
                for (mut sub_points, leaf) in fanned {
                    let mut prefix = vec![PathPoint::ListIndex {
                        field: field.to_string(),
                        index,
                    }];
                    prefix.append(&mut sub_points);
                    out.push((prefix, leaf));
                }
            }
            Ok(out)
        }
        _ => {
            let fanned = expand_points(next, rest)?;
            Ok(fanned
                .into_iter()
                .map(|(mut sub_points, leaf)| {
                    let mut prefix = vec![PathPoint::Field(field.to_string())];
                    prefix.append(&mut sub_points);
                    (prefix, leaf)
                })
                .collect())
        }
    }
}

/// Rewrites the final point of a concrete path to carry the discovered id (`Field` -> `FieldWithId`,
/// `ListIndex` -> `ListIndexWithId`).
fn with_id(mut points: Vec<PathPoint>, id: String) -> Vec<PathPoint> {
    if let Some(last) = points.pop() {
        let replaced = match last {
            PathPoint::Field(field) => PathPoint::FieldWithId { field, id },
            PathPoint::ListIndex { field, index } => PathPoint::ListIndexWithId { field, index, id },
            already_ided => already_ided,
        };
        points.push(replaced);
    }
    points
}

/// Collects every synthetic-id scrub path across the whole plan tree, root steps and their full
/// `then` chains included (`spec.md` §4.7).
fn collect_synthetic_id_paths(plan: &QueryPlan) -> Vec<Path> {
    let mut out = Vec::new();
    for step in &plan.root_steps {
        collect_step_synthetic_ids(step, &mut out);
    }
    out
}

fn collect_step_synthetic_ids(step: &PlanStep, out: &mut Vec<Path>) {
    out.extend(step.synthetic_ids.iter().cloned());
    for child in &step.then {
        collect_step_synthetic_ids(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stitch_at_root_merges_objects() {
        let mut result = serde_json::json!({"a": 1});
        stitch(&mut result, &Path::root(), serde_json::json!({"b": 2})).unwrap();
        assert_eq!(result, serde_json::json!({"a": 1, "b": 2}));
    }

    #[test]
    fn stitch_creates_intermediate_path() {
        let mut result = Value::Object(serde_json::Map::new());
        let path = Path::root().push_field("user");
        stitch(&mut result, &path, serde_json::json!({"name": "Ada"})).unwrap();
        assert_eq!(result, serde_json::json!({"user": {"name": "Ada"}}));
    }

    #[test]
    fn expand_insertion_points_fans_out_over_lists() {
        let result = serde_json::json!({
            "allUsers": [
                {"id": "1", "firstName": "Ada"},
                {"id": "2", "firstName": "Grace"}
            ]
        });
        let abstract_path = Path::root().push_field("allUsers");
        let points = expand_insertion_points(&result, &abstract_path).unwrap();
        assert_eq!(points.len(), 2);
        match &points[0].0[0] {
            PathPoint::ListIndexWithId { field, index, id } => {
                assert_eq!(field, "allUsers");
                assert_eq!(*index, 0);
                assert_eq!(id, "1");
            }
            other => panic!("unexpected point: {other:?}"),
        }
    }

    #[test]
    fn expand_insertion_points_skips_null_parents() {
        let result = serde_json::json!({ "user": null });
        let abstract_path = Path::root().push_field("user");
        let points = expand_insertion_points(&result, &abstract_path).unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn merge_shallow_keeps_existing_non_null_scalar() {
        let mut target = serde_json::json!({"v": 1});
        merge_shallow(&mut target, serde_json::json!({"v": 2}));
        assert_eq!(target, serde_json::json!({"v": 1}));
    }
}
