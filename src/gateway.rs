//! Gateway facade (`spec.md` §4.7): the one entry point embedding callers use. Ties together
//! schema merge, planning (with a pluggable cache), and execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use apollo_compiler::ExecutableDocument;
use serde_json::Value;

use crate::error::GatewayError;
use crate::executor::{self, ExecutionContext};
use crate::location::FieldLocationMap;
use crate::merge::merge_schemas;
use crate::middleware::{ResponseMiddleware, ScrubInsertionIds};
use crate::plan::planner::Planner;
use crate::plan::QueryPlan;
use crate::queryer::{NetworkQueryer, Queryer, QueryerFactory, RequestMiddleware};
use crate::schema::{RemoteSchema, Schema};

/// An inbound GraphQL-over-HTTP request, independent of how it was transported (`spec.md` §6).
#[derive(Debug, Clone, Default)]
pub struct GraphQLRequest {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: HashMap<String, Value>,
}

/// A pluggable cache for plans, keyed by `(query, operationName)` (`spec.md` §4.7, §9's "the plan
/// cache interface exists but the default implementation is a no-op"). Implementations must be
/// safe to call from any number of concurrent requests.
pub trait PlanCache: Send + Sync {
    fn get(&self, query: &str, operation_name: Option<&str>) -> Option<Vec<Arc<QueryPlan>>>;
    fn put(&self, query: &str, operation_name: Option<&str>, plans: Vec<Arc<QueryPlan>>);
}

/// The default cache: always misses. Kept deliberately dumb per the open question in `spec.md`
/// §9 — callers who need caching supply their own [`PlanCache`] via [`GatewayOptions`].
pub struct NoopPlanCache;

impl PlanCache for NoopPlanCache {
    fn get(&self, _query: &str, _operation_name: Option<&str>) -> Option<Vec<Arc<QueryPlan>>> {
        None
    }

    fn put(&self, _query: &str, _operation_name: Option<&str>, _plans: Vec<Arc<QueryPlan>>) {}
}

/// Configuration accepted by [`Gateway::new`] (`spec.md` §4.3's "pluggable location priority
/// list", §4.6's queryer factory, §4.7's middleware assembly).
#[derive(Default)]
pub struct GatewayOptions {
    /// Global override for the planner's location tie-break order.
    pub location_priority: Option<Vec<String>>,
    /// Plan cache; defaults to [`NoopPlanCache`].
    pub plan_cache: Option<Arc<dyn PlanCache>>,
    /// Applied, in order, to every outbound upstream request.
    pub request_middlewares: Vec<Arc<dyn RequestMiddleware>>,
    /// Applied, in order, after `scrubInsertionIDs`, to the fully stitched response.
    pub response_middlewares: Vec<Arc<dyn ResponseMiddleware>>,
    /// Overrides how a [`Queryer`] is built for a given upstream URL; defaults to
    /// [`NetworkQueryer`]. Tests typically supply a factory producing `MockQueryer`/
    /// `FunctionQueryer` instead.
    pub queryer_factory: Option<QueryerFactory>,
    /// Wall-clock budget for a single `execute` call (`spec.md` §5's cancellation model).
    pub deadline: Option<Duration>,
}

/// The assembled gateway: a merged schema, a field-location index, and a planner bound to both,
/// ready to plan and execute requests against the configured upstream services.
pub struct Gateway {
    schema: Arc<Schema>,
    locations: Arc<FieldLocationMap>,
    planner: Planner,
    plan_cache: Arc<dyn PlanCache>,
    response_middlewares: Vec<Arc<dyn ResponseMiddleware>>,
    deadline: Option<Duration>,
}

impl Gateway {
    /// Merges `sources` into one schema, builds the field-location index, and assembles a
    /// gateway ready to plan and execute requests. Fails with [`GatewayError::NoSources`] if
    /// `sources` is empty, or [`GatewayError::SchemaConflict`] if the sources disagree.
    pub fn new(sources: Vec<RemoteSchema>, options: GatewayOptions) -> Result<Gateway, GatewayError> {
        if sources.is_empty() {
            return Err(GatewayError::NoSources);
        }

        let (schema, locations) = merge_schemas(&sources)?;
        let schema = Arc::new(schema);
        let locations = Arc::new(locations);

        let queryer_factory = options
            .queryer_factory
            .unwrap_or_else(|| default_queryer_factory(options.request_middlewares.clone()));
        let planner = Planner::new(
            schema.clone(),
            locations.clone(),
            queryer_factory,
            options.location_priority,
        );

        let mut response_middlewares: Vec<Arc<dyn ResponseMiddleware>> =
            vec![Arc::new(ScrubInsertionIds)];
        response_middlewares.extend(options.response_middlewares);

        Ok(Gateway {
            schema,
            locations,
            planner,
            plan_cache: options.plan_cache.unwrap_or_else(|| Arc::new(NoopPlanCache)),
            response_middlewares,
            deadline: options.deadline,
        })
    }

    /// The merged schema, e.g. for serving the gateway's own introspection.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn locations(&self) -> &FieldLocationMap {
        &self.locations
    }

    /// Parses and plans `request.query`, consulting the plan cache first (`spec.md` §4.7).
    pub fn get_plans(&self, request: &GraphQLRequest) -> Result<Vec<Arc<QueryPlan>>, GatewayError> {
        if let Some(cached) = self
            .plan_cache
            .get(&request.query, request.operation_name.as_deref())
        {
            return Ok(cached);
        }

        let sdl = self.schema.to_sdl();
        let validated = apollo_compiler::Schema::parse_and_validate(sdl, "schema.graphql")
            .map_err(|err| GatewayError::ParseError(err.to_string()))?;
        let document =
            ExecutableDocument::parse_and_validate(&validated, &request.query, "query.graphql")
                .map_err(|err| GatewayError::ParseError(err.to_string()))?;

        let plans: Vec<Arc<QueryPlan>> = self
            .planner
            .build_plans(&document)?
            .into_iter()
            .map(Arc::new)
            .collect();

        self.plan_cache
            .put(&request.query, request.operation_name.as_deref(), plans.clone());
        Ok(plans)
    }

    /// Executes the plan matching `request.operation_name` against `plans` (as returned by
    /// [`Gateway::get_plans`]) and returns the stitched, scrubbed response tree.
    pub async fn execute(
        &self,
        request: &GraphQLRequest,
        plans: &[Arc<QueryPlan>],
    ) -> Result<Value, GatewayError> {
        let plan = select_plan(plans, request.operation_name.as_deref())?;
        let ctx = ExecutionContext {
            variables: request.variables.clone(),
            response_middlewares: self.response_middlewares.clone(),
            deadline: self.deadline,
        };
        executor::execute(plan, ctx).await
    }
}

fn select_plan<'a>(
    plans: &'a [Arc<QueryPlan>],
    operation_name: Option<&str>,
) -> Result<&'a QueryPlan, GatewayError> {
    match operation_name {
        Some(name) => plans
            .iter()
            .map(Arc::as_ref)
            .find(|plan| plan.operation_name.as_deref() == Some(name))
            .ok_or_else(|| GatewayError::UnknownOperation(name.to_string())),
        None => {
            if plans.len() > 1 {
                Err(GatewayError::AmbiguousOperation)
            } else {
                plans
                    .first()
                    .map(Arc::as_ref)
                    .ok_or(GatewayError::AmbiguousOperation)
            }
        }
    }
}

fn default_queryer_factory(request_middlewares: Vec<Arc<dyn RequestMiddleware>>) -> QueryerFactory {
    let client = reqwest::Client::new();
    Arc::new(move |url: &str| {
        Arc::new(NetworkQueryer::with_middlewares(
            url.to_string(),
            client.clone(),
            request_middlewares.clone(),
        )) as Arc<dyn Queryer>
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queryer::MockQueryer;
    use crate::schema::{FieldDefinition, ObjectTypeDef, TypeDefinition, TypeRef};
    use indexmap::IndexMap;

    fn schema_with_foo() -> Schema {
        let mut fields = IndexMap::new();
        fields.insert(
            "foo".to_string(),
            FieldDefinition {
                name: "foo".to_string(),
                ty: TypeRef("Boolean".to_string()),
                arguments: Vec::new(),
            },
        );
        let mut types = IndexMap::new();
        types.insert(
            "Query".to_string(),
            TypeDefinition::Object(ObjectTypeDef {
                fields,
                interfaces: Vec::new(),
            }),
        );
        Schema {
            query_type: "Query".to_string(),
            mutation_type: None,
            subscription_type: None,
            types,
            directives: IndexMap::new(),
        }
    }

    fn mock_factory(response: Value) -> QueryerFactory {
        Arc::new(move |url: &str| {
            Arc::new(MockQueryer::new(url, response.clone())) as Arc<dyn Queryer>
        })
    }

    #[test]
    fn new_rejects_empty_sources() {
        let err = Gateway::new(Vec::new(), GatewayOptions::default()).unwrap_err();
        assert!(matches!(err, GatewayError::NoSources));
    }

    #[tokio::test]
    async fn executes_single_service_request_end_to_end() {
        let source = RemoteSchema {
            url: "http://a".into(),
            schema: schema_with_foo(),
        };
        let options = GatewayOptions {
            queryer_factory: Some(mock_factory(serde_json::json!({"foo": true}))),
            ..Default::default()
        };
        let gateway = Gateway::new(vec![source], options).unwrap();

        let request = GraphQLRequest {
            query: "{ foo }".to_string(),
            operation_name: None,
            variables: HashMap::new(),
        };
        let plans = gateway.get_plans(&request).unwrap();
        let response = gateway.execute(&request, &plans).await.unwrap();
        assert_eq!(response, serde_json::json!({"foo": true}));
    }

    #[test]
    fn select_plan_errors_on_ambiguous_operation() {
        let plan_a = Arc::new(QueryPlan {
            operation_name: Some("A".to_string()),
            root_steps: Vec::new(),
            variable_types: HashMap::new(),
        });
        let plan_b = Arc::new(QueryPlan {
            operation_name: Some("B".to_string()),
            root_steps: Vec::new(),
            variable_types: HashMap::new(),
        });
        let err = select_plan(&[plan_a, plan_b], None).unwrap_err();
        assert!(matches!(err, GatewayError::AmbiguousOperation));
    }
}
