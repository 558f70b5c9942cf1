//! A federating GraphQL gateway: merges introspected remote schemas into one, plans a client
//! request into per-service sub-queries, executes them concurrently in dependency order, and
//! stitches the results into one response tree.
//!
//! The three tightly coupled subsystems — [`location`]/[`merge`] (field-location index and
//! schema merger), [`plan`] (planner and printer), and [`executor`] (parallel execution and
//! stitching) — share one data model and are best read together; [`gateway`] is the facade that
//! wires them up for embedders.

pub mod error;
pub mod executor;
pub mod gateway;
pub mod http;
pub mod introspection;
pub mod location;
pub mod merge;
pub mod middleware;
pub mod plan;
pub mod queryer;
pub mod schema;

pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayOptions, GraphQLRequest, PlanCache};
pub use plan::QueryPlan;
pub use queryer::{Queryer, QueryerFactory, QueryerInput};
pub use schema::{RemoteSchema, Schema};
