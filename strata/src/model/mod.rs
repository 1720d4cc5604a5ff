//! Query model shared by the translator, the runner and the backends

mod expr;
mod query;
mod response;
mod row;

pub use expr::{and, or, Expr, Literal};
pub use query::{
    ExecutionPlan, InterruptFn, OrderByExpr, OrderDirection, Query, QueryRowsTransformer,
    QueryType, RuntimeField, SelectCommand,
};
pub use response::{
    AsyncSearchResponse, AsyncSearchStatusResponse, SearchHit, SearchHits, SearchResponse,
    ShardStats, TotalHits,
};
pub use row::{QueryResultCol, QueryResultRow};
