//! Task queries.
//!
//! [`TaskQuery`] is a serializable description of a query: root
//! conditions AND-ed together, OR-groups, and ordering. Operands may be
//! expressions, which pass the [`ExpressionGuard`] before the
//! [`ExpressionEvaluator`] resolves them. Execution lowers the resolved
//! query to a predicate tree and evaluates it once per stored task.

pub mod builder;
pub mod condition;
mod executor;
pub mod expression;
mod predicate;

pub use builder::{Direction, OrderBy, TaskQuery};
pub use condition::{Condition, FilterValue, FromExpressionValue};
pub use expression::{
    BuiltinExpressionEvaluator, ExpressionContext, ExpressionEvaluator, ExpressionGuard,
    ExpressionValue, QueryOrigin, ADHOC_EXPRESSIONS_FORBIDDEN, STORED_EXPRESSIONS_FORBIDDEN,
};

pub(crate) use executor::{page, single};
