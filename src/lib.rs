//! Human-task engine core: task lifecycle, variable scopes, audit events
//! and authorization-aware queries.
//!
//! # Overview
//!
//! A [`TaskEngine`] owns tasks and everything attached to them. Tasks are
//! created standalone or bound to an execution of a running process; the
//! execution tree itself is supplied by an [`ExecutionScopeProvider`].
//! All state lives behind a [`StorageBackend`](store::StorageBackend),
//! a versioned key-value store that the engine writes through one atomic
//! batch per operation.
//!
//! # Module Organization
//!
//! - [`domain`] - Tasks, identity links, typed variables, events, comments, attachments
//! - [`store`] - Storage contract and the in-memory backend
//! - [`scope`] - Variable scope chains and the execution provider seam
//! - [`query`] - Fluent queries, OR-groups, expression policy
//! - [`filter`] - Stored queries
//! - [`authorization`] - Grants and row-level visibility
//! - [`report`] - Candidate group report
//! - [`config`] - Engine configuration
//! - [`clock`] - Adjustable engine time
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```
//! use taskscope::{InMemoryTaskEngine, TaskQuery};
//!
//! # tokio_test_block(async {
//! let engine = InMemoryTaskEngine::in_memory();
//! let mut task = engine.new_task();
//! task.name = Some("Review invoice".into());
//! engine.save_task(&mut task).await?;
//! engine.add_candidate_group(task.id(), "accounting").await?;
//!
//! let open = engine
//!     .query_tasks(&TaskQuery::new().task_candidate_group("accounting"), None)
//!     .await?;
//! assert_eq!(open.len(), 1);
//! # Ok::<(), taskscope::TaskError>(())
//! # }).unwrap();
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod authorization;
pub mod clock;
pub mod config;
pub mod domain;
mod engine;
pub mod error;
mod events;
pub mod filter;
mod lifecycle;
#[cfg(feature = "logging")]
pub mod logging;
pub mod query;
pub mod report;
pub mod scope;
pub mod store;

pub use authorization::{Authentication, AuthorizationService, InMemoryAuthorizationService};
pub use clock::{Clock, EngineClock};
pub use config::EngineConfig;
pub use domain::{IdentityLinkType, Task, TypedValue, VariableMap};
pub use engine::{InMemoryTaskEngine, TaskEngine};
pub use error::{ErrorKind, TaskError};
pub use filter::Filter;
pub use query::TaskQuery;
pub use report::TaskCountByCandidateGroup;
pub use scope::{ExecutionScopeProvider, InMemoryExecutionScopes, ScopeHandle};
