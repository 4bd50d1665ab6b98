//! Integration tests for hierarchical variable scopes.
//!
//! A task bound to execution `e1` (child of process instance `pi`) reads
//! through both executions; standalone tasks only see their own scope.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use taskscope::clock::{Clock, EngineClock};
use taskscope::error::ErrorKind;
use taskscope::{
    EngineConfig, ExecutionScopeProvider, InMemoryExecutionScopes, InMemoryTaskEngine,
    ScopeHandle, TaskError, TypedValue, VariableMap,
};

struct Fixture {
    engine: InMemoryTaskEngine,
    scopes: Arc<InMemoryExecutionScopes>,
    clock: Arc<dyn Clock>,
}

/// Engine with `pi -> e1` and task `t1` bound to `e1`, plus standalone `s1`.
async fn fixture_with(config: EngineConfig) -> Fixture {
    let scopes = Arc::new(InMemoryExecutionScopes::new());
    scopes.create_process_instance("pi").unwrap();
    scopes.create_child_execution("pi", "e1").unwrap();
    let clock = EngineClock::frozen_at(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()).shared();
    let engine = InMemoryTaskEngine::in_memory()
        .with_config(config)
        .with_clock(clock.clone())
        .with_execution_scopes(scopes.clone());

    let mut bound = engine.new_task_with_id("t1");
    bound.execution_id = Some("e1".into());
    bound.process_instance_id = Some("pi".into());
    engine.save_task(&mut bound).await.unwrap();

    let mut standalone = engine.new_task_with_id("s1");
    engine.save_task(&mut standalone).await.unwrap();

    Fixture {
        engine,
        scopes,
        clock,
    }
}

async fn fixture() -> Fixture {
    fixture_with(EngineConfig::default()).await
}

fn task() -> ScopeHandle {
    ScopeHandle::task("t1")
}

mod read_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_reads_walk_the_chain_nearest_first() {
        let f = fixture().await;
        f.scopes
            .set_local_variable("pi", "customer", "acme".into())
            .await
            .unwrap();
        f.scopes
            .set_local_variable("pi", "amount", 10.into())
            .await
            .unwrap();
        f.scopes
            .set_local_variable("e1", "amount", 20.into())
            .await
            .unwrap();

        assert_eq!(
            f.engine.get_variable(&task(), "customer").await.unwrap(),
            Some(TypedValue::String("acme".into()))
        );
        assert_eq!(
            f.engine.get_variable(&task(), "amount").await.unwrap(),
            Some(TypedValue::Integer(20))
        );
        assert_eq!(f.engine.get_variable_local(&task(), "amount").await.unwrap(), None);

        f.engine.set_variable_local(&task(), "amount", 30).await.unwrap();
        let all = f.engine.get_variables(&task()).await.unwrap();
        assert_eq!(all.get("amount"), Some(&TypedValue::Integer(30)));
        assert_eq!(all.get("customer"), Some(&TypedValue::String("acme".into())));
        assert_eq!(all.len(), 2);

        let local = f.engine.get_variables_local(&task()).await.unwrap();
        assert_eq!(local.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_scopes_are_not_found() {
        let f = fixture().await;
        let err = f
            .engine
            .get_variable(&ScopeHandle::task("ghost"), "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f
            .engine
            .get_variables_local(&ScopeHandle::execution("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Invoice {
        number: String,
        total: u32,
    }

    #[tokio::test]
    async fn test_typed_reads() {
        let f = fixture().await;
        let invoice = json!({"number": "INV-1", "total": 99});
        f.engine
            .set_variable_local(&task(), "invoice", invoice)
            .await
            .unwrap();
        f.engine.set_variable_local(&task(), "count", 3_i64).await.unwrap();
        f.engine
            .set_variable_local(&task(), "nothing", TypedValue::Null)
            .await
            .unwrap();

        let read: Option<Invoice> = f.engine.get_variable_typed(&task(), "invoice").await.unwrap();
        assert_eq!(
            read,
            Some(Invoice {
                number: "INV-1".into(),
                total: 99
            })
        );
        let count: Option<u8> = f.engine.get_variable_typed(&task(), "count").await.unwrap();
        assert_eq!(count, Some(3));
        let nothing: Option<String> = f.engine.get_variable_typed(&task(), "nothing").await.unwrap();
        assert_eq!(nothing, None);

        let err = f
            .engine
            .get_variable_typed::<bool>(&task(), "count")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::TypeMismatch { .. }));

        let value = f.engine.get_variable(&task(), "count").await.unwrap().unwrap();
        assert!(value.as_str("count").is_err());
        assert_eq!(value.as_i64("count").unwrap(), Some(3));
    }
}

mod write_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_set_variable_updates_the_nearest_holder() {
        let f = fixture().await;
        f.scopes
            .set_local_variable("pi", "status", "new".into())
            .await
            .unwrap();

        f.engine.set_variable(&task(), "status", "approved").await.unwrap();

        let pi = f.scopes.local_variables("pi").await.unwrap();
        assert_eq!(pi.get("status"), Some(&TypedValue::String("approved".into())));
        assert!(f.scopes.local_variables("e1").await.unwrap().is_empty());
        assert!(f.engine.get_variables_local(&task()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_names_go_to_the_task_execution() {
        let f = fixture().await;
        f.engine.set_variable(&task(), "fresh", true).await.unwrap();

        let e1 = f.scopes.local_variables("e1").await.unwrap();
        assert_eq!(e1.get("fresh"), Some(&TypedValue::Boolean(true)));
        assert!(f.scopes.local_variables("pi").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_standalone_task_writes_locally() {
        let f = fixture().await;
        let scope = ScopeHandle::task("s1");
        f.engine.set_variable(&scope, "x", 1).await.unwrap();
        assert_eq!(
            f.engine.get_variable_local(&scope, "x").await.unwrap(),
            Some(TypedValue::Integer(1))
        );
    }

    #[tokio::test]
    async fn test_set_variables_batches_per_holder() {
        let f = fixture().await;
        f.engine.set_variable_local(&task(), "a", 1).await.unwrap();

        let mut vars = VariableMap::new();
        vars.insert("a".into(), 2.into());
        vars.insert("b".into(), 3.into());
        f.engine.set_variables(&task(), vars).await.unwrap();

        assert_eq!(
            f.engine.get_variable_local(&task(), "a").await.unwrap(),
            Some(TypedValue::Integer(2))
        );
        assert_eq!(
            f.scopes.local_variables("e1").await.unwrap().get("b"),
            Some(&TypedValue::Integer(3))
        );
    }

    #[tokio::test]
    async fn test_set_variables_local_on_execution() {
        let f = fixture().await;
        let mut vars = VariableMap::new();
        vars.insert("k".into(), "v".into());
        f.engine
            .set_variables_local(&ScopeHandle::execution("pi"), vars)
            .await
            .unwrap();
        assert_eq!(
            f.engine.get_variable(&task(), "k").await.unwrap(),
            Some(TypedValue::String("v".into()))
        );
    }

    #[tokio::test]
    async fn test_task_variable_write_touches_the_task() {
        let f = fixture().await;
        f.clock.offset(Duration::minutes(10));
        f.engine.set_variable_local(&task(), "x", 1).await.unwrap();
        let stored = f.engine.get_task("t1").await.unwrap().unwrap();
        assert_eq!(stored.revision, 2);
        assert_eq!(
            stored.last_updated,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 10, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_oversized_values_are_rejected_before_any_write() {
        let f = fixture_with(EngineConfig::default().with_max_variable_length(5)).await;
        let err = f
            .engine
            .set_variable_local(&task(), "s", "123456")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::BadRequest(ref m) if m.starts_with("Variable value is too long")));

        let mut vars = VariableMap::new();
        vars.insert("ok".into(), "12345".into());
        vars.insert("big".into(), json!({"payload": "long enough"}).into());
        assert!(f.engine.set_variables_local(&task(), vars).await.is_err());
        assert!(f.engine.get_variables_local(&task()).await.unwrap().is_empty());
        assert_eq!(f.engine.get_task("t1").await.unwrap().unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_remove_variable_from_holder() {
        let f = fixture().await;
        f.scopes
            .set_local_variable("pi", "gone", 1.into())
            .await
            .unwrap();
        f.engine.remove_variable(&task(), "gone").await.unwrap();
        assert!(f.scopes.local_variables("pi").await.unwrap().is_empty());

        f.engine.remove_variable(&task(), "never-there").await.unwrap();

        f.engine.set_variable_local(&task(), "mine", 1).await.unwrap();
        f.engine.remove_variable_local(&task(), "mine").await.unwrap();
        assert_eq!(f.engine.get_variable(&task(), "mine").await.unwrap(), None);
    }
}

mod key_isolation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn standalone(engine: &InMemoryTaskEngine, id: &str) {
        let mut task = engine.new_task_with_id(id);
        engine.save_task(&mut task).await.unwrap();
    }

    #[tokio::test]
    async fn test_colons_in_ids_and_names_do_not_collide() {
        let engine = InMemoryTaskEngine::in_memory();
        standalone(&engine, "a:b").await;
        standalone(&engine, "a").await;
        let nested = ScopeHandle::task("a:b");
        let outer = ScopeHandle::task("a");

        engine.set_variable_local(&nested, "c", "mine").await.unwrap();
        engine.set_variable_local(&outer, "b:c", "other").await.unwrap();

        assert_eq!(
            engine.get_variable_local(&nested, "c").await.unwrap(),
            Some(TypedValue::String("mine".into()))
        );
        let nested_vars = engine.get_variables_local(&nested).await.unwrap();
        assert_eq!(nested_vars.into_keys().collect::<Vec<_>>(), vec!["c".to_string()]);
        let outer_vars = engine.get_variables_local(&outer).await.unwrap();
        assert_eq!(outer_vars.into_keys().collect::<Vec<_>>(), vec!["b:c".to_string()]);

        engine.remove_variable_local(&outer, "b:c").await.unwrap();
        engine.delete_task("a", true).await.unwrap();
        assert_eq!(
            engine.get_variable_local(&nested, "c").await.unwrap(),
            Some(TypedValue::String("mine".into()))
        );
    }

    #[tokio::test]
    async fn test_links_stay_with_their_task() {
        let engine = InMemoryTaskEngine::in_memory();
        standalone(&engine, "a:candidate").await;
        standalone(&engine, "a").await;

        engine.add_candidate_group("a:candidate", "sales").await.unwrap();
        engine.add_candidate_user("a", "candidate:g:sales").await.unwrap();

        let links = engine.get_identity_links("a:candidate").await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].group_id(), Some("sales"));
        let links = engine.get_identity_links("a").await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].user_id(), Some("candidate:g:sales"));

        engine.delete_candidate_user("a", "candidate:g:sales").await.unwrap();
        assert_eq!(engine.get_identity_links("a:candidate").await.unwrap().len(), 1);
    }
}

mod execution_boundary_tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    /// Executions listed in `ended` still resolve as parents but report
    /// that they no longer exist.
    struct EndedExecutions {
        inner: InMemoryExecutionScopes,
        ended: HashSet<String>,
    }

    #[async_trait]
    impl ExecutionScopeProvider for EndedExecutions {
        async fn exists(&self, execution_id: &str) -> Result<bool, TaskError> {
            if self.ended.contains(execution_id) {
                return Ok(false);
            }
            self.inner.exists(execution_id).await
        }

        async fn parent_of(&self, execution_id: &str) -> Result<Option<String>, TaskError> {
            self.inner.parent_of(execution_id).await
        }

        async fn local_variables(&self, execution_id: &str) -> Result<VariableMap, TaskError> {
            self.inner.local_variables(execution_id).await
        }

        async fn set_local_variable(
            &self,
            execution_id: &str,
            name: &str,
            value: TypedValue,
        ) -> Result<(), TaskError> {
            self.inner.set_local_variable(execution_id, name, value).await
        }

        async fn remove_local_variable(
            &self,
            execution_id: &str,
            name: &str,
        ) -> Result<bool, TaskError> {
            self.inner.remove_local_variable(execution_id, name).await
        }
    }

    async fn engine_with_ended_execution() -> InMemoryTaskEngine {
        let inner = InMemoryExecutionScopes::new();
        inner.create_process_instance("pi").unwrap();
        inner.create_child_execution("pi", "e1").unwrap();
        let provider = EndedExecutions {
            inner,
            ended: HashSet::from(["e1".to_string()]),
        };
        let engine = InMemoryTaskEngine::in_memory().with_execution_scopes(Arc::new(provider));
        let mut bound = engine.new_task_with_id("t1");
        bound.execution_id = Some("e1".into());
        bound.process_instance_id = Some("pi".into());
        engine.save_task(&mut bound).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_write_to_ended_execution_leaves_the_task_untouched() {
        let engine = engine_with_ended_execution().await;
        engine.set_variable_local(&task(), "a", 1).await.unwrap();
        assert_eq!(engine.get_task("t1").await.unwrap().unwrap().revision, 2);

        let err = engine.set_variable(&task(), "fresh", true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut vars = VariableMap::new();
        vars.insert("a".into(), 2.into());
        vars.insert("b".into(), 3.into());
        assert!(engine.set_variables(&task(), vars).await.is_err());

        assert_eq!(
            engine.get_variable_local(&task(), "a").await.unwrap(),
            Some(TypedValue::Integer(1))
        );
        assert_eq!(engine.get_task("t1").await.unwrap().unwrap().revision, 2);
    }

    #[tokio::test]
    async fn test_completion_into_ended_execution_keeps_the_task() {
        let engine = engine_with_ended_execution().await;
        let mut vars = VariableMap::new();
        vars.insert("approved".into(), true.into());

        let err = engine.complete("t1", vars).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(engine.get_task("t1").await.unwrap().is_some());
    }
}
