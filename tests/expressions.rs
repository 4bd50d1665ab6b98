//! Integration tests for expression operands in task queries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use taskscope::clock::EngineClock;
use taskscope::query::{
    BuiltinExpressionEvaluator, ExpressionContext, ExpressionEvaluator, ExpressionValue,
    ADHOC_EXPRESSIONS_FORBIDDEN,
};
use taskscope::{
    Authentication, EngineConfig, ErrorKind, Filter, InMemoryTaskEngine, TaskError, TaskQuery,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 10, 9, 30, 0).unwrap()
}

async fn engine_with(config: EngineConfig) -> InMemoryTaskEngine {
    let engine = InMemoryTaskEngine::in_memory()
        .with_config(config)
        .with_clock(EngineClock::frozen_at(now()).shared());

    let mut mine = engine.new_task_with_id("mine");
    mine.assignee = Some("kermit".into());
    mine.due_date = Some(now() + Duration::days(1));
    engine.save_task(&mut mine).await.unwrap();

    let mut offered = engine.new_task_with_id("offered");
    offered.due_date = Some(now() + Duration::days(10));
    engine.save_task(&mut offered).await.unwrap();
    engine.add_candidate_group("offered", "muppets").await.unwrap();

    let mut other = engine.new_task_with_id("other");
    other.assignee = Some("gonzo".into());
    engine.save_task(&mut other).await.unwrap();

    engine
}

async fn permissive() -> InMemoryTaskEngine {
    engine_with(EngineConfig::default().with_allow_expressions_in_adhoc_queries(true)).await
}

/// Delegates to the built-in evaluator and counts calls.
#[derive(Debug, Default)]
struct CountingEvaluator {
    calls: AtomicUsize,
}

impl CountingEvaluator {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExpressionEvaluator for CountingEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        ctx: &ExpressionContext<'_>,
    ) -> Result<ExpressionValue, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        BuiltinExpressionEvaluator.evaluate(expression, ctx)
    }
}

fn kermit() -> Authentication {
    Authentication::new("kermit", ["muppets"])
}

async fn run(
    engine: &InMemoryTaskEngine,
    query: &TaskQuery,
    auth: Option<&Authentication>,
) -> Result<Vec<String>, TaskError> {
    Ok(engine
        .query_tasks(query, auth)
        .await?
        .iter()
        .map(|t| t.id().to_string())
        .collect())
}

mod policy_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_adhoc_expressions_are_forbidden_by_default() {
        let engine = engine_with(EngineConfig::default()).await;
        let query = TaskQuery::new().task_assignee_expression("${currentUser()}");
        let err = run(&engine, &query, Some(&kermit())).await.unwrap_err();
        assert_eq!(err.to_string(), ADHOC_EXPRESSIONS_FORBIDDEN);
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_forbidden_expression_is_never_evaluated() {
        let counter = Arc::new(CountingEvaluator::default());
        let engine = engine_with(EngineConfig::default())
            .await
            .with_expression_evaluator(counter.clone());
        let filter = {
            let mut filter = Filter::task("all");
            engine.save_filter(&mut filter).await.unwrap();
            filter
        };
        let query = TaskQuery::new()
            .or()
            .task_assignee("kermit")
            .task_owner_expression("${system.exit()}")
            .end_or();

        let errors = vec![
            engine.query_tasks(&query, None).await.unwrap_err(),
            engine.count_tasks(&query, None).await.unwrap_err(),
            engine
                .filter_list_extended(filter.id(), &query, None)
                .await
                .unwrap_err(),
            engine
                .filter_count_extended(filter.id(), &query, None)
                .await
                .unwrap_err(),
        ];
        for err in &errors {
            assert!(matches!(err, TaskError::BadRequest(_)));
            assert_eq!(err.to_string(), ADHOC_EXPRESSIONS_FORBIDDEN);
        }
        assert_eq!(counter.calls(), 0);
        assert_eq!(engine.count_tasks(&TaskQuery::new(), None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_allowed_expression_reaches_the_evaluator() {
        let counter = Arc::new(CountingEvaluator::default());
        let engine = permissive().await.with_expression_evaluator(counter.clone());
        let query = TaskQuery::new().task_assignee_expression("${currentUser()}");
        assert_eq!(run(&engine, &query, Some(&kermit())).await.unwrap(), vec!["mine"]);
        assert_eq!(engine.count_tasks(&query, Some(&kermit())).await.unwrap(), 1);
        assert_eq!(counter.calls(), 2);
    }

    #[tokio::test]
    async fn test_literal_queries_are_unaffected_by_the_policy() {
        let engine = engine_with(EngineConfig::default()).await;
        let query = TaskQuery::new().task_assignee("kermit");
        assert_eq!(run(&engine, &query, None).await.unwrap(), vec!["mine"]);
    }
}

mod evaluation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_current_user_and_groups() {
        let engine = permissive().await;
        let auth = kermit();

        let assigned = TaskQuery::new().task_assignee_expression("${currentUser()}");
        assert_eq!(run(&engine, &assigned, Some(&auth)).await.unwrap(), vec!["mine"]);

        let offered = TaskQuery::new().task_candidate_group_in_expression("${currentUserGroups()}");
        assert_eq!(run(&engine, &offered, Some(&auth)).await.unwrap(), vec!["offered"]);

        let inbox = TaskQuery::new()
            .or()
            .task_assignee_expression("${currentUser()}")
            .task_candidate_group_in_expression("${currentUserGroups()}")
            .end_or();
        assert_eq!(
            run(&engine, &inbox, Some(&auth)).await.unwrap(),
            vec!["mine", "offered"]
        );
    }

    #[tokio::test]
    async fn test_date_expressions_use_engine_time() {
        let engine = permissive().await;
        let due_soon = TaskQuery::new().due_before_expression("${dateTime().plusDays(2).toDate()}");
        assert_eq!(run(&engine, &due_soon, None).await.unwrap(), vec!["mine"]);

        let due_later = TaskQuery::new().due_after_expression("${now()}");
        assert_eq!(
            run(&engine, &due_later, None).await.unwrap(),
            vec!["mine", "offered"]
        );

        let created = TaskQuery::new().task_created_on_expression("${now()}");
        assert_eq!(run(&engine, &created, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_current_user_without_authentication_is_a_bad_request() {
        let engine = permissive().await;
        let query = TaskQuery::new().task_assignee_expression("${currentUser()}");
        let err = run(&engine, &query, None).await.unwrap_err();
        assert!(matches!(err, TaskError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_expression_is_a_bad_request() {
        let engine = permissive().await;
        let query = TaskQuery::new().task_assignee_expression("${runtimeService.deleteAll()}");
        let err = run(&engine, &query, Some(&kermit())).await.unwrap_err();
        assert!(err.to_string().starts_with("Unknown expression"));
    }

    #[tokio::test]
    async fn test_wrong_result_type_is_a_bad_request() {
        let engine = permissive().await;
        let query = TaskQuery::new().due_before_expression("${currentUserGroups()}");
        let err = run(&engine, &query, Some(&kermit())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }
}
