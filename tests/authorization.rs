//! Integration tests for authorization folded into task queries and for
//! the default grants issued by task operations.

use taskscope::authorization::{Grant, Permission, Resource, ANY};
use taskscope::{
    Authentication, AuthorizationService, EngineConfig, ErrorKind, InMemoryTaskEngine, TaskError,
    TaskQuery,
};

fn secured_engine() -> InMemoryTaskEngine {
    InMemoryTaskEngine::in_memory().with_config(
        EngineConfig::default()
            .with_authorization_enabled(true)
            .with_admin_groups(["camunda-admin"]),
    )
}

async fn create(engine: &InMemoryTaskEngine, id: &str, definition_key: Option<&str>) {
    let mut task = engine.new_task_with_id(id);
    task.process_definition_key = definition_key.map(String::from);
    engine.save_task(&mut task).await.unwrap();
}

async fn visible(engine: &InMemoryTaskEngine, query: &TaskQuery, auth: &Authentication) -> Vec<String> {
    engine
        .query_tasks(query, Some(auth))
        .await
        .unwrap()
        .iter()
        .map(|t| t.id().to_string())
        .collect()
}

mod query_restriction_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_user_without_grants_sees_nothing() {
        let engine = secured_engine();
        create(&engine, "t1", None).await;
        let kermit = Authentication::user("kermit");
        assert!(visible(&engine, &TaskQuery::new(), &kermit).await.is_empty());
        assert_eq!(engine.count_tasks(&TaskQuery::new(), Some(&kermit)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_task_and_definition_grants_are_unioned() {
        let engine = secured_engine();
        create(&engine, "t1", Some("invoice")).await;
        create(&engine, "t2", Some("invoice")).await;
        create(&engine, "t3", Some("crm")).await;
        create(&engine, "t4", None).await;

        engine
            .authorization()
            .grant(Grant::group(
                "accounting",
                Resource::ProcessDefinition,
                "invoice",
                [Permission::ReadTask],
            ))
            .await
            .unwrap();
        engine
            .authorization()
            .grant(Grant::user("kermit", Resource::Task, "t4", [Permission::Read]))
            .await
            .unwrap();

        let kermit = Authentication::new("kermit", ["accounting"]);
        assert_eq!(visible(&engine, &TaskQuery::new(), &kermit).await, vec!["t1", "t2", "t4"]);

        let fozzie = Authentication::new("fozzie", ["accounting"]);
        assert_eq!(visible(&engine, &TaskQuery::new(), &fozzie).await, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_or_group_does_not_widen_visibility() {
        let engine = secured_engine();
        create(&engine, "t1", Some("invoice")).await;
        create(&engine, "t2", Some("crm")).await;
        engine.add_candidate_group("t2", "sales").await.unwrap();
        engine
            .authorization()
            .grant(Grant::user("kermit", Resource::Task, "t1", [Permission::Read]))
            .await
            .unwrap();

        let kermit = Authentication::user("kermit");
        let query = TaskQuery::new()
            .or()
            .task_candidate_group("sales")
            .process_definition_key("invoice")
            .end_or();
        assert_eq!(visible(&engine, &query, &kermit).await, vec!["t1"]);
    }

    #[tokio::test]
    async fn test_any_grant_covers_every_task() {
        let engine = secured_engine();
        create(&engine, "t1", None).await;
        create(&engine, "t2", Some("crm")).await;
        engine
            .authorization()
            .grant(Grant::user(ANY, Resource::Task, ANY, [Permission::All]))
            .await
            .unwrap();

        let anyone = Authentication::user("piggy");
        assert_eq!(visible(&engine, &TaskQuery::new(), &anyone).await, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_admins_and_anonymous_calls_are_unrestricted() {
        let engine = secured_engine();
        create(&engine, "t1", None).await;

        let admin = Authentication::new("root", ["camunda-admin"]);
        assert_eq!(visible(&engine, &TaskQuery::new(), &admin).await, vec!["t1"]);
        assert_eq!(engine.count_tasks(&TaskQuery::new(), None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_disabled_authorization_ignores_grants() {
        let engine = InMemoryTaskEngine::in_memory();
        create(&engine, "t1", None).await;
        let kermit = Authentication::user("kermit");
        assert_eq!(visible(&engine, &TaskQuery::new(), &kermit).await, vec!["t1"]);
    }
}

mod default_grant_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn can_read(engine: &InMemoryTaskEngine, auth: &Authentication, task_id: &str) -> bool {
        engine
            .authorization()
            .grants(auth, Resource::Task, Permission::Read)
            .await
            .unwrap()
            .contains(task_id)
    }

    async fn can_update(engine: &InMemoryTaskEngine, auth: &Authentication, task_id: &str) -> bool {
        engine
            .authorization()
            .grants(auth, Resource::Task, Permission::Update)
            .await
            .unwrap()
            .contains(task_id)
    }

    #[tokio::test]
    async fn test_save_grants_assignee_and_owner() {
        let engine = secured_engine();
        let mut task = engine.new_task_with_id("t1");
        task.assignee = Some("kermit".into());
        task.owner = Some("gonzo".into());
        engine.save_task(&mut task).await.unwrap();

        for user in ["kermit", "gonzo"] {
            let auth = Authentication::user(user);
            assert!(can_read(&engine, &auth, "t1").await);
            assert!(can_update(&engine, &auth, "t1").await);
        }
        assert!(!can_read(&engine, &Authentication::user("piggy"), "t1").await);
    }

    #[tokio::test]
    async fn test_claim_and_candidate_links_grant_access() {
        let engine = secured_engine();
        create(&engine, "t1", None).await;
        engine.claim("t1", Some("fozzie")).await.unwrap();
        engine.add_candidate_user("t1", "piggy").await.unwrap();
        engine.add_candidate_group("t1", "sales").await.unwrap();

        assert!(can_read(&engine, &Authentication::user("fozzie"), "t1").await);
        assert!(can_read(&engine, &Authentication::user("piggy"), "t1").await);
        assert!(can_read(&engine, &Authentication::new("animal", ["sales"]), "t1").await);

        let ids = visible(&engine, &TaskQuery::new(), &Authentication::new("animal", ["sales"])).await;
        assert_eq!(ids, vec!["t1"]);
    }

    #[tokio::test]
    async fn test_reserved_identities_are_rejected() {
        let engine = secured_engine();
        create(&engine, "t1", None).await;

        let err = engine.claim("t1", Some(ANY)).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidIdentifier { .. }));
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = engine.add_candidate_group("t1", ANY).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidIdentifier { .. }));

        let mut task = engine.new_task_with_id("t2");
        task.owner = Some(ANY.into());
        let err = engine.save_task(&mut task).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidIdentifier { .. }));
        assert!(engine.get_task("t2").await.unwrap().is_none());
        assert!(engine.get_task("t1").await.unwrap().unwrap().assignee.is_none());
    }

    #[tokio::test]
    async fn test_reserved_identity_is_a_plain_user_without_authorization() {
        let engine = InMemoryTaskEngine::in_memory();
        create(&engine, "t1", None).await;
        engine.claim("t1", Some(ANY)).await.unwrap();
        assert_eq!(
            engine.get_task("t1").await.unwrap().unwrap().assignee.as_deref(),
            Some(ANY)
        );
    }
}
