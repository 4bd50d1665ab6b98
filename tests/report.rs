//! Integration tests for the task count by candidate group report.

use taskscope::{InMemoryTaskEngine, TaskCountByCandidateGroup};

fn row(group: Option<&str>, count: u64) -> TaskCountByCandidateGroup {
    TaskCountByCandidateGroup {
        group_name: group.map(String::from),
        task_count: count,
    }
}

async fn task(engine: &InMemoryTaskEngine, id: &str, assignee: Option<&str>, groups: &[&str]) {
    let mut task = engine.new_task_with_id(id);
    task.assignee = assignee.map(String::from);
    engine.save_task(&mut task).await.unwrap();
    for group in groups {
        engine.add_candidate_group(id, group).await.unwrap();
    }
}

mod report_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_empty_store_has_no_rows() {
        let engine = InMemoryTaskEngine::in_memory();
        assert!(engine.task_count_by_candidate_group().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_counts_unassigned_tasks_per_group() {
        let engine = InMemoryTaskEngine::in_memory();
        task(&engine, "t1", None, &["sales"]).await;
        task(&engine, "t2", None, &["sales", "management"]).await;
        task(&engine, "t3", None, &[]).await;
        task(&engine, "t4", Some("kermit"), &["sales"]).await;
        task(&engine, "t5", None, &["accounting"]).await;
        engine.add_candidate_user("t3", "fozzie").await.unwrap();

        let report = engine.task_count_by_candidate_group().await.unwrap();
        assert_eq!(
            report,
            vec![
                row(None, 1),
                row(Some("accounting"), 1),
                row(Some("management"), 1),
                row(Some("sales"), 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_assigned_and_delegated_tasks_are_in_no_bucket() {
        let engine = InMemoryTaskEngine::in_memory();
        task(&engine, "assigned", Some("kermit"), &["sales", "support"]).await;
        task(&engine, "delegated", Some("kermit"), &["sales"]).await;
        task(&engine, "no-group", Some("gonzo"), &[]).await;
        engine.delegate("delegated", "fozzie").await.unwrap();

        assert!(engine.task_count_by_candidate_group().await.unwrap().is_empty());

        engine.resolve("delegated").await.unwrap();
        assert!(engine.task_count_by_candidate_group().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tenants_share_the_report() {
        let engine = InMemoryTaskEngine::in_memory();
        let mut t = engine.new_task_with_id("T");
        t.tenant_id = Some("t1".into());
        engine.save_task(&mut t).await.unwrap();
        let mut u = engine.new_task_with_id("U");
        u.tenant_id = Some("t2".into());
        engine.save_task(&mut u).await.unwrap();
        engine.add_candidate_group("U", "g1").await.unwrap();

        assert_eq!(
            engine.task_count_by_candidate_group().await.unwrap(),
            vec![row(None, 1), row(Some("g1"), 1)]
        );
    }

    #[tokio::test]
    async fn test_task_counts_once_in_each_of_its_groups() {
        let engine = InMemoryTaskEngine::in_memory();
        task(&engine, "t1", None, &["a", "b", "c"]).await;
        engine.add_candidate_group("t1", "b").await.unwrap();

        assert_eq!(
            engine.task_count_by_candidate_group().await.unwrap(),
            vec![row(Some("a"), 1), row(Some("b"), 1), row(Some("c"), 1)]
        );
    }

    #[tokio::test]
    async fn test_claiming_moves_a_task_out_of_the_report() {
        let engine = InMemoryTaskEngine::in_memory();
        task(&engine, "t1", None, &["sales"]).await;
        engine.claim("t1", Some("kermit")).await.unwrap();
        assert!(engine.task_count_by_candidate_group().await.unwrap().is_empty());

        engine.claim("t1", None).await.unwrap();
        assert_eq!(
            engine.task_count_by_candidate_group().await.unwrap(),
            vec![row(Some("sales"), 1)]
        );
    }
}
