//! Postgres-backed integration tests for the task repository.

use chrono::{Duration, Utc};
use domain_tasks::{
    CreateTask, CronPatternType, PgTaskRepository, TaskChanges, TaskFilter, TaskRepository,
    TaskStatus, TriggerType,
};
use test_utils::TestDatabase;

fn cron_input(name: &str) -> CreateTask {
    CreateTask {
        task_name: name.to_string(),
        description: "nightly digest".to_string(),
        group_ids: vec![100, 200],
        message_ids: vec![7],
        trigger_type: TriggerType::Cron,
        schedule_time: None,
        expire_time: Some(Utc::now() + Duration::days(1)),
        cron_expression: "0 9 * * *".to_string(),
        cron_pattern_type: Some(CronPatternType::Daily),
        cron_config: Some(serde_json::json!({"hour": 9})),
        max_retry_count: 0,
    }
}

fn schedule_input(name: &str) -> CreateTask {
    CreateTask {
        task_name: name.to_string(),
        description: String::new(),
        group_ids: vec![300],
        message_ids: vec![8, 9],
        trigger_type: TriggerType::Schedule,
        schedule_time: Some(Utc::now() + Duration::hours(2)),
        expire_time: None,
        cron_expression: String::new(),
        cron_pattern_type: None,
        cron_config: None,
        max_retry_count: 5,
    }
}

#[tokio::test]
async fn test_create_and_find_round_trip() {
    let db = TestDatabase::new().await;
    let repo = PgTaskRepository::new(db.connection());

    let created = repo.create(1, cron_input("digest")).await.unwrap();
    assert!(created.id > 0);
    assert_eq!(created.status, TaskStatus::Draft);
    assert_eq!(created.max_retry_count, 3); // defaulted from 0
    assert_eq!(created.group_ids, vec![100, 200]);

    let found = repo.find(created.id, 1).await.unwrap().unwrap();
    assert_eq!(found.task_name, "digest");
    assert_eq!(found.cron_expression, "0 9 * * *");
    assert_eq!(found.cron_pattern_type, Some(CronPatternType::Daily));

    // Another admin cannot see the row.
    assert!(repo.find(created.id, 2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_apply_patches_only_given_fields() {
    let db = TestDatabase::new().await;
    let repo = PgTaskRepository::new(db.connection());

    let created = repo.create(1, schedule_input("announce")).await.unwrap();

    let now = Utc::now();
    let updated = repo
        .apply(
            created.id,
            TaskChanges {
                status: Some(TaskStatus::Ready),
                next_execute_at: Some(Some(now + Duration::hours(2))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.status, TaskStatus::Ready);
    assert!(updated.next_execute_at.is_some());
    // Untouched columns survive.
    assert_eq!(updated.task_name, "announce");
    assert_eq!(updated.message_ids, vec![8, 9]);
    assert_eq!(updated.max_retry_count, 5);
}

#[tokio::test]
async fn test_apply_can_null_out_next_execute() {
    let db = TestDatabase::new().await;
    let repo = PgTaskRepository::new(db.connection());

    let created = repo.create(1, schedule_input("announce")).await.unwrap();
    repo.apply(
        created.id,
        TaskChanges {
            next_execute_at: Some(Some(Utc::now())),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let cleared = repo
        .apply(
            created.id,
            TaskChanges {
                status: Some(TaskStatus::Completed),
                next_execute_at: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(cleared.status, TaskStatus::Completed);
    assert!(cleared.next_execute_at.is_none());
}

#[tokio::test]
async fn test_soft_delete_hides_row() {
    let db = TestDatabase::new().await;
    let repo = PgTaskRepository::new(db.connection());

    let created = repo.create(1, cron_input("digest")).await.unwrap();
    repo.soft_delete(created.id).await.unwrap();

    assert!(repo.find(created.id, 1).await.unwrap().is_none());
    assert!(repo.find_by_id(created.id).await.unwrap().is_none());
    assert!(repo.cron_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_filters_and_pagination() {
    let db = TestDatabase::new().await;
    let repo = PgTaskRepository::new(db.connection());

    for i in 0..3 {
        repo.create(1, cron_input(&format!("digest {}", i))).await.unwrap();
    }
    repo.create(1, schedule_input("announce")).await.unwrap();
    repo.create(2, schedule_input("other admin")).await.unwrap();

    let (page, total) = repo
        .list(
            1,
            TaskFilter {
                trigger_type: Some(TriggerType::Cron),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 3);

    let (page, total) = repo
        .list(
            1,
            TaskFilter {
                task_name: Some("announce".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(page[0].task_name, "announce");

    let (page, total) = repo
        .list(
            1,
            TaskFilter {
                page: 2,
                limit: 3,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(total, 4);
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn test_stats_counts_by_status() {
    let db = TestDatabase::new().await;
    let repo = PgTaskRepository::new(db.connection());

    let a = repo.create(1, cron_input("a")).await.unwrap();
    let b = repo.create(1, cron_input("b")).await.unwrap();
    repo.create(1, cron_input("c")).await.unwrap();

    repo.apply(a.id, TaskChanges { status: Some(TaskStatus::Ready), ..Default::default() })
        .await
        .unwrap();
    repo.apply(b.id, TaskChanges { status: Some(TaskStatus::Failed), ..Default::default() })
        .await
        .unwrap();

    let stats = repo.stats(1).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.completed, 0);
}

#[tokio::test]
async fn test_cron_tasks_returns_live_cron_rows() {
    let db = TestDatabase::new().await;
    let repo = PgTaskRepository::new(db.connection());

    repo.create(1, cron_input("digest")).await.unwrap();
    repo.create(1, schedule_input("announce")).await.unwrap();
    repo.create(2, cron_input("other admin digest")).await.unwrap();

    let cron_tasks = repo.cron_tasks().await.unwrap();
    // Restorer sees every admin's cron tasks.
    assert_eq!(cron_tasks.len(), 2);
    assert!(cron_tasks.iter().all(|t| t.trigger_type == TriggerType::Cron));
}
