use std::sync::Arc;

use chrono::{Duration, Utc};
use jobtrack_store::models::{Company, Job, JobStatus, MatchResult, Profile};
use jobtrack_store::persistence::{db, schema, Repositories};

async fn repos() -> Repositories {
    let pool = db::connect_memory().await.expect("in-memory connect");
    Repositories::new(Arc::new(pool))
}

fn company(id: i64, name: &str) -> Company {
    let now = Utc::now();
    Company {
        id,
        name: name.into(),
        created_at: now,
        updated_at: now,
        ..Company::default()
    }
}

fn job(id: i64, company_id: Option<i64>, updated_offset_secs: i64) -> Job {
    let now = Utc::now();
    Job {
        id,
        company_id,
        title: format!("Job {id}"),
        status: JobStatus::Interviewing,
        created_at: now,
        updated_at: now + Duration::seconds(updated_offset_secs),
        ..Job::default()
    }
}

fn match_result(id: i64, job_id: i64, created_offset_secs: i64) -> MatchResult {
    MatchResult {
        id,
        job_id,
        score: 72.5,
        summary: Some("solid fit".into()),
        strengths: vec!["rust".into()],
        gaps: vec!["kubernetes".into()],
        created_at: Utc::now() + Duration::seconds(created_offset_secs),
    }
}

#[tokio::test]
async fn in_memory_connect_creates_all_tables() {
    let repos = repos().await;

    for table in ["tenant", "profile", "company", "job", "match_result"] {
        let query = format!("SELECT COUNT(*) FROM {table}");
        let count: i64 = sqlx::query_scalar(&query)
            .fetch_one(repos.db.as_ref())
            .await
            .unwrap_or_else(|e| panic!("table '{table}' should be queryable: {e}"));
        assert_eq!(count, 0, "table '{table}' should start empty");
    }

    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(repos.db.as_ref())
        .await
        .expect("user_version");
    assert_eq!(version, schema::SCHEMA_VERSION);
}

#[tokio::test]
async fn bootstrap_is_rerunnable() {
    let repos = repos().await;
    schema::bootstrap_schema(repos.db.as_ref())
        .await
        .expect("second bootstrap");
}

#[tokio::test]
async fn newer_schema_version_is_refused() {
    let repos = repos().await;
    sqlx::raw_sql("PRAGMA user_version = 99")
        .execute(repos.db.as_ref())
        .await
        .expect("bump version");

    let err = schema::bootstrap_schema(repos.db.as_ref())
        .await
        .expect_err("newer schema");
    assert!(err.to_string().contains("newer"), "got {err}");
}

#[tokio::test]
async fn company_upsert_get_list_delete() {
    let repos = repos().await;
    repos.companies.upsert(&company(2, "Globex")).await.expect("insert");
    repos.companies.upsert(&company(1, "Acme")).await.expect("insert");

    let mut renamed = company(2, "Globex Corp");
    renamed.website = Some("https://globex.example".into());
    repos.companies.upsert(&renamed).await.expect("update");

    let fetched = repos.companies.get(2).await.expect("get").expect("row");
    assert_eq!(fetched.name, "Globex Corp");
    assert_eq!(fetched.website.as_deref(), Some("https://globex.example"));

    let names: Vec<String> = repos
        .companies
        .list()
        .await
        .expect("list")
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Acme", "Globex Corp"]);

    assert!(repos.companies.delete(1).await.expect("delete"));
    assert!(!repos.companies.delete(1).await.expect("delete again"));
    assert!(repos.companies.get(1).await.expect("get").is_none());
}

#[tokio::test]
async fn job_round_trip_and_filtered_list() {
    let repos = repos().await;
    repos.companies.upsert(&company(1, "Acme")).await.expect("company");
    let older = job(10, Some(1), 0);
    let newer = job(11, None, 60);
    repos.jobs.upsert(&older).await.expect("job");
    repos.jobs.upsert(&newer).await.expect("job");

    assert_eq!(repos.jobs.get(10).await.expect("get"), Some(older.clone()));

    let all: Vec<i64> = repos
        .jobs
        .list(None)
        .await
        .expect("list")
        .iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(all, vec![11, 10], "most recently updated first");

    let filtered = repos.jobs.list(Some(1)).await.expect("filtered");
    assert_eq!(filtered, vec![older]);
}

#[tokio::test]
async fn deleting_company_detaches_jobs() {
    let repos = repos().await;
    repos.companies.upsert(&company(1, "Acme")).await.expect("company");
    repos.jobs.upsert(&job(10, Some(1), 0)).await.expect("job");

    repos.companies.delete(1).await.expect("delete company");

    let detached = repos.jobs.get(10).await.expect("get").expect("row");
    assert_eq!(detached.company_id, None);
}

#[tokio::test]
async fn deleting_job_cascades_to_match_results() {
    let repos = repos().await;
    repos.jobs.upsert(&job(10, None, 0)).await.expect("job");
    repos
        .matches
        .upsert(&match_result(20, 10, 0))
        .await
        .expect("match");

    repos.jobs.delete(10).await.expect("delete job");

    assert!(repos.matches.get(20).await.expect("get").is_none());
}

#[tokio::test]
async fn job_for_unknown_company_violates_foreign_key() {
    let repos = repos().await;
    let err = repos
        .jobs
        .upsert(&job(10, Some(404), 0))
        .await
        .expect_err("dangling company");
    assert!(err.to_string().starts_with("db:"), "got {err}");
}

#[tokio::test]
async fn match_history_is_newest_first_and_limited() {
    let repos = repos().await;
    repos.jobs.upsert(&job(10, None, 0)).await.expect("job");
    for (id, offset) in [(20, 0), (21, 30), (22, 60)] {
        repos
            .matches
            .upsert(&match_result(id, 10, offset))
            .await
            .expect("match");
    }

    let recent: Vec<i64> = repos
        .matches
        .list_recent(2)
        .await
        .expect("recent")
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(recent, vec![22, 21]);

    let stored = repos.matches.get(21).await.expect("get").expect("row");
    assert_eq!(stored.strengths, vec!["rust"]);
    assert_eq!(stored.gaps, vec!["kubernetes"]);
    assert_eq!(repos.matches.list_all().await.expect("all").len(), 3);
}

#[tokio::test]
async fn profile_requires_tenant_and_upserts() {
    let repos = repos().await;
    repos.profiles.ensure_tenant("alice").await.expect("tenant");
    repos.profiles.ensure_tenant("alice").await.expect("idempotent");

    let mut profile = Profile::empty(1, "alice");
    repos.profiles.upsert(&profile).await.expect("insert");
    profile.headline = Some("Backend engineer".into());
    profile.skills = vec!["rust".into(), "postgres".into()];
    repos.profiles.upsert(&profile).await.expect("update");

    let stored = repos.profiles.get("alice").await.expect("get").expect("row");
    assert_eq!(stored.headline.as_deref(), Some("Backend engineer"));
    assert_eq!(stored.skills, vec!["rust", "postgres"]);
    assert!(repos.profiles.get("bob").await.expect("get").is_none());
}

#[tokio::test]
async fn max_id_spans_every_table() {
    let repos = repos().await;
    assert_eq!(repos.max_id().await.expect("empty"), 0);

    repos.profiles.ensure_tenant("alice").await.expect("tenant");
    repos
        .profiles
        .upsert(&Profile::empty(3, "alice"))
        .await
        .expect("profile");
    repos.companies.upsert(&company(7, "Acme")).await.expect("company");
    repos.jobs.upsert(&job(5, None, 0)).await.expect("job");
    repos
        .matches
        .upsert(&match_result(41, 5, 0))
        .await
        .expect("match");

    assert_eq!(repos.max_id().await.expect("max"), 41);
}

#[tokio::test]
async fn checkpoint_on_file_database_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let pool = db::connect(
        &temp.path().join("nested").join("store.db"),
        std::time::Duration::from_millis(500),
        2,
    )
    .await
    .expect("file connect");
    let repos = Repositories::new(Arc::new(pool));
    repos.companies.upsert(&company(1, "Acme")).await.expect("company");

    db::checkpoint(repos.db.as_ref()).await.expect("checkpoint");
    assert!(temp.path().join("nested").join("store.db").exists());
}
