use jobtrack_store::AppError;

#[test]
fn display_prefixes_name_the_failure_kind() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Init("bad".into()), "init: bad"),
        (AppError::Db("bad".into()), "db: bad"),
        (AppError::Cache("bad".into()), "cache: bad"),
        (AppError::Codec("bad".into()), "codec: bad"),
        (AppError::NotFound("job 7".into()), "not found: job 7"),
        (AppError::Sync("bad".into()), "sync: bad"),
        (AppError::Backup("bad".into()), "backup: bad"),
        (AppError::Closed("bad".into()), "closed: bad"),
        (AppError::Io("bad".into()), "io: bad"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn collect_with_no_errors_is_ok() {
    assert!(AppError::collect(Vec::new()).is_ok());
}

#[test]
fn collect_with_one_error_returns_it_unchanged() {
    let err = AppError::collect(vec![AppError::Sync("flush failed".into())]).expect_err("one");
    assert!(matches!(err, AppError::Sync(ref msg) if msg == "flush failed"), "got {err}");
}

#[test]
fn collect_with_many_errors_aggregates() {
    let err = AppError::collect(vec![
        AppError::Sync("alice".into()),
        AppError::Backup("bob".into()),
    ])
    .expect_err("many");

    match &err {
        AppError::Aggregate(inner) => assert_eq!(inner.len(), 2),
        other => panic!("expected aggregate, got {other}"),
    }
    assert_eq!(err.to_string(), "2 errors: sync: alice; backup: bob");
}

#[test]
fn json_errors_map_to_codec() {
    let parse_err = serde_json::from_str::<i64>("nope").expect_err("invalid json");
    let err: AppError = parse_err.into();
    assert!(matches!(err, AppError::Codec(_)), "got {err}");
}

#[test]
fn io_errors_map_to_io() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: AppError = io.into();
    assert_eq!(err.to_string(), "io: denied");
}

#[test]
fn sqlx_errors_map_to_db() {
    let err: AppError = sqlx::Error::RowNotFound.into();
    assert!(matches!(err, AppError::Db(_)), "got {err}");
}
