//! End-to-end: config file + target list on disk -> engine -> rendered report.

use std::sync::Arc;

use mw_api::fakes::FakeWikiApi;
use mw_api::ApiError;
use rollback_core::{
    load_target_list, render_report_text, write_report_json, BatchEngine, Config, ErrorKind,
    RollbackError, RollbackOptions, SessionPool,
};

const CONFIG: &str = r#"
data_dir = "data"

[engine]
concurrency = 3
backoff_ms = 10

[credentials.default]
access_token = "oauth-token"

[credentials.sites."locked.example.org"]
username = "Locked@rollbot"
"#;

const TARGETS: &str = "\
# vandalism wave
en.wikipedia.org 100
fr.wikisource.org 200
en.wikipedia.org abc
locked.example.org 300
en.wikipedia.org 101
";

#[tokio::test]
async fn test_massrollback_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("wikirollback.toml");
    std::fs::write(&config_path, CONFIG).unwrap();
    let config = Config::load(&config_path).unwrap();

    let data_dir = dir.path().join(&config.data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("wave.txt"), TARGETS).unwrap();
    let list = load_target_list(&data_dir, "wave.txt").unwrap();

    let api = Arc::new(FakeWikiApi::new().script(
        "en.wikipedia.org",
        101,
        vec![Err(ApiError::NotRollbackable(
            "The last edit was made by the only author".to_string(),
        ))],
    ));
    let pool = Arc::new(SessionPool::new(api.clone(), Arc::new(config.credentials.clone())));
    let engine = BatchEngine::new(Arc::clone(&pool), config.engine_config());

    let options = RollbackOptions::new(Some("Reverting vandalism".to_string()), true);
    let report = engine
        .run(list.targets, options)
        .await
        .with_parse_errors(list.errors);
    pool.close().await;

    let kinds: Vec<_> = report.outcomes.iter().map(|o| o.reason()).collect();
    assert_eq!(
        kinds,
        vec![
            None,
            None,
            Some(ErrorKind::AuthError),
            Some(ErrorKind::NotRollbackable),
        ]
    );
    assert_eq!(report.parse_errors.len(), 1);
    assert_eq!(report.parse_errors[0].line, 4);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(api.logins("locked.example.org"), 1);

    let text = render_report_text(&report);
    assert!(text.contains("Rollbacked en.wikipedia.org: 100 (rev "));
    assert!(text.contains("Did not rollback locked.example.org: 300 [auth_error]"));
    assert!(text.contains("Did not rollback en.wikipedia.org: 101 [not_rollbackable]"));
    assert!(text.contains("line 4: abc is not a positive integer page id"));
    assert!(text.ends_with("2 succeeded, 2 failed, 0 skipped, 1 unparsed\n"));

    let json_path = dir.path().join("report.json");
    write_report_json(&json_path, &report).unwrap();
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(raw["outcomes"].as_array().unwrap().len(), 4);
    assert_eq!(raw["counts"]["failed"], serde_json::json!(2));
}

#[tokio::test]
async fn test_unreadable_target_list_fails_before_any_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_target_list(dir.path(), "nope.txt").unwrap_err();
    assert!(matches!(err, RollbackError::TargetList { .. }));

    let err = load_target_list(dir.path(), "../escape.txt").unwrap_err();
    assert!(matches!(err, RollbackError::TargetListOutsideDataDir(_)));
}
