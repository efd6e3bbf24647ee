use clap::{Arg, Command};
use serde_json::json;
use surveyor::handlers::*;
use surveyor_core::config::DATABASE_FILE;
use surveyor_core::model::{AuthStrategy, TestType};
use surveyor_core::{Channel, Database, Event, Settings};
use tempfile::TempDir;

fn event(name: &str, payload: serde_json::Value) -> Event {
    colored::control::set_override(false);
    Event {
        channel: Channel::Run,
        id: 1,
        name: name.to_string(),
        payload,
    }
}

fn auth_matches(args: &[&str]) -> clap::ArgMatches {
    let mut command = Command::new("add").arg(Arg::new("auth").long("auth").default_value("none"));
    for name in [
        "login-url",
        "username",
        "password",
        "username-selector",
        "password-selector",
        "submit-selector",
        "token",
        "login-api",
        "token-path",
        "cookie-name",
        "cookie-value",
    ] {
        command = command.arg(Arg::new(name).long(name));
    }
    command
        .try_get_matches_from(std::iter::once("add").chain(args.iter().copied()))
        .unwrap()
}

// ============================================================================
// init
// ============================================================================

#[test]
fn test_init_creates_directory_and_database() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("surveyor");

    let outcome = init_data_dir(&dir, false, |_| panic!("nothing to confirm")).unwrap();
    assert_eq!(outcome, InitOutcome::Created(dir.join(DATABASE_FILE)));
    assert!(Database::exists(&dir.join(DATABASE_FILE)));
}

#[test]
fn test_init_keeps_existing_database_when_declined() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join(DATABASE_FILE);
    let db = Database::new(&db_path).unwrap();
    db.create_target("shop", "http://shop.test", AuthStrategy::None, &Default::default())
        .unwrap();
    drop(db);

    let outcome = init_data_dir(temp_dir.path(), false, |_| false).unwrap();
    assert_eq!(outcome, InitOutcome::Kept(db_path.clone()));
    assert_eq!(Database::new(&db_path).unwrap().list_targets().unwrap().len(), 1);
}

#[test]
fn test_init_force_replaces_database() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join(DATABASE_FILE);
    let db = Database::new(&db_path).unwrap();
    db.create_target("shop", "http://shop.test", AuthStrategy::None, &Default::default())
        .unwrap();
    drop(db);

    init_data_dir(temp_dir.path(), true, |_| panic!("force never asks")).unwrap();
    assert!(Database::new(&db_path).unwrap().list_targets().unwrap().is_empty());
}

#[test]
fn test_open_database_requires_init() {
    let temp_dir = TempDir::new().unwrap();
    let settings = Settings::default().with_data_dir(&temp_dir.path().display().to_string());

    let err = open_database(&settings).err().unwrap();
    assert!(err.to_string().contains("surveyor init"));

    init_data_dir(temp_dir.path(), false, |_| false).unwrap();
    assert!(open_database(&settings).is_ok());
}

// ============================================================================
// target add
// ============================================================================

#[test]
fn test_auth_from_args_bearer_login() {
    let matches = auth_matches(&[
        "--auth",
        "bearer",
        "--login-api",
        "/api/login",
        "--username",
        "alice",
        "--password",
        "secret",
        "--token-path",
        "data.token",
    ]);
    let (strategy, config) = auth_from_args(&matches).unwrap();
    assert_eq!(strategy, AuthStrategy::Bearer);
    assert_eq!(config.login_api.as_deref(), Some("/api/login"));
    assert_eq!(config.token_path.as_deref(), Some("data.token"));
    assert!(config.cookie_name.is_none());
}

#[test]
fn test_auth_from_args_rejects_incomplete_credentials() {
    assert!(auth_from_args(&auth_matches(&["--auth", "basic"])).is_err());
    assert!(auth_from_args(&auth_matches(&["--auth", "form", "--username", "alice"])).is_err());
    assert!(auth_from_args(&auth_matches(&["--auth", "kerberos"])).is_err());
    assert_eq!(
        auth_from_args(&auth_matches(&[])).unwrap().0,
        AuthStrategy::None
    );
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_parse_test_types() {
    assert_eq!(
        parse_test_types("pages, APIs,pages,,forms").unwrap(),
        vec![TestType::Pages, TestType::Apis, TestType::Forms]
    );
    assert!(parse_test_types("").unwrap().is_empty());
    assert!(parse_test_types("pages,smoke").is_err());
}

// ============================================================================
// Progress rendering
// ============================================================================

#[test]
fn test_progress_message() {
    let progress = event("progress", json!({"percent": 50, "message": "Found 3 pages"}));
    assert_eq!(progress_message(&progress).unwrap(), "[ 50%] Found 3 pages");

    let status = event("status", json!({"phase": "executing"}));
    assert_eq!(progress_message(&status).unwrap(), "Executing...");

    let total = event("test_total", json!({"total": 12, "workers": 2}));
    assert_eq!(progress_message(&total).unwrap(), "Running 12 tests with 2 workers...");

    assert!(progress_message(&event("done", json!({}))).is_none());
}

#[test]
fn test_result_line() {
    let passed = event(
        "test_result",
        json!({"name": "Page loads: /", "category": "pages", "status": "passed", "completed": 1, "total": 4}),
    );
    assert_eq!(result_line(&passed).unwrap(), "  ✓ [1/4] pages › Page loads: /");

    let failed = event(
        "test_result",
        json!({"name": "GET /api/users", "category": "apis", "status": "failed", "completed": 2, "total": 4}),
    );
    assert!(result_line(&failed).unwrap().starts_with("  ✗ [2/4]"));

    let page = event("page", json!({"url": "http://shop.test/", "status": 200}));
    assert_eq!(result_line(&page).unwrap(), "  → 200 http://shop.test/");

    assert!(result_line(&event("progress", json!({"percent": 5}))).is_none());
}

// ============================================================================
// plan
// ============================================================================

#[test]
fn test_compile_plan_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("plan.json");
    std::fs::write(
        &path,
        r#"[{"name": "signup works", "steps": [
            {"action": "goto", "path": "/signup"},
            {"action": "fill", "field": "email", "value": "test@example.com"},
            {"action": "click_button", "text": "Sign up"},
            {"action": "assert_url_changed"}
        ]}]"#,
    )
    .unwrap();

    let code = compile_plan_file(&path, "http://shop.test").unwrap();
    assert!(code.contains("test.describe('Custom AI Tests'"));
    assert!(code.contains("signup works"));
    assert!(code.contains("expect("));
}

#[test]
fn test_compile_plan_file_rejects_bad_plans() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("plan.json");

    std::fs::write(&path, "[]").unwrap();
    assert!(compile_plan_file(&path, "http://shop.test").is_err());

    std::fs::write(&path, r#"[{"name": "x", "steps": [{"action": "teleport"}]}]"#).unwrap();
    assert!(compile_plan_file(&path, "http://shop.test").is_err());

    assert!(compile_plan_file(&temp_dir.path().join("missing.json"), "http://shop.test").is_err());
}
