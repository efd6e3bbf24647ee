// Tests for report generation functionality

mod common;

use common::{add_target, create_test_db};
use surveyor_core::model::{DiscoveredApi, ScanStats, TestResult, TestStatus, TestType};
use surveyor_core::report::{
    ReportFormat, gather_run_report, gather_scan_report, generate_run_json_report,
    generate_run_text_report, generate_scan_json_report, generate_scan_text_report,
    generate_trend_text_report, save_report,
};
use surveyor_core::{CoreError, Database};
use surveyor_scanner::{DiscoveredForm, FormField, PageResult};
use tempfile::TempDir;

fn finished_run(db: &Database) -> i64 {
    let target = add_target(db, "http://shop.test");
    let scan = db.create_scan(target).unwrap();
    db.finish_scan(scan, &ScanStats::default()).unwrap();
    let run = db
        .create_run(target, scan, &[TestType::Pages, TestType::Apis], Some("try checkout"))
        .unwrap();

    let rows = [
        ("pages", "home loads", TestStatus::Passed, None),
        ("pages", "about loads", TestStatus::Passed, None),
        (
            "apis",
            "GET /api/users",
            TestStatus::Failed,
            Some("expected 200, received 500"),
        ),
        ("apis", "GET /api/health", TestStatus::Skipped, None),
    ];
    for (category, name, status, error) in rows {
        db.insert_test_result(
            run,
            &TestResult {
                category: category.into(),
                test_name: name.into(),
                status,
                duration_ms: 1500,
                error_message: error.map(str::to_string),
            },
        )
        .unwrap();
    }
    db.finish_run(run, &db.summarize_run(run).unwrap()).unwrap();
    run
}

fn finished_scan(db: &Database) -> i64 {
    let target = add_target(db, "http://shop.test");
    let scan = db.create_scan(target).unwrap();

    let mut login = PageResult::new("http://shop.test/login".into());
    login.title = "Sign in".into();
    login.status_code = 200;
    login.is_auth_page = true;
    login.has_forms = true;
    db.insert_page(scan, &login).unwrap();

    db.insert_api(
        scan,
        &DiscoveredApi {
            method: "GET".into(),
            url: "http://shop.test/api/users".into(),
            status: 401,
            content_type: None,
            requires_auth: true,
        },
    )
    .unwrap();

    db.insert_form(
        scan,
        &DiscoveredForm {
            page_url: "http://shop.test/login".into(),
            action: "http://shop.test/session".into(),
            method: "POST".into(),
            fields: vec![FormField {
                tag: "input".into(),
                field_type: "email".into(),
                name: "email".into(),
                required: true,
                ..Default::default()
            }],
            is_login_form: true,
        },
    )
    .unwrap();

    db.finish_scan(
        scan,
        &ScanStats {
            pages: 1,
            apis: 1,
            forms: 1,
            auth_pages: 1,
            error: None,
        },
    )
    .unwrap();
    scan
}

// ============================================================================
// Report Format Tests
// ============================================================================

#[test]
fn test_report_format_from_str() {
    assert_eq!("text".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
    assert_eq!("TXT".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
    assert_eq!("Json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
    assert!(matches!("csv".parse::<ReportFormat>(), Err(CoreError::Config(_))));
}

// ============================================================================
// Run Report Tests
// ============================================================================

#[test]
fn test_run_text_report_sections() {
    let (_temp_dir, db) = create_test_db();
    let run = finished_run(&db);
    let report = generate_run_text_report(&gather_run_report(&db, run).unwrap());

    assert!(report.contains("SURVEYOR TEST RUN REPORT"));
    assert!(report.contains("Target:       shop (http://shop.test)"));
    assert!(report.contains("Test types:   pages, apis"));
    assert!(report.contains("AI prompt:    try checkout"));
    assert!(report.contains("Total:     4"));
    assert!(report.contains("Pass rate: 50%"));
    assert!(report.contains("pages (2/2 passed)"));
    assert!(report.contains("apis (0/2 passed)"));
    assert!(report.contains("✓ home loads  [1.5s]"));
    assert!(report.contains("- GET /api/health"));
    assert!(report.contains("[1] apis › GET /api/users"));
    assert!(report.contains("expected 200, received 500"));
    assert!(report.contains("End of Report"));
}

#[test]
fn test_run_json_report_is_parseable() {
    let (_temp_dir, db) = create_test_db();
    let run = finished_run(&db);
    let json = generate_run_json_report(&gather_run_report(&db, run).unwrap()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    let report = &value["report"];
    assert_eq!(report["metadata"]["generator"], "Surveyor");
    assert_eq!(report["run"]["status"], "done");
    assert_eq!(report["run"]["test_types"], serde_json::json!(["pages", "apis"]));
    assert_eq!(report["summary"]["total"], 4);
    assert_eq!(report["results"].as_array().unwrap().len(), 4);
}

#[test]
fn test_failed_run_report_shows_error() {
    let (_temp_dir, db) = create_test_db();
    let target = add_target(&db, "http://shop.test");
    let scan = db.create_scan(target).unwrap();
    let run = db.create_run(target, scan, &[TestType::Pages], None).unwrap();
    db.fail_run(run, "Test runner not found").unwrap();

    let report = generate_run_text_report(&gather_run_report(&db, run).unwrap());
    assert!(report.contains("Status:       error"));
    assert!(report.contains("Run failed:"));
    assert!(report.contains("Test runner not found"));
    assert!(!report.contains("FAILURES"));
}

#[test]
fn test_missing_run_is_not_found() {
    let (_temp_dir, db) = create_test_db();
    assert!(matches!(gather_run_report(&db, 42), Err(CoreError::NotFound(_))));
    assert!(matches!(gather_scan_report(&db, 42), Err(CoreError::NotFound(_))));
}

// ============================================================================
// Scan Report Tests
// ============================================================================

#[test]
fn test_scan_text_report_lists_discoveries() {
    let (_temp_dir, db) = create_test_db();
    let scan = finished_scan(&db);
    let report = generate_scan_text_report(&gather_scan_report(&db, scan).unwrap());

    assert!(report.contains("SURVEYOR DISCOVERY REPORT"));
    assert!(report.contains("Found:        1 pages (1 auth), 1 APIs, 1 forms"));
    assert!(report.contains("✓ 200 http://shop.test/login"));
    assert!(report.contains("(auth, forms)"));
    assert!(report.contains("http://shop.test/api/users  [auth required]"));
    assert!(report.contains("POST http://shop.test/session on http://shop.test/login  [login]"));
    assert!(report.contains("- email [email] *"));
}

#[test]
fn test_empty_scan_report_says_none() {
    let (_temp_dir, db) = create_test_db();
    let target = add_target(&db, "http://shop.test");
    let scan = db.create_scan(target).unwrap();
    db.finish_scan(scan, &ScanStats::default()).unwrap();

    let report = generate_scan_text_report(&gather_scan_report(&db, scan).unwrap());
    assert_eq!(report.matches("(none)").count(), 3);
}

#[test]
fn test_scan_json_report_is_parseable() {
    let (_temp_dir, db) = create_test_db();
    let scan = finished_scan(&db);
    let json = generate_scan_json_report(&gather_scan_report(&db, scan).unwrap()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    let report = &value["report"];
    assert_eq!(report["scan"]["stats"]["pages"], 1);
    assert_eq!(report["apis"][0]["requires_auth"], true);
    assert_eq!(report["forms"][0]["fields"][0]["type"], "email");
}

// ============================================================================
// Trend Report Tests
// ============================================================================

#[test]
fn test_trend_report_bars() {
    let (_temp_dir, db) = create_test_db();
    let run = finished_run(&db);
    let target_id = db.get_run(run).unwrap().unwrap().target_id;
    let target = db.get_target(target_id).unwrap().unwrap();

    let report = generate_trend_text_report(&target, &db.trends(target_id).unwrap());
    assert!(report.contains("PASS RATE TREND: shop"));
    assert!(report.contains(&format!("{}{}", "█".repeat(10), "░".repeat(10))));
    assert!(report.contains("50%  (2/4 passed)"));
    assert!(report.contains("prompt: try checkout"));
}

#[test]
fn test_trend_report_without_runs() {
    let (_temp_dir, db) = create_test_db();
    let target_id = add_target(&db, "http://shop.test");
    let target = db.get_target(target_id).unwrap().unwrap();

    let report = generate_trend_text_report(&target, &[]);
    assert!(report.contains("No finished runs yet."));
}

// ============================================================================
// Save Tests
// ============================================================================

#[test]
fn test_save_report() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("report.txt");
    save_report("hello report", &path).unwrap();
    assert_eq!(std::fs::read_to_string(path).unwrap(), "hello report");
}
