use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use surveyor_core::ai::{OpenAiClient, PlanExecutor, parse_plan, plan_to_playwright, validate_test_code};
use surveyor_core::config::{DATABASE_FILE, expand_path};
use surveyor_core::model::{AuthConfig, AuthStrategy, Status, TestType};
use surveyor_core::report::{
    ReportFormat, format_timestamp, gather_run_report, gather_scan_report,
    generate_run_json_report, generate_run_text_report, generate_scan_json_report,
    generate_scan_text_report, generate_trend_text_report, save_report,
};
use surveyor_core::{
    Database, DiscoveryOrchestrator, Event, EventBus, RunCoordinator, RunRequest, Settings,
    TestGenerator, TestRunner,
};
use surveyor_scanner::{BrowserLauncher, Crawler, LaunchOptions, StaticBrowser};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> String {
    print!("{} ", msg.bright_cyan().bold());
    let _ = io::stdout().flush();
    let mut response = String::new();
    if io::stdin().read_line(&mut response).is_err() {
        return String::new();
    }
    response.trim().to_lowercase()
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message.to_string());
    spinner
}

// ============================================================================
// Settings and database
// ============================================================================

/// Environment settings with the data directory chosen on the command line.
pub fn settings_from_matches(matches: &ArgMatches) -> Settings {
    let settings = Settings::from_env();
    match matches.get_one::<String>("data-dir") {
        Some(dir) => settings.with_data_dir(dir),
        None => settings,
    }
}

pub fn open_database(settings: &Settings) -> Result<Database> {
    let path = settings.database_path();
    if !Database::exists(&path) {
        bail!(
            "No database at {}. Run `surveyor init` first.",
            path.display()
        );
    }
    Ok(Database::new(&path)?)
}

fn find_target(db: &Database, id: i64) -> Result<surveyor_core::model::Target> {
    db.get_target(id)?
        .ok_or_else(|| anyhow!("Target {} not found", id))
}

// ============================================================================
// init
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Created(PathBuf),
    Kept(PathBuf),
}

/// Create `dir` and a fresh database in it. An existing database is
/// replaced when `force` is set or `confirm` agrees, and kept otherwise.
pub fn init_data_dir(dir: &Path, force: bool, confirm: impl FnOnce(&Path) -> bool) -> Result<InitOutcome> {
    let db_path = dir.join(DATABASE_FILE);
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create data directory {}", dir.display()))?;

    if Database::exists(&db_path) {
        if !force && !confirm(&db_path) {
            return Ok(InitOutcome::Kept(db_path));
        }
        Database::drop(&db_path);
    }
    Database::new(&db_path)?;
    Ok(InitOutcome::Created(db_path))
}

pub fn handle_init(args: &ArgMatches, settings: &Settings) -> Result<()> {
    print_divider();
    println!("{}", "  SURVEYOR INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let dir = args
        .get_one::<String>("PATH")
        .map(|p| expand_path(p))
        .unwrap_or_else(|| settings.data_dir.clone());
    let force = args.get_flag("force");
    println!(
        "{} Data directory: {}",
        "→".blue(),
        dir.display().to_string().bright_white()
    );

    let outcome = init_data_dir(&dir, force, |db_path| {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!(
            "Database already exists at {}",
            db_path.display().to_string().bright_white()
        );
        let response = print_prompt("Would you like to overwrite it? [y/N]:");
        response == "y" || response == "yes"
    })?;

    println!();
    match outcome {
        InitOutcome::Created(db_path) => {
            println!(
                "{} Database initialized: {}",
                "✓".green().bold(),
                db_path.display().to_string().bright_white()
            );
            println!(
                "{} Generated tests go to: {}",
                "✓".green().bold(),
                dir.join(&settings.generated_dir).display().to_string().bright_white()
            );
        }
        InitOutcome::Kept(db_path) => {
            println!(
                "{} Keeping existing database: {}",
                "→".blue(),
                db_path.display().to_string().bright_white()
            );
        }
    }
    println!();
    Ok(())
}

// ============================================================================
// target
// ============================================================================

/// Credentials for the chosen strategy, taken from the `target add` flags.
pub fn auth_from_args(args: &ArgMatches) -> Result<(AuthStrategy, AuthConfig)> {
    let strategy: AuthStrategy = args
        .get_one::<String>("auth")
        .map(String::as_str)
        .unwrap_or("none")
        .parse()?;
    let value = |name: &str| args.get_one::<String>(name).cloned();
    let config = AuthConfig {
        login_url: value("login-url"),
        username: value("username"),
        password: value("password"),
        username_selector: value("username-selector"),
        password_selector: value("password-selector"),
        submit_selector: value("submit-selector"),
        token: value("token"),
        login_api: value("login-api"),
        token_path: value("token-path"),
        cookie_name: value("cookie-name"),
        cookie_value: value("cookie-value"),
    };

    match strategy {
        AuthStrategy::Basic if config.username.is_none() => {
            bail!("basic auth needs --username")
        }
        AuthStrategy::Form if config.username.is_none() || config.password.is_none() => {
            bail!("form auth needs --username and --password")
        }
        AuthStrategy::Bearer if config.token.is_none() && config.login_api.is_none() => {
            warn!("bearer auth without --token or --login-api will be skipped");
        }
        AuthStrategy::Cookie if config.cookie_name.is_none() || config.cookie_value.is_none() => {
            warn!("cookie auth without --cookie-name and --cookie-value will be skipped");
        }
        _ => {}
    }
    Ok((strategy, config))
}

pub fn handle_target_add(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let name = args
        .get_one::<String>("name")
        .ok_or_else(|| anyhow!("--name is required"))?;
    let url = args
        .get_one::<url::Url>("url")
        .ok_or_else(|| anyhow!("--url is required"))?;
    let (strategy, config) = auth_from_args(args)?;

    let id = db.create_target(name, url.as_str(), strategy, &config)?;
    println!(
        "{} Target {} added: {} ({})",
        "✓".green().bold(),
        format!("#{}", id).bright_white(),
        name.bright_white(),
        url
    );
    println!("{} Next: surveyor scan {}", "→".blue(), id);
    Ok(())
}

fn status_label(status: Status) -> colored::ColoredString {
    match status {
        Status::Running => status.as_str().yellow(),
        Status::Done => status.as_str().green(),
        Status::Error => status.as_str().red(),
    }
}

pub fn handle_target_list(settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let targets = db.list_targets()?;
    if targets.is_empty() {
        println!("No targets yet. Add one with `surveyor target add`.");
        return Ok(());
    }

    println!(
        "{}",
        format!("{:<5} {:<20} {:<40} {:<8} {}", "ID", "NAME", "URL", "AUTH", "LAST SCAN").bold()
    );
    for target in targets {
        let last_scan = db
            .latest_scan(target.id)?
            .map(|s| format!("#{} {}", s.id, format_timestamp(s.started_at)))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<5} {:<20} {:<40} {:<8} {}",
            target.id,
            target.name,
            target.base_url,
            target.auth_type.as_str(),
            last_scan
        );
    }
    Ok(())
}

pub fn handle_target_show(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let id = *args.get_one::<i64>("ID").ok_or_else(|| anyhow!("missing target ID"))?;
    let target = find_target(&db, id)?;

    print_divider();
    println!("  {} {}", target.name.bright_white().bold(), target.base_url);
    print_divider();
    println!("{} Auth: {}", "→".blue(), target.auth_type.as_str());
    println!("{} Added: {}", "→".blue(), format_timestamp(target.created_at));

    println!("\n{}", "SCANS".bright_blue().bold());
    let scans = db.scans_for_target(id)?;
    if scans.is_empty() {
        println!("  (none)");
    }
    for scan in scans {
        let stats = scan
            .stats
            .map(|s| match s.error {
                Some(error) => error,
                None => format!("{} pages, {} APIs, {} forms", s.pages, s.apis, s.forms),
            })
            .unwrap_or_default();
        println!(
            "  #{:<5} {:<8} {}  {}",
            scan.id,
            status_label(scan.status),
            format_timestamp(scan.started_at),
            stats
        );
    }

    println!("\n{}", "TEST RUNS".bright_blue().bold());
    let runs = db.runs_for_target(id)?;
    if runs.is_empty() {
        println!("  (none)");
    }
    for run in runs {
        let summary = run
            .summary
            .map(|s| match s.error {
                Some(error) => error,
                None => format!("{}/{} passed ({}%)", s.passed, s.total, s.pass_rate()),
            })
            .unwrap_or_default();
        println!(
            "  #{:<5} {:<8} {}  {}",
            run.id,
            status_label(run.status),
            format_timestamp(run.started_at),
            summary
        );
    }
    println!();
    Ok(())
}

pub fn handle_target_remove(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let id = *args.get_one::<i64>("ID").ok_or_else(|| anyhow!("missing target ID"))?;
    if !db.delete_target(id)? {
        bail!("Target {} not found", id);
    }
    println!("{} Target #{} removed with its scans and runs", "✓".green().bold(), id);
    Ok(())
}

// ============================================================================
// Progress rendering
// ============================================================================

/// Spinner text for progress-like events.
pub fn progress_message(event: &Event) -> Option<String> {
    let payload = &event.payload;
    match event.name.as_str() {
        "progress" => Some(format!(
            "[{:>3}%] {}",
            payload["percent"].as_u64().unwrap_or(0),
            payload["message"].as_str().unwrap_or_default()
        )),
        "status" => payload["phase"]
            .as_str()
            .map(|phase| format!("{}...", capitalize(phase))),
        "test_total" => Some(format!(
            "Running {} tests with {} workers...",
            payload["total"].as_u64().unwrap_or(0),
            payload["workers"].as_u64().unwrap_or(0)
        )),
        _ => None,
    }
}

/// A line to print above the spinner for per-item events.
pub fn result_line(event: &Event) -> Option<String> {
    let payload = &event.payload;
    match event.name.as_str() {
        "test_result" => {
            let mark = match payload["status"].as_str() {
                Some("passed") => "✓".green(),
                Some("skipped") => "-".yellow(),
                _ => "✗".red(),
            };
            Some(format!(
                "  {} [{}/{}] {} › {}",
                mark,
                payload["completed"].as_u64().unwrap_or(0),
                payload["total"].as_u64().unwrap_or(0),
                payload["category"].as_str().unwrap_or_default(),
                payload["name"].as_str().unwrap_or_default()
            ))
        }
        "generation_done" => Some(format!(
            "  {} Generated {} tests",
            "✓".green(),
            payload["total"].as_u64().unwrap_or(0)
        )),
        "page" => Some(format!(
            "  {} {} {}",
            "→".blue(),
            payload["status"].as_u64().unwrap_or(0),
            payload["url"].as_str().unwrap_or_default()
        )),
        _ => None,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Render events from `bus` on `spinner` until the bus is dropped.
fn spawn_progress(bus: &EventBus, spinner: ProgressBar) -> JoinHandle<ProgressBar> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(message) = progress_message(&event) {
                        spinner.set_message(message);
                    }
                    if let Some(line) = result_line(&event) {
                        spinner.println(line);
                    }
                }
                Err(RecvError::Lagged(missed)) => debug!("Progress display skipped {} events", missed),
                Err(RecvError::Closed) => break,
            }
        }
        spinner
    })
}

async fn finish_progress(bus: EventBus, task: JoinHandle<ProgressBar>) {
    drop(bus);
    if let Ok(spinner) = task.await {
        spinner.finish_and_clear();
    }
}

// ============================================================================
// scan
// ============================================================================

fn launcher(driver: &str) -> Result<Arc<dyn BrowserLauncher>> {
    match driver {
        "static" => Ok(Arc::new(StaticBrowser)),
        #[cfg(feature = "chrome")]
        "chrome" => Ok(Arc::new(surveyor_scanner::ChromeLauncher::new())),
        #[cfg(not(feature = "chrome"))]
        "chrome" => bail!("this build has no Chrome driver; rebuild with `--features chrome`"),
        other => bail!("unknown browser driver '{}'", other),
    }
}

fn launch_options(settings: &Settings) -> LaunchOptions {
    LaunchOptions {
        navigation_timeout: settings.navigation_timeout(),
        ..Default::default()
    }
}

pub async fn handle_scan(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let target_id = *args.get_one::<i64>("TARGET").ok_or_else(|| anyhow!("missing target ID"))?;
    let target = find_target(&db, target_id)?;
    let driver = args.get_one::<String>("browser").map(String::as_str).unwrap_or("static");

    let crawler = Crawler::new()
        .with_max_depth(*args.get_one::<usize>("max-depth").unwrap_or(&settings.max_depth))
        .with_max_pages(*args.get_one::<usize>("max-pages").unwrap_or(&settings.max_pages))
        .with_navigation_timeout(settings.navigation_timeout())
        .with_spa_discovery(!args.get_flag("no-spa"));
    let orchestrator = DiscoveryOrchestrator::new(launcher(driver)?)
        .with_launch_options(launch_options(settings))
        .with_crawler(crawler)
        .with_probe_timeout(settings.probe_timeout());

    println!(
        "{} Scanning {} ({})",
        "→".blue(),
        target.name.bright_white().bold(),
        target.base_url
    );
    let scan_id = db.create_scan(target_id)?;
    let bus = EventBus::default();
    let progress = spawn_progress(&bus, spinner("Starting scan..."));
    let outcome = orchestrator.run(&db, &bus, scan_id, &target).await;
    finish_progress(bus, progress).await;

    let stats = outcome?;
    println!(
        "{} Scan #{} complete: {} pages ({} auth), {} APIs, {} forms",
        "✓".green().bold(),
        scan_id,
        stats.pages,
        stats.auth_pages,
        stats.apis,
        stats.forms
    );
    println!(
        "{} Next: surveyor run {}  |  surveyor report scan {}",
        "→".blue(),
        target_id,
        scan_id
    );
    Ok(())
}

// ============================================================================
// run
// ============================================================================

/// Comma separated test types, in the order given, without repeats.
pub fn parse_test_types(raw: &str) -> Result<Vec<TestType>> {
    let mut types = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let test_type: TestType = part.parse()?;
        if !types.contains(&test_type) {
            types.push(test_type);
        }
    }
    Ok(types)
}

pub async fn handle_run(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let target_id = *args.get_one::<i64>("TARGET").ok_or_else(|| anyhow!("missing target ID"))?;
    let target = find_target(&db, target_id)?;

    let scan_id = match args.get_one::<i64>("scan") {
        Some(id) => *id,
        None => db
            .latest_scan(target_id)?
            .map(|s| s.id)
            .ok_or_else(|| anyhow!("Target {} has no finished scan. Run `surveyor scan {}` first.", target_id, target_id))?,
    };
    let ai_only = args.get_flag("ai-only");
    let request = RunRequest {
        scan_id,
        test_types: if ai_only {
            Vec::new()
        } else {
            parse_test_types(args.get_one::<String>("types").map(String::as_str).unwrap_or_default())?
        },
        ai_prompt: args.get_one::<String>("prompt").cloned(),
        ai_only,
        scout: args.get_flag("scout"),
    };

    let mut generator = TestGenerator::new(settings.generated_path().join(format!("target-{}", target_id)))
        .with_ai_limits(settings.llm.max_tokens, settings.llm.timeout());
    if request.prompt().is_some() {
        match OpenAiClient::from_settings(&settings.llm) {
            Ok(client) => generator = generator.with_llm(Arc::new(client)),
            Err(e) => warn!("AI tests unavailable: {}", e),
        }
    }

    let workers = *args.get_one::<usize>("workers").unwrap_or(&settings.workers);
    let mut runner = TestRunner::new(settings.runner_command.clone())
        .with_workers(workers)
        .with_timeout(settings.runner_timeout());
    // The runner resolves Playwright from the invoking project.
    if let Ok(cwd) = std::env::current_dir() {
        runner = runner.with_workdir(cwd);
    }

    let mut coordinator = RunCoordinator::new(generator, runner, settings.results_path());
    if request.scout {
        coordinator = coordinator.with_scout(Arc::new(StaticBrowser), launch_options(settings));
    }

    let run_id = coordinator.start(&db, &target, &request)?;
    println!(
        "{} Test run #{} for {} from scan #{}",
        "→".blue(),
        run_id,
        target.name.bright_white().bold(),
        scan_id
    );

    let bus = EventBus::default();
    let progress = spawn_progress(&bus, spinner("Generating tests..."));
    let outcome = coordinator.execute(&db, &bus, run_id, &target, &request).await;
    finish_progress(bus, progress).await;

    let summary = outcome?;
    let verdict = if summary.failed == 0 {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "{} Run #{}: {} passed, {} failed, {} skipped of {} ({}%)",
        verdict,
        run_id,
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.skipped.to_string().yellow(),
        summary.total,
        summary.pass_rate()
    );
    println!("{} Details: surveyor report run {}", "→".blue(), run_id);
    Ok(())
}

// ============================================================================
// report
// ============================================================================

pub fn handle_report(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let Some((kind, sub)) = args.subcommand() else {
        bail!("choose a report: run, scan or trends");
    };
    let format: ReportFormat = sub
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text")
        .parse()?;

    let content = match (kind, format) {
        ("run", format) => {
            let id = *sub.get_one::<i64>("ID").ok_or_else(|| anyhow!("missing run ID"))?;
            let data = gather_run_report(&db, id)?;
            match format {
                ReportFormat::Text => generate_run_text_report(&data),
                ReportFormat::Json => generate_run_json_report(&data)?,
            }
        }
        ("scan", format) => {
            let id = *sub.get_one::<i64>("ID").ok_or_else(|| anyhow!("missing scan ID"))?;
            let data = gather_scan_report(&db, id)?;
            match format {
                ReportFormat::Text => generate_scan_text_report(&data),
                ReportFormat::Json => generate_scan_json_report(&data)?,
            }
        }
        ("trends", format) => {
            let id = *sub.get_one::<i64>("TARGET").ok_or_else(|| anyhow!("missing target ID"))?;
            let target = find_target(&db, id)?;
            let points = db.trends(id)?;
            match format {
                ReportFormat::Text => generate_trend_text_report(&target, &points),
                ReportFormat::Json => serde_json::to_string_pretty(&points)?,
            }
        }
        (other, _) => bail!("unknown report '{}'", other),
    };

    match sub.get_one::<PathBuf>("output") {
        Some(path) => {
            save_report(&content, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", content),
    }
    Ok(())
}

// ============================================================================
// plan
// ============================================================================

/// Validate the plan in `path` and compile it to a Playwright spec.
pub fn compile_plan_file(path: &Path, base_url: &str) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    let plans = parse_plan(&raw)?;
    let code = plan_to_playwright(&plans, base_url, &BTreeMap::new());
    validate_test_code(&code)?;
    Ok(code)
}

pub async fn handle_plan(args: &ArgMatches) -> Result<()> {
    let path = args
        .get_one::<PathBuf>("FILE")
        .ok_or_else(|| anyhow!("missing plan file"))?;
    let base_url = args
        .get_one::<url::Url>("base-url")
        .ok_or_else(|| anyhow!("--base-url is required"))?
        .as_str()
        .trim_end_matches('/')
        .to_string();

    if !args.get_flag("execute") {
        let code = compile_plan_file(path, &base_url)?;
        match args.get_one::<PathBuf>("output") {
            Some(output) => {
                fs::write(output, &code)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                println!(
                    "{} Spec written to {}",
                    "✓".green().bold(),
                    output.display().to_string().bright_white()
                );
            }
            None => println!("{}", code),
        }
        return Ok(());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    let plans = parse_plan(&raw)?;
    let page = StaticBrowser.launch(&LaunchOptions::default()).await?;
    let outcomes = PlanExecutor::new(page.as_ref(), &base_url)
        .run_plans(&plans)
        .await;
    if let Err(e) = page.close().await {
        debug!("Closing plan browser failed: {}", e);
    }

    for outcome in &outcomes {
        let mark = if outcome.passed { "✓".green().bold() } else { "✗".red().bold() };
        println!("{} {}", mark, outcome.name.bright_white());
        for step in &outcome.steps {
            let step_mark = if step.ok { "✓".green() } else { "✗".red() };
            let strategy = step
                .strategy
                .map(|s| format!(" ({})", s.description()))
                .unwrap_or_default();
            println!(
                "    {} {}{}{}",
                step_mark,
                step.action,
                strategy,
                step.detail.as_deref().map(|d| format!(": {}", d)).unwrap_or_default()
            );
        }
        if let Some(failure) = &outcome.failure {
            println!("    {} {}", "→".red(), failure);
        }
    }
    let passed = outcomes.iter().filter(|o| o.passed).count();
    println!("\n{}/{} plans passed", passed, outcomes.len());
    Ok(())
}
