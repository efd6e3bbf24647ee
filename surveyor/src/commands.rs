use crate::CLAP_STYLING;
use clap::{arg, command};
use surveyor_core::config::DEFAULT_DATA_DIR;
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("surveyor")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("surveyor")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(arg!(-v --"verbose" "Log debug output (RUST_LOG takes precedence)").required(false))
        .arg(
            arg!(-d --"data-dir" <PATH>)
                .required(false)
                .global(true)
                .help("Directory holding the surveyor database and generated tests")
                .default_value(DEFAULT_DATA_DIR),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the surveyor data directory and database")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location of the data directory (overrides --data-dir)"),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite any existing database without asking")
                        .required(false),
                ),
        )
        .subcommand(
            command!("target")
                .about("Manage the web applications under test")
                .subcommand_required(true)
                .subcommand(
                    command!("add")
                        .about("Registers a target")
                        .arg(arg!(-n --"name" <NAME>).required(true).help("A short name for the target"))
                        .arg(
                            arg!(-u --"url" <URL>)
                                .required(true)
                                .help("Base URL of the application")
                                .value_parser(clap::value_parser!(Url)),
                        )
                        .arg(
                            arg!(-a --"auth" <STRATEGY>)
                                .required(false)
                                .help("How to authenticate before discovery")
                                .value_parser(["none", "form", "basic", "bearer", "cookie"])
                                .default_value("none"),
                        )
                        .arg(arg!(--"login-url" <URL>).required(false).help("Login page (form auth)"))
                        .arg(arg!(--"username" <USER>).required(false))
                        .arg(arg!(--"password" <PASS>).required(false))
                        .arg(
                            arg!(--"username-selector" <CSS>)
                                .required(false)
                                .help("CSS selector of the username field (form auth)"),
                        )
                        .arg(
                            arg!(--"password-selector" <CSS>)
                                .required(false)
                                .help("CSS selector of the password field (form auth)"),
                        )
                        .arg(
                            arg!(--"submit-selector" <CSS>)
                                .required(false)
                                .help("CSS selector of the submit button (form auth)"),
                        )
                        .arg(arg!(--"token" <TOKEN>).required(false).help("Static bearer token"))
                        .arg(
                            arg!(--"login-api" <URL>)
                                .required(false)
                                .help("Endpoint that exchanges credentials for a bearer token"),
                        )
                        .arg(
                            arg!(--"token-path" <PATH>)
                                .required(false)
                                .help("Dotted path of the token in the login response (default: token)"),
                        )
                        .arg(arg!(--"cookie-name" <NAME>).required(false))
                        .arg(arg!(--"cookie-value" <VALUE>).required(false)),
                )
                .subcommand(command!("list").about("Lists all targets"))
                .subcommand(
                    command!("show")
                        .about("Shows a target with its scans and runs")
                        .arg(arg!(<ID>).value_parser(clap::value_parser!(i64))),
                )
                .subcommand(
                    command!("remove")
                        .about("Removes a target with all of its scans and runs")
                        .arg(arg!(<ID>).value_parser(clap::value_parser!(i64))),
                ),
        )
        .subcommand(
            command!("scan")
                .about("Discovers the pages, API endpoints and forms of a target")
                .arg(arg!(<TARGET>).help("Target ID").value_parser(clap::value_parser!(i64)))
                .arg(
                    arg!(--"max-depth" <DEPTH>)
                        .required(false)
                        .help("Link depth to crawl from the base URL")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"max-pages" <PAGES>)
                        .required(false)
                        .help("Stop crawling after this many pages")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"browser" <DRIVER>)
                        .required(false)
                        .help("Browser driver: static (HTTP only) or chrome")
                        .value_parser(["static", "chrome"])
                        .default_value("static"),
                )
                .arg(
                    arg!(--"no-spa")
                        .required(false)
                        .help("Skip clicking through navigation to find client-side routes")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("run")
                .about("Generates tests from a scan and runs them with Playwright")
                .arg(arg!(<TARGET>).help("Target ID").value_parser(clap::value_parser!(i64)))
                .arg(
                    arg!(-s --"scan" <SCAN_ID>)
                        .required(false)
                        .help("Scan to generate from (default: latest finished scan)")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    arg!(-t --"types" <TYPES>)
                        .required(false)
                        .help("Comma separated test types: pages, apis, forms, security, load")
                        .default_value("pages,apis,forms"),
                )
                .arg(
                    arg!(-p --"prompt" <PROMPT>)
                        .required(false)
                        .help("Describe extra tests in plain language (needs OPENAI_API_KEY)"),
                )
                .arg(
                    arg!(--"ai-only")
                        .required(false)
                        .help("Only run the tests generated from --prompt")
                        .action(clap::ArgAction::SetTrue)
                        .requires("prompt"),
                )
                .arg(
                    arg!(--"scout")
                        .required(false)
                        .help("Re-explore the live site before generating tests from --prompt")
                        .action(clap::ArgAction::SetTrue)
                        .requires("prompt"),
                )
                .arg(
                    arg!(-w --"workers" <NUM_WORKERS>)
                        .required(false)
                        .help("Parallel Playwright workers")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            command!("report")
                .about("Renders reports from stored scans and runs")
                .subcommand_required(true)
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .global(true)
                        .help("Report format: text, json")
                        .value_parser(["text", "txt", "json"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .global(true)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .subcommand(
                    command!("run")
                        .about("Results of a test run")
                        .arg(arg!(<ID>).value_parser(clap::value_parser!(i64))),
                )
                .subcommand(
                    command!("scan")
                        .about("Everything a scan discovered")
                        .arg(arg!(<ID>).value_parser(clap::value_parser!(i64))),
                )
                .subcommand(
                    command!("trends")
                        .about("Pass rate of every finished run of a target")
                        .arg(arg!(<TARGET>).value_parser(clap::value_parser!(i64))),
                ),
        )
        .subcommand(
            command!("plan")
                .about("Compiles a JSON test plan into a Playwright spec, or executes it directly")
                .arg(
                    arg!(<FILE>)
                        .help("JSON array of tests, each with a name and steps")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-u --"base-url" <URL>)
                        .required(true)
                        .help("Base URL the plan's paths resolve against")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Write the spec here (default: print it)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"execute")
                        .required(false)
                        .help("Run the plan in-process with the static browser instead of compiling it")
                        .action(clap::ArgAction::SetTrue)
                        .conflicts_with("output"),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_definition_is_consistent() {
        command_argument_builder().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let matches = command_argument_builder()
            .try_get_matches_from(["surveyor", "run", "3"])
            .unwrap();
        let (_, run) = matches.subcommand().unwrap();
        assert_eq!(run.get_one::<i64>("TARGET"), Some(&3));
        assert_eq!(
            run.get_one::<String>("types").map(String::as_str),
            Some("pages,apis,forms")
        );
        assert!(!run.get_flag("ai-only"));
    }

    #[test]
    fn test_ai_only_requires_prompt() {
        let result = command_argument_builder().try_get_matches_from(["surveyor", "run", "3", "--ai-only"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_report_format_is_global() {
        let matches = command_argument_builder()
            .try_get_matches_from(["surveyor", "report", "run", "7", "--format", "json"])
            .unwrap();
        let (_, report) = matches.subcommand().unwrap();
        let (_, run) = report.subcommand().unwrap();
        assert_eq!(run.get_one::<String>("format").map(String::as_str), Some("json"));
    }
}
