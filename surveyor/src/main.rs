use colored::Colorize;
use commands::command_argument_builder;
use surveyor::handlers::*;
use surveyor_core::print_banner;
use tracing_subscriber::EnvFilter;

mod commands;

fn init_logging(verbose: bool) {
    let default = if verbose {
        "surveyor=debug,surveyor_core=debug,surveyor_scanner=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    init_logging(chosen_command.get_flag("verbose"));

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    let settings = settings_from_matches(&chosen_command);
    let outcome = match chosen_command.subcommand() {
        // No subcommand provided, just show the banner
        None => return,
        Some(("init", primary_command)) => handle_init(primary_command, &settings),
        Some(("target", primary_command)) => match primary_command.subcommand() {
            Some(("add", secondary_command)) => handle_target_add(secondary_command, &settings),
            Some(("list", _)) => handle_target_list(&settings),
            Some(("show", secondary_command)) => handle_target_show(secondary_command, &settings),
            Some(("remove", secondary_command)) => {
                handle_target_remove(secondary_command, &settings)
            }
            _ => unreachable!("clap should ensure we don't get here"),
        },
        Some(("scan", primary_command)) => handle_scan(primary_command, &settings).await,
        Some(("run", primary_command)) => handle_run(primary_command, &settings).await,
        Some(("report", primary_command)) => handle_report(primary_command, &settings),
        Some(("plan", primary_command)) => handle_plan(primary_command).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = outcome {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
