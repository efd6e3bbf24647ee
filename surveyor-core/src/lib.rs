use colored::Colorize;

pub mod ai;
pub mod auth;
pub mod classifier;
pub mod collector;
pub mod config;
pub mod db;
pub mod discovery;
pub mod error;
pub mod events;
pub mod generator;
pub mod model;
pub mod report;
pub mod run;
pub mod runner;
pub mod templates;

pub use config::Settings;
pub use db::Database;
pub use discovery::DiscoveryOrchestrator;
pub use error::{CoreError, ExecutionError, GenerationError, Result};
pub use events::{Channel, Event, EventBus, EventSink, NullSink};
pub use generator::{GeneratedFile, GenerationRequest, TestGenerator};
pub use run::{RunCoordinator, RunRequest};
pub use runner::{RunnerEvent, TestRunner};

pub fn print_banner() {
    let banner = r#"
   ___ _  _ _ ____   _____ _   _ ___
  / __| || | '_\ \ / / -_) |_| / _ \ '_|
  \__ \\_,_|_|  \_V /\___|\__, \___/_|
  |___/                    |___/
"#;
    println!("{}", banner.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "discover, generate, test".bright_black(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
}
