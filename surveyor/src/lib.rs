pub mod handlers;

// Re-export the helpers the binary and its tests share
pub use handlers::{
    InitOutcome, auth_from_args, compile_plan_file, init_data_dir, open_database,
    parse_test_types, progress_message, result_line, settings_from_matches,
};
