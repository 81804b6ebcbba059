pub mod autofix_tests;
pub mod config_tests;
pub mod engine_tests;
pub mod rules_tests;
