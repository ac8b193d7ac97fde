pub mod common;

mod cancel_semantics_test;
mod chat_store_test;
mod config_store_test;
mod extraction_scenario_test;
mod storage_test;
mod tree_run_store_test;
