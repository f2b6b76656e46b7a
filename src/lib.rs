pub mod accounts;
pub mod activity;
pub mod block_router;
pub mod config;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod http;
pub mod http_client;
pub mod internal_api;
pub mod metrics;
pub mod model_output;
pub mod prompts;
pub mod providers;
pub mod report_pipeline;
pub mod report_usage;
pub mod reports_cache;
pub mod request_log;
pub mod retry;
pub mod supabase_auth;
pub mod telemetry;
pub mod time_range;
pub mod token_store;
