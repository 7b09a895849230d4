pub mod activity;
pub mod app_context;
pub mod app_state;
pub mod errors;
pub mod shutdown;
pub mod tls;
