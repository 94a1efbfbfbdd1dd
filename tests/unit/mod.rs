//! Unit tests for individual components

#[cfg(feature = "tokio-runtime")]
mod api_test;
mod audit_test;
mod builders_test;
mod config_test;
mod error_test;
#[cfg(feature = "tokio-runtime")]
mod runtime_test;
mod util_test;
