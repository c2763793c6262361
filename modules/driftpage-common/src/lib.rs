pub mod config;
pub mod doc;
pub mod error;
pub mod extract;
pub mod sanitize;
pub mod signature;

pub use config::Config;
pub use doc::*;
pub use error::DriftpageError;
pub use signature::signature_for_doc;

/// Seconds since the Unix epoch, as an i64.
pub fn epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}
