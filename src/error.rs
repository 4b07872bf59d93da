//! crate error types

use snafu::prelude::*;

use super::api::Error as ApiError;

/// crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// crate error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Create the endpoint-discovery api client failed
    #[snafu(display("create discovery api client failed: {source}"))]
    CreateApiClient {
        /// source error
        source: ApiError,
    },
}
