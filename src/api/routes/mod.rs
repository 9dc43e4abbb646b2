pub mod status;
pub mod trades;

use serde::Serialize;

/// Error response body shared by all routes
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
