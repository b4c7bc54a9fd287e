//! Shared response envelope for API handlers.
//!
//! Successful responses are the payload's fields plus `"success": true`,
//! the shape the browser client checks for.

use serde::Serialize;

/// `{ "success": true, ...T }` response envelope.
///
/// ```ignore
/// Ok(Json(Success::new(WorkflowList { workflows })))
/// ```
#[derive(Debug, Serialize)]
pub struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> Success<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
