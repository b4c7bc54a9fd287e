pub mod execute;
pub mod images;
pub mod sessions;
pub mod workflows;

use relay_core::error::CoreError;
use relay_core::types::SessionId;

use crate::error::AppError;

/// Parse a session id from a path or form value. Unparseable ids are
/// reported the same way as unknown ones.
pub(crate) fn parse_session_id(raw: &str) -> Result<SessionId, AppError> {
    raw.parse().map_err(|_| {
        AppError::Core(CoreError::NotFound {
            entity: "Session",
            id: raw.to_string(),
        })
    })
}
