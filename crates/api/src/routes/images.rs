use axum::routing::get;
use axum::Router;

use crate::handlers::images;
use crate::state::AppState;

/// ```text
/// GET /images/{filename}?type=&subfolder=   -> proxy_image
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/images/{filename}", get(images::proxy_image))
}
