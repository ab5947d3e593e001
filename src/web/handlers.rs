use salvo::prelude::*;
use serde_json::json;

pub mod directory;
pub mod health;
pub mod pairing;

/// Every failure carries a stable machine-checkable kind next to the
/// human-readable message so clients can react specifically.
pub(crate) fn render_error(res: &mut Response, status: StatusCode, kind: &str, message: &str) {
    res.status_code(status);
    res.render(Json(json!({
        "error": { "kind": kind, "message": message }
    })));
}
