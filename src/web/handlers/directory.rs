use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;

use crate::db::DirectoryUpsert;
use crate::web::web_state;

use super::render_error;

#[derive(Debug, Deserialize)]
pub struct DirectoryUpsertBody {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mentor_kind: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub capacity: i32,
}

fn default_active() -> bool {
    true
}

#[handler]
pub async fn upsert_directory_entry(req: &mut Request, res: &mut Response) {
    let mentor_uid = match req.param::<String>("mentor_uid") {
        Some(v) if !v.is_empty() => v,
        _ => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "missing mentor_uid path parameter",
            );
            return;
        }
    };

    let body: DirectoryUpsertBody = match req.parse_json().await {
        Ok(body) => body,
        Err(err) => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("malformed directory entry: {err}"),
            );
            return;
        }
    };

    if body.capacity < 1 {
        render_error(
            res,
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "capacity must be a positive integer",
        );
        return;
    }

    let upsert = DirectoryUpsert {
        mentor_uid,
        display_name: body.display_name,
        mentor_kind: body.mentor_kind,
        active: body.active,
        capacity: body.capacity,
    };

    match web_state()
        .db_manager
        .directory_store()
        .upsert_entry(&upsert)
        .await
    {
        Ok(entry) => {
            res.render(Json(json!({ "ok": true, "entry": entry })));
        }
        Err(err) => {
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                &format!("database error: {}", err),
            );
        }
    }
}

#[handler]
pub async fn get_directory_entry(req: &mut Request, res: &mut Response) {
    let mentor_uid = match req.param::<String>("mentor_uid") {
        Some(v) if !v.is_empty() => v,
        _ => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "missing mentor_uid path parameter",
            );
            return;
        }
    };

    match web_state()
        .db_manager
        .directory_store()
        .get_entry(&mentor_uid)
        .await
    {
        Ok(Some(entry)) => {
            res.render(Json(json!({ "entry": entry })));
        }
        Ok(None) => {
            render_error(
                res,
                StatusCode::NOT_FOUND,
                "not_found",
                "directory entry not found",
            );
        }
        Err(err) => {
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                &format!("database error: {}", err),
            );
        }
    }
}

#[handler]
pub async fn list_directory(req: &mut Request, res: &mut Response) {
    let default_limit = web_state().config.limits.directory_page_size;
    let limit = req
        .query::<i64>("limit")
        .unwrap_or(default_limit)
        .clamp(1, 1000);
    let offset = req.query::<i64>("offset").unwrap_or(0).max(0);

    match web_state()
        .db_manager
        .directory_store()
        .list_entries(limit, offset)
        .await
    {
        Ok(entries) => {
            res.render(Json(json!({
                "entries": entries,
                "count": entries.len(),
                "limit": limit,
                "offset": offset,
            })));
        }
        Err(err) => {
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                &format!("database error: {}", err),
            );
        }
    }
}
