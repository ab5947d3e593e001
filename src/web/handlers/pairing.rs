use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::identity::CallerIdentity;
use crate::pairing::PairingError;
use crate::web::middleware::auth::CALLER_KEY;
use crate::web::web_state;

use super::render_error;

/// The boundary action surface as a sum type: each variant carries exactly
/// the fields its operation needs, so "valid action, missing field" is a
/// deserialization failure, not a runtime branch.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PairingAction {
    Request {
        mentor_uid: String,
        #[serde(default)]
        message: Option<String>,
    },
    Accept {
        pairing_id: String,
    },
    Decline {
        pairing_id: String,
        #[serde(default)]
        decline_reason: Option<String>,
    },
    End {
        pairing_id: String,
    },
}

fn over_limit(text: &Option<String>, max_len: usize) -> bool {
    text.as_ref()
        .is_some_and(|t| t.chars().count() > max_len)
}

/// Structural validation only; all business rules live in the coordinator.
fn validate_action(action: &PairingAction, max_message_len: usize) -> Result<(), String> {
    match action {
        PairingAction::Request {
            mentor_uid,
            message,
        } => {
            if mentor_uid.is_empty() {
                return Err("mentor_uid must not be empty".to_string());
            }
            if over_limit(message, max_message_len) {
                return Err(format!("message exceeds {max_message_len} characters"));
            }
        }
        PairingAction::Accept { pairing_id } | PairingAction::End { pairing_id } => {
            if pairing_id.is_empty() {
                return Err("pairing_id must not be empty".to_string());
            }
        }
        PairingAction::Decline {
            pairing_id,
            decline_reason,
        } => {
            if pairing_id.is_empty() {
                return Err("pairing_id must not be empty".to_string());
            }
            if over_limit(decline_reason, max_message_len) {
                return Err(format!("decline_reason exceeds {max_message_len} characters"));
            }
        }
    }
    Ok(())
}

fn failure_kind(err: &PairingError) -> (StatusCode, &'static str) {
    match err {
        PairingError::SelfPairing => (StatusCode::BAD_REQUEST, "invalid_request"),
        PairingError::MentorNotFound
        | PairingError::NotFound
        | PairingError::DirectoryNotFound => (StatusCode::NOT_FOUND, "not_found"),
        PairingError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        PairingError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
        PairingError::AtCapacity | PairingError::NoCapacity => {
            (StatusCode::CONFLICT, "at_capacity")
        }
        PairingError::DuplicatePairing => (StatusCode::CONFLICT, "duplicate_pairing"),
        PairingError::Transient => (StatusCode::SERVICE_UNAVAILABLE, "transient"),
        PairingError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

fn render_failure(res: &mut Response, err: &PairingError) {
    let (status, kind) = failure_kind(err);
    if let PairingError::Store(inner) = err {
        error!("pairing operation failed on storage: {}", inner);
        render_error(res, status, kind, "internal storage error");
    } else {
        render_error(res, status, kind, &err.to_string());
    }
}

#[handler]
pub async fn pairing_action(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(caller) = depot.get::<CallerIdentity>(CALLER_KEY).ok().cloned() else {
        render_error(
            res,
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "caller identity missing",
        );
        return;
    };

    let action: PairingAction = match req.parse_json().await {
        Ok(action) => action,
        Err(err) => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("malformed action body: {err}"),
            );
            return;
        }
    };

    if let Err(message) = validate_action(&action, web_state().config.limits.max_message_len) {
        render_error(res, StatusCode::BAD_REQUEST, "invalid_request", &message);
        return;
    }

    let core = web_state().core.clone();
    let outcome = match action {
        PairingAction::Request {
            mentor_uid,
            message,
        } => core
            .request(&mentor_uid, &caller, message)
            .await
            .map(|p| (StatusCode::CREATED, p)),
        PairingAction::Accept { pairing_id } => core
            .accept(&pairing_id, &caller.uid)
            .await
            .map(|p| (StatusCode::OK, p)),
        PairingAction::Decline {
            pairing_id,
            decline_reason,
        } => core
            .decline(&pairing_id, &caller.uid, decline_reason)
            .await
            .map(|p| (StatusCode::OK, p)),
        PairingAction::End { pairing_id } => core
            .end(&pairing_id, &caller.uid)
            .await
            .map(|p| (StatusCode::OK, p)),
    };

    match outcome {
        Ok((status, pairing)) => {
            res.status_code(status);
            res.render(Json(json!({
                "ok": true,
                "pairing_id": pairing.id,
                "status": pairing.status,
                "pairing": pairing,
            })));
        }
        Err(err) => render_failure(res, &err),
    }
}
