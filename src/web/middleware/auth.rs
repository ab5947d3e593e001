use salvo::prelude::*;
use tracing::warn;

use crate::web::handlers::{
    directory::{get_directory_entry, list_directory, upsert_directory_entry},
    health::{get_status, health_check},
    pairing::pairing_action,
    render_error,
};
use crate::web::web_state;

pub const CALLER_KEY: &str = "caller";

pub fn create_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("status").get(get_status))
        .push(
            Router::with_path("pairings/actions")
                .hoop(require_caller)
                .post(pairing_action),
        )
        .push(
            Router::with_path("admin").hoop(require_admin).push(
                Router::with_path("directory")
                    .get(list_directory)
                    .push(
                        Router::with_path("{mentor_uid}")
                            .get(get_directory_entry)
                            .put(upsert_directory_entry),
                    ),
            ),
        )
}

pub(crate) fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?;
    let token = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Resolves the caller through the identity verifier. Fails closed: any
/// verification error ends the request as unauthorized.
#[handler]
pub async fn require_caller(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
    ctrl: &mut FlowCtrl,
) {
    let header = req.header::<String>("authorization");
    let Some(token) = bearer_token(header.as_deref()) else {
        render_error(
            res,
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing bearer credential",
        );
        ctrl.skip_rest();
        return;
    };

    match web_state().verifier.verify(token).await {
        Ok(identity) => {
            depot.insert(CALLER_KEY, identity);
        }
        Err(err) => {
            warn!("credential verification failed: {}", err);
            render_error(
                res,
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "credential could not be verified",
            );
            ctrl.skip_rest();
        }
    }
}

/// Guards the admin directory surface with the configured admin token.
/// Rejects everything when no token is configured.
#[handler]
pub async fn require_admin(req: &mut Request, res: &mut Response, ctrl: &mut FlowCtrl) {
    let header = req.header::<String>("authorization");
    let presented = bearer_token(header.as_deref());
    let expected = web_state().config.server.admin_token.as_deref();

    let authorized = matches!((presented, expected), (Some(p), Some(e)) if p == e);
    if !authorized {
        render_error(
            res,
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "admin credential required",
        );
        ctrl.skip_rest();
    }
}

#[cfg(test)]
mod tests {
    use super::bearer_token;

    #[test]
    fn bearer_token_strips_the_scheme() {
        assert_eq!(bearer_token(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(bearer_token(Some("bearer abc123")), Some("abc123"));
    }

    #[test]
    fn bearer_token_rejects_missing_or_malformed_headers() {
        assert_eq!(bearer_token(None), None);
        assert_eq!(bearer_token(Some("abc123")), None);
        assert_eq!(bearer_token(Some("Basic abc123")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
    }
}
