use crate::core::auth::{bearer_token, Ctx};
use crate::core::config::AppState;
use crate::core::error::{Error, Result};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

pub async fn mw_require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    debug!("MIDDLEWARE: require_auth");

    let token = bearer_token(req.headers())?.to_string();

    let user_id = state
        .identity
        .verify_connection_credential(&token)
        .await
        .map_err(|e| {
            warn!("[Auth] Rejected request: {}", e);
            Error::from(e)
        })?;

    req.extensions_mut().insert(Ctx::new(user_id));

    Ok(next.run(req).await)
}
