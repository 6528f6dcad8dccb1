//! Request authentication against the identity collaborator.
//!
//! Tokens are issued elsewhere; this module only extracts and resolves them.

pub mod middleware;

use crate::core::error::{Error, Result};
use crate::core::models::UserId;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

/// Authenticated caller, inserted into request extensions by the middleware.
#[derive(Clone, Debug)]
pub struct Ctx {
    user_id: UserId,
}

impl Ctx {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Ctx>()
            .cloned()
            .ok_or(Error::AuthFailCtxNotInRequestExt)
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(Error::AuthFailNoToken)?
        .to_str()
        .map_err(|_| Error::AuthFailTokenWrongFormat)?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(Error::AuthFailTokenWrongFormat)
}
