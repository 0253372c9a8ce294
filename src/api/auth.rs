//! Bearer token extractors backed by Zitadel introspection.

use crate::adapters::zitadel::validate_token;
use crate::api::AppState;
use crate::utils::error::AppError;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

/// A caller holding the project editor role.
#[derive(Debug, Clone)]
pub struct Editor;

/// Whether the caller is an editor. Never rejects.
#[derive(Debug, Clone, Copy)]
pub struct OptionalEditor {
    pub is_editor: bool,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

async fn check_editor(parts: &Parts, state: &AppState) -> Result<(), AppError> {
    let token = bearer_token(parts).ok_or_else(|| AppError::Unauthorized {
        message: "Not authenticated".to_string(),
    })?;
    let claims = state.auth.introspect(token).await?;
    validate_token(
        &claims,
        &state.project_id,
        std::slice::from_ref(&state.editor_role),
        chrono::Utc::now().timestamp(),
    )
}

#[async_trait]
impl FromRequestParts<AppState> for Editor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        check_editor(parts, state).await?;
        Ok(Editor)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for OptionalEditor {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if bearer_token(parts).is_none() {
            return Ok(OptionalEditor { is_editor: false });
        }
        let is_editor = match check_editor(parts, state).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Treating caller as anonymous: {}", e);
                false
            }
        };
        Ok(OptionalEditor { is_editor })
    }
}
