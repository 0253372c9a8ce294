//! Zitadel OAuth2 token introspection (RFC 7662).

use crate::config::ZitadelConfig;
use crate::domain::ports::TokenIntrospector;
use crate::utils::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

fn revoked() -> AppError {
    AppError::Unauthorized {
        message: "invalid_token_revoked: Token was revoked.".to_string(),
    }
}

fn roles_claim(project_id: &str) -> String {
    format!("urn:zitadel:iam:org:project:{project_id}:roles")
}

/// True when the token's project roles satisfy one of `scopes`. Each entry
/// is a space separated set of roles that must all be present.
pub fn match_token_scopes(claims: &Value, project_id: &str, scopes: &[String]) -> bool {
    if scopes.is_empty() {
        return true;
    }
    let Some(roles) = claims.get(roles_claim(project_id)).and_then(Value::as_object) else {
        return false;
    };
    scopes.iter().any(|and_scopes| {
        and_scopes
            .split_whitespace()
            .all(|role| roles.contains_key(role))
    })
}

/// Checks an introspection response: revoked, then expired, then roles.
pub fn validate_token(claims: &Value, project_id: &str, scopes: &[String], now: i64) -> Result<()> {
    let active = claims.get("active").and_then(Value::as_bool).unwrap_or(false);
    if claims.is_null() || !active {
        return Err(revoked());
    }

    let exp = claims.get("exp").and_then(Value::as_i64).unwrap_or(0);
    if exp < now {
        return Err(AppError::Unauthorized {
            message: "invalid_token_expired: Token has expired.".to_string(),
        });
    }

    if !match_token_scopes(claims, project_id, scopes) {
        return Err(AppError::Forbidden {
            message: format!(
                "insufficient_scope: Token has insufficient scope. Route requires: {scopes:?}"
            ),
        });
    }

    if claims.get("sub").and_then(Value::as_str).is_none() {
        return Err(AppError::Unauthorized {
            message: "Could not validate credentials".to_string(),
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct ZitadelClient {
    client: Client,
    config: ZitadelConfig,
}

impl ZitadelClient {
    pub fn new(config: ZitadelConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    pub async fn introspect_token(&self, token: &str) -> Result<Value> {
        let url = format!("{}/oauth/v2/introspect", self.config.domain);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("token", token),
                ("token_type_hint", "access_token"),
                ("scope", "openid"),
            ])
            .send()
            .await
            .map_err(|e| AppError::AuthServiceError {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AppError::AuthServiceError {
                message: format!("Introspection returned {}", response.status()),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TokenIntrospector for ZitadelClient {
    async fn introspect(&self, token: &str) -> Result<Value> {
        self.introspect_token(token).await
    }
}
