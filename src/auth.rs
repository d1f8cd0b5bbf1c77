use axum::{
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{config::AuthConfig, error::LedgerError};

/// Roles are ordered: each one can do everything the previous one can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Writer,
    Admin,
}

/// Authenticated caller identity, available to handlers via request extensions.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub name: String,
    pub role: Role,
}

impl CallerIdentity {
    pub fn require(&self, role: Role) -> Result<(), LedgerError> {
        if self.role >= role {
            Ok(())
        } else {
            tracing::warn!(caller = %self.name, role = ?self.role, required = ?role, "Insufficient role");
            Err(LedgerError::Forbidden(format!("{:?} role required", role).to_lowercase()))
        }
    }
}

#[derive(Serialize)]
struct AuthError {
    error: String,
    details: Option<String>,
}

pub async fn auth_middleware<B>(
    Extension(config): Extension<std::sync::Arc<AuthConfig>>,
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    if !config.enabled {
        req.extensions_mut().insert(CallerIdentity {
            name: "anonymous".to_string(),
            role: Role::Admin,
        });
        return next.run(req).await;
    }

    let api_key = req.headers()
        .get("X-API-Key")
        .or_else(|| req.headers().get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

    match api_key {
        Some(key) => {
            match config.api_keys.iter().find(|entry| {
                    entry.key.as_bytes().ct_eq(key.as_bytes()).into()
                }) {
                Some(entry) => {
                    tracing::debug!(caller = %entry.name, role = ?entry.role, "Authenticated request");
                    req.extensions_mut().insert(CallerIdentity {
                        name: entry.name.clone(),
                        role: entry.role,
                    });
                    next.run(req).await
                }
                None => {
                    tracing::warn!("Invalid API key presented");
                    (StatusCode::UNAUTHORIZED, Json(AuthError {
                        error: "Invalid API key".to_string(),
                        details: None,
                    })).into_response()
                }
            }
        }
        None => {
            (StatusCode::UNAUTHORIZED, Json(AuthError {
                error: "Missing API key".to_string(),
                details: Some("Provide X-API-Key header or Authorization: Bearer <key>".to_string()),
            })).into_response()
        }
    }
}
