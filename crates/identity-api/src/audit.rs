//! Security audit logging for session events
//!
//! Records logins, logouts, token rotation, refresh token reuse, and role
//! changes. All audit events are logged at INFO level (WARN for reuse) with
//! the "audit" target so they can be routed separately from application logs.
//!
//! # Example
//!
//! ```ignore
//! use identity_api::audit::{audit_log, AuditEvent};
//!
//! audit_log(&AuditEvent::Logout {
//!     user_id: identity.user_id,
//!     device_id: identity.device_id.clone(),
//!     ip_address: meta.ip_address.clone(),
//! });
//! ```
//!
//! Author: hephaex@gmail.com

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{info, warn};
use uuid::Uuid;

/// Security audit events for authentication and authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Successful login, a new session was opened
    LoginSuccess {
        user_id: Uuid,
        login: String,
        device_id: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed login attempt
    LoginFailure {
        login: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Session closed and access token revoked
    Logout {
        user_id: Uuid,
        device_id: String,
        ip_address: Option<String>,
    },

    /// Refresh token rotated into a new session
    TokenRefresh {
        user_id: String,
        previous_device_id: String,
        device_id: String,
        ip_address: Option<String>,
    },

    /// Refresh token presented that is no longer the live one
    RefreshTokenReuse {
        user_id: String,
        device_id: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Successful user registration
    RegistrationSuccess {
        user_id: Uuid,
        login: String,
        ip_address: Option<String>,
    },

    /// Failed registration attempt
    RegistrationFailure {
        login: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// Access denied due to a missing role
    AccessDenied {
        user_id: Uuid,
        login: String,
        resource: String,
        required_role: String,
    },

    /// Invalid, expired, or revoked token used
    InvalidToken {
        ip_address: Option<String>,
        user_agent: Option<String>,
        reason: String,
    },

    /// Role granted to a user
    RoleAssigned {
        actor_id: Uuid,
        user_id: Uuid,
        role: String,
    },

    /// Role taken from a user
    RoleRemoved {
        actor_id: Uuid,
        user_id: Uuid,
        role: String,
    },
}

/// Log a security audit event with structured fields
///
/// The event is serialized to JSON and attached as the `event` field, so
/// log aggregators receive the full record even for fields not lifted into
/// the tracing span.
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    match event {
        AuditEvent::LoginSuccess {
            user_id,
            login,
            device_id,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                login = %login,
                device_id = %device_id,
                ip_address = ?ip_address,
                "Login successful"
            );
        }
        AuditEvent::LoginFailure {
            login,
            reason,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                login = %login,
                reason = %reason,
                ip_address = ?ip_address,
                "Login failed"
            );
        }
        AuditEvent::Logout {
            user_id,
            device_id,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                device_id = %device_id,
                ip_address = ?ip_address,
                "User logout"
            );
        }
        AuditEvent::TokenRefresh {
            user_id,
            device_id,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                device_id = %device_id,
                ip_address = ?ip_address,
                "Token refresh"
            );
        }
        AuditEvent::RefreshTokenReuse {
            user_id,
            device_id,
            ip_address,
            ..
        } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                device_id = %device_id,
                ip_address = ?ip_address,
                "Refresh token reuse or revoked session"
            );
        }
        AuditEvent::RegistrationSuccess {
            user_id,
            login,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                login = %login,
                ip_address = ?ip_address,
                "Registration successful"
            );
        }
        AuditEvent::RegistrationFailure {
            login,
            reason,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                login = %login,
                reason = %reason,
                ip_address = ?ip_address,
                "Registration failed"
            );
        }
        AuditEvent::AccessDenied {
            user_id,
            resource,
            required_role,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                resource = %resource,
                required_role = %required_role,
                "Access denied"
            );
        }
        AuditEvent::InvalidToken {
            ip_address, reason, ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                ip_address = ?ip_address,
                reason = %reason,
                "Invalid token"
            );
        }
        AuditEvent::RoleAssigned {
            actor_id,
            user_id,
            role,
        }
        | AuditEvent::RoleRemoved {
            actor_id,
            user_id,
            role,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                actor_id = %actor_id,
                user_id = %user_id,
                role = %role,
                "Role membership changed"
            );
        }
    }
}

/// Extract IP address from request headers
///
/// Checks X-Forwarded-For, then X-Real-IP.
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            // first hop is the client
            if let Some(first_ip) = xff_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

/// Client metadata captured from a request for history and audit records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
