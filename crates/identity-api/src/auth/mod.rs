//! Authentication and authorization module
//!
//! This module provides the session and token lifecycle:
//! - Token signing and verification (access and refresh)
//! - Session registry for live refresh tokens and revoked access tokens
//! - Password hashing with Argon2
//! - Authentication service for register, login, refresh, and logout
//! - Guard and middleware for resolving access tokens on requests

pub mod guard;
pub mod jwt;
pub mod middleware;
pub mod password;
#[cfg(feature = "redis")]
pub mod redis_registry;
pub mod registry;
pub mod service;

pub use guard::{require_role, AuthGuard, Identity};
pub use jwt::{Claims, JwtError, TokenPair, TokenSigner, TokenType};
pub use middleware::{auth_middleware, bearer_token, AuthError, BearerToken};
pub use password::{hash_password, hash_password_with_config, verify_password, PasswordConfig};
#[cfg(feature = "redis")]
pub use redis_registry::RedisSessionRegistry;
pub use registry::{InMemorySessionRegistry, RegistryError, SessionRegistry};
pub use service::{AuthService, LoginRequest, RegisterRequest, TokenResponse};
