use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use order_types::domain::caller::{Caller, Role};
use std::convert::Infallible;

use crate::errors::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Caller identity as forwarded by the gateway. Extraction never fails;
/// handlers decide what they require.
#[derive(Debug, Clone)]
pub struct Identity(pub Caller);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl Identity {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Identity(Caller {
            user_id: header(headers, USER_ID_HEADER).map(str::to_owned),
            role: Role::from_header(header(headers, USER_ROLE_HEADER)),
        })
    }

    pub fn require_user(&self) -> Result<&str, AppError> {
        self.0.user_id.as_deref().ok_or(AppError::Unauthenticated)
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.0.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin access required".into()))
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Identity::from_headers(&parts.headers))
    }
}

pub(crate) fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    header(headers, IDEMPOTENCY_KEY_HEADER).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_user_and_role() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u-7"));
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("ADMIN"));
        let id = Identity::from_headers(&headers);
        assert_eq!(id.require_user().unwrap(), "u-7");
        assert!(id.require_admin().is_ok());
    }

    #[test]
    fn blank_user_is_unauthenticated() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("admin"));
        let id = Identity::from_headers(&headers);
        assert!(matches!(id.require_user(), Err(AppError::Unauthenticated)));
        assert!(matches!(id.require_admin(), Err(AppError::Forbidden(_))));
    }

    #[test]
    fn idempotency_key_is_optional() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers), None);
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("checkout-1"));
        assert_eq!(idempotency_key(&headers).as_deref(), Some("checkout-1"));
    }
}
