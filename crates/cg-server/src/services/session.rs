//! Browser session validation.
//!
//! Browsers authenticate the upgrade with a signed session token carried in
//! a cookie (or a bearer header for non-browser tooling). When the tab is
//! viewing a specific app, the session must also grant access to that app.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::{AUTHORIZATION, HOST, ORIGIN};
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::db::{Store, PUBLIC_APP_EMAIL};
use cg_common::config::AuthConfig;
use cg_common::AppResult;

/// The identity behind a validated browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    /// `None` for external (non-member) users.
    pub user_id: Option<String>,
    pub company_id: Option<String>,
    pub email: String,
    pub is_external: bool,
}

#[async_trait]
pub trait SessionValidator: Send + Sync + 'static {
    /// Validate the session behind an upgrade request, scoped to the app the
    /// tab asked for. `Ok(None)` means "not allowed".
    async fn validate(
        &self,
        headers: &HeaderMap,
        app_route: Option<&str>,
        environment_id: Option<&str>,
    ) -> AppResult<Option<SessionUser>>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub company_id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub is_external: bool,
    pub exp: usize,
    pub iat: usize,
    pub jti: String,
}

/// HS256 session tokens, checked against the store for app access.
pub struct JwtSessionValidator {
    store: Arc<dyn Store>,
    key: DecodingKey,
    cookie_name: String,
    dev_mode: bool,
}

impl JwtSessionValidator {
    pub fn new(store: Arc<dyn Store>, config: &AuthConfig) -> Self {
        Self {
            store,
            key: DecodingKey::from_secret(config.session_secret.as_bytes()),
            cookie_name: config.session_cookie.clone(),
            dev_mode: config.dev_mode,
        }
    }

    /// The `Origin` must name the host the upgrade was sent to. Development
    /// servers run the client on a different port, so any origin passes there.
    fn origin_allowed(&self, headers: &HeaderMap) -> bool {
        let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
        let host = headers.get(HOST).and_then(|v| v.to_str().ok());

        match (origin, host) {
            (Some(_), Some(_)) if self.dev_mode => true,
            (Some(origin), Some(host)) => {
                let origin_host = origin
                    .split_once("://")
                    .map_or(origin, |(_, rest)| rest)
                    .trim_end_matches('/');
                origin_host.eq_ignore_ascii_case(host)
            }
            _ => false,
        }
    }

    fn token(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(cookie) = CookieJar::from_headers(headers).get(&self.cookie_name) {
            return Some(cookie.value().to_string());
        }

        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    }

    async fn can_access_app(
        &self,
        user: &SessionUser,
        app_route: &str,
        environment_id: &str,
    ) -> AppResult<bool> {
        let Some(environment) = self.store.environment_by_id(environment_id).await? else {
            return Ok(false);
        };

        // Members of the owning company see all of its apps.
        if !user.is_external && user.company_id.as_deref() == Some(environment.company_id.as_str())
        {
            return Ok(true);
        }

        let mut pending = vec![app_route.to_string()];
        let mut visited = HashSet::new();

        while let Some(route) = pending.pop() {
            if !visited.insert(route.clone()) {
                continue;
            }

            for row in self.store.app_users_by_route(environment_id, &route).await? {
                match row.inherited_route() {
                    Some(parent) => pending.push(parent.to_string()),
                    None if row.email == PUBLIC_APP_EMAIL => return Ok(true),
                    None if row.email.eq_ignore_ascii_case(&user.email) => return Ok(true),
                    None => {}
                }
            }
        }

        Ok(false)
    }
}

#[async_trait]
impl SessionValidator for JwtSessionValidator {
    async fn validate(
        &self,
        headers: &HeaderMap,
        app_route: Option<&str>,
        environment_id: Option<&str>,
    ) -> AppResult<Option<SessionUser>> {
        if !self.origin_allowed(headers) {
            tracing::debug!("Browser upgrade rejected: origin mismatch");
            return Ok(None);
        }

        let Some(token) = self.token(headers) else {
            return Ok(None);
        };

        let claims = match decode::<Claims>(&token, &self.key, &Validation::default()) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!("Session token validation failed: {}", e);
                return Ok(None);
            }
        };

        let user = SessionUser {
            user_id: (!claims.is_external).then(|| claims.sub.clone()),
            company_id: claims.company_id,
            email: claims.email,
            is_external: claims.is_external,
        };

        match (app_route, environment_id) {
            (None, None) => Ok(Some(user)),
            (Some(route), Some(env)) => {
                if self.can_access_app(&user, route, env).await? {
                    Ok(Some(user))
                } else {
                    Ok(None)
                }
            }
            // One without the other is never valid.
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::{inherit_permissions_email, AppUser, Environment, EnvironmentKind};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-session-secret";
    const ENV: &str = "aaaaaaaa-0000-0000-0000-000000000001";

    fn config(dev_mode: bool) -> AuthConfig {
        AuthConfig {
            session_secret: SECRET.into(),
            api_key_secret: "unused".into(),
            session_cookie: "cg_session".into(),
            dev_mode,
        }
    }

    fn token(sub: &str, company: Option<&str>, email: &str, is_external: bool) -> String {
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: sub.into(),
            company_id: company.map(str::to_string),
            email: email.into(),
            is_external,
            exp: now + 3600,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn headers(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(HOST, "app.example.com".parse().unwrap());
        h.insert(ORIGIN, "https://app.example.com".parse().unwrap());
        h.insert(
            axum::http::header::COOKIE,
            format!("other=1; cg_session={token}").parse().unwrap(),
        );
        h
    }

    fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_environment(
            Environment {
                id: ENV.into(),
                company_id: "company-1".into(),
                name: "prod".into(),
                kind: EnvironmentKind::Production,
            },
            "hash",
        );
        store
    }

    fn app_user(email: &str, route: &str) -> AppUser {
        AppUser {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: "company-1".into(),
            email: email.into(),
            environment_id: ENV.into(),
            app_route: route.into(),
        }
    }

    #[tokio::test]
    async fn accepts_member_on_home_view() {
        let v = JwtSessionValidator::new(store(), &config(false));
        let user = v
            .validate(&headers(&token("u1", Some("company-1"), "a@x.com", false)), None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.user_id.as_deref(), Some("u1"));
        assert_eq!(user.company_id.as_deref(), Some("company-1"));
    }

    #[tokio::test]
    async fn rejects_foreign_origin_and_bad_tokens() {
        let v = JwtSessionValidator::new(store(), &config(false));

        let mut h = headers(&token("u1", Some("company-1"), "a@x.com", false));
        h.insert(ORIGIN, "https://evil.example.com".parse().unwrap());
        assert!(v.validate(&h, None, None).await.unwrap().is_none());

        assert!(v.validate(&headers("not-a-jwt"), None, None).await.unwrap().is_none());

        let mut no_cookie = headers("x");
        no_cookie.remove(axum::http::header::COOKIE);
        assert!(v.validate(&no_cookie, None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dev_mode_accepts_any_origin() {
        let v = JwtSessionValidator::new(store(), &config(true));
        let mut h = headers(&token("u1", Some("company-1"), "a@x.com", false));
        h.insert(ORIGIN, "http://localhost:5173".parse().unwrap());
        assert!(v.validate(&h, None, None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn app_scope_requires_both_route_and_environment() {
        let v = JwtSessionValidator::new(store(), &config(false));
        let h = headers(&token("u1", Some("company-1"), "a@x.com", false));
        assert!(v.validate(&h, Some("orders"), None).await.unwrap().is_none());
        assert!(v.validate(&h, None, Some(ENV)).await.unwrap().is_none());
        assert!(v.validate(&h, Some("orders"), Some(ENV)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn member_of_other_company_is_rejected() {
        let v = JwtSessionValidator::new(store(), &config(false));
        let h = headers(&token("u2", Some("company-2"), "b@x.com", false));
        assert!(v.validate(&h, Some("orders"), Some(ENV)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn external_user_follows_inherited_permissions() {
        let store = store();
        store.insert_app_user(app_user("guest@y.com", "parent"));
        store.insert_app_user(app_user(&inherit_permissions_email("parent"), "child"));
        // A cycle must terminate.
        store.insert_app_user(app_user(&inherit_permissions_email("child"), "parent"));

        let v = JwtSessionValidator::new(store, &config(false));
        let h = headers(&token("ext", None, "guest@y.com", true));

        let user = v
            .validate(&h, Some("child"), Some(ENV))
            .await
            .unwrap()
            .unwrap();
        assert!(user.is_external);
        assert_eq!(user.user_id, None);

        let stranger = headers(&token("ext", None, "nobody@y.com", true));
        assert!(v
            .validate(&stranger, Some("child"), Some(ENV))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn public_apps_admit_anyone() {
        let store = store();
        store.insert_app_user(app_user(PUBLIC_APP_EMAIL, "status"));
        let v = JwtSessionValidator::new(store, &config(false));
        let h = headers(&token("ext", None, "anyone@z.com", true));
        assert!(v.validate(&h, Some("status"), Some(ENV)).await.unwrap().is_some());
    }
}
