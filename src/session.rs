//! Explicit GitHub session context.
//!
//! A [`Session`] is created at login from an access token, handed to every
//! GitHub call, and stops working once [`Session::invalidate`] is called
//! (logout) or its expiry passes. There is no process-wide auth state.

use chrono::{DateTime, Duration, Utc};

use repolens_core::PipelineError;

use crate::config::Credentials;

#[derive(Clone)]
pub struct Session {
    token: String,
    login: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    invalidated: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("login", &self.login)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("invalidated", &self.invalidated)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            login: None,
            created_at: Utc::now(),
            expires_at: None,
            invalidated: false,
        }
    }

    /// Session for the `GITHUB_TOKEN` configured in the environment.
    pub fn from_credentials(creds: &Credentials) -> Result<Self, PipelineError> {
        Ok(Self::new(creds.github_token()?))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.created_at + ttl);
        self
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.invalidated && self.expires_at.map_or(true, |exp| now < exp)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// The access token, if the session is still usable.
    pub fn token(&self) -> Result<&str, PipelineError> {
        if self.invalidated {
            return Err(PipelineError::Config(
                "GitHub session was logged out; log in again".to_string(),
            ));
        }
        if !self.is_valid() {
            return Err(PipelineError::Config("GitHub session expired".to_string()));
        }
        Ok(&self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_valid() {
        let s = Session::new("ghp_abc").with_login("octocat");
        assert!(s.is_valid());
        assert_eq!(s.token().unwrap(), "ghp_abc");
        assert_eq!(s.login(), Some("octocat"));
    }

    #[test]
    fn test_invalidate() {
        let mut s = Session::new("ghp_abc");
        s.invalidate();
        assert!(!s.is_valid());
        assert!(matches!(s.token(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_expiry() {
        let s = Session::new("ghp_abc").with_ttl(Duration::minutes(5));
        assert!(s.is_valid_at(s.created_at() + Duration::minutes(4)));
        assert!(!s.is_valid_at(s.created_at() + Duration::minutes(5)));
    }

    #[test]
    fn test_from_credentials_requires_token() {
        assert!(Session::from_credentials(&Credentials::default()).is_err());
        let creds = Credentials {
            github_token: Some("ghp_env".into()),
            ..Default::default()
        };
        assert_eq!(Session::from_credentials(&creds).unwrap().token().unwrap(), "ghp_env");
    }

    #[test]
    fn test_debug_hides_token() {
        assert!(!format!("{:?}", Session::new("ghp_secret")).contains("ghp_secret"));
    }
}
