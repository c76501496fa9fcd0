// Session-expiry hook

/// Notified when the refresh token is rejected and the session is over
///
/// Called after the credential store has been cleared, once per rejected
/// refresh.
pub trait SessionHandler: Send + Sync {
    fn on_session_expired(&self);
}

impl<F> SessionHandler for F
where
    F: Fn() + Send + Sync,
{
    fn on_session_expired(&self) {
        self()
    }
}

/// Ignores session expiry; callers inspect `ClientError::is_session_expired`
pub struct IgnoreSessionExpiry;

impl SessionHandler for IgnoreSessionExpiry {
    fn on_session_expired(&self) {}
}

/// Sends the user to the login entry point
pub struct LoginRedirect {
    login_url: String,
    navigate: Box<dyn Fn(&str) + Send + Sync>,
}

impl LoginRedirect {
    /// `navigate` performs the actual navigation to `login_url`
    pub fn new(login_url: impl Into<String>, navigate: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            login_url: login_url.into(),
            navigate: Box::new(navigate),
        }
    }

    pub fn login_url(&self) -> &str {
        &self.login_url
    }
}

impl SessionHandler for LoginRedirect {
    fn on_session_expired(&self) {
        tracing::info!(login_url = %self.login_url, "Session expired, redirecting to login");
        (self.navigate)(&self.login_url);
    }
}
