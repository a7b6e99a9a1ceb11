//! Frontend URLs embedded in notification bodies.

use url::Url;

use crate::dispatch::{NotifyError, NotifyResult};

/// Links sent with a "request received" message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeLinks {
    pub signup: String,
    pub login: String,
    /// Only present when a link token was issued for the request
    pub link_appointment: Option<String>,
}

/// Builds absolute URLs under the frontend base URL.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base: Url,
}

impl LinkBuilder {
    /// Create a builder; the base must be an absolute http(s) URL.
    pub fn new(base: &str) -> NotifyResult<Self> {
        let trimmed = base.trim().trim_end_matches('/');
        let base = Url::parse(&format!("{}/", trimmed))?;

        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(NotifyError::UnsupportedScheme(base.scheme().to_string()));
        }

        Ok(Self { base })
    }

    /// Join `path` onto the base (keeping any base path prefix) and append query params.
    pub fn build(&self, path: &str, params: &[(&str, &str)]) -> NotifyResult<String> {
        let mut url = self.base.join(path.trim_start_matches('/'))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    pub fn login(&self) -> NotifyResult<String> {
        self.build("/login", &[])
    }

    /// Signup, login and (optionally) token-link URLs for an intake submission.
    pub fn intake_links(&self, email: &str, link_token: Option<&str>) -> NotifyResult<IntakeLinks> {
        let link_appointment = match link_token {
            Some(token) => Some(self.build("/link-appointment", &[("token", token)])?),
            None => None,
        };

        Ok(IntakeLinks {
            signup: self.build("/signup", &[("email", email)])?,
            login: self.login()?,
            link_appointment,
        })
    }
}
