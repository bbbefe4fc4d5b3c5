//! Authentication challenge delegation.
//!
//! A fetch never decides about credentials itself. When a server answers 401
//! with a `WWW-Authenticate` challenge, the fetch asks its
//! [`AuthenticationDelegate`], if one is configured. Without a delegate every
//! challenge is refused and the 401 response is treated as final.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::WWW_AUTHENTICATE;

use super::request::ResponseHead;

/// Authentication scheme named by a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// HTTP Basic.
    Basic,
    /// Bearer tokens.
    Bearer,
    /// HTTP Digest.
    Digest,
    /// Any other scheme, lower-cased.
    Other(String),
}

impl AuthScheme {
    fn parse(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "basic" => Self::Basic,
            "bearer" => Self::Bearer,
            "digest" => Self::Digest,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Host, port, scheme and realm a challenge applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionSpace {
    /// Host of the challenging server.
    pub host: String,
    /// Port of the challenging server.
    pub port: Option<u16>,
    /// Authentication scheme requested.
    pub scheme: AuthScheme,
    /// Realm, when the challenge declares one.
    pub realm: Option<String>,
}

impl ProtectionSpace {
    /// Builds the protection space of a 401 response, if it carries a challenge.
    #[must_use]
    pub fn from_response(response: &ResponseHead) -> Option<Self> {
        let header = response
            .headers()
            .get(WWW_AUTHENTICATE)?
            .to_str()
            .ok()?
            .trim();
        let scheme = header.split_whitespace().next()?;
        Some(Self {
            host: response.url().host_str().unwrap_or_default().to_string(),
            port: response.url().port_or_known_default(),
            scheme: AuthScheme::parse(scheme),
            realm: parse_realm(header),
        })
    }
}

fn parse_realm(header: &str) -> Option<String> {
    let lower = header.to_ascii_lowercase();
    let start = lower.find("realm=")? + "realm=".len();
    let rest = &header[start..];
    let realm = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next()?
    } else {
        rest.split([',', ' ']).next()?
    };
    Some(realm.to_string())
}

/// A challenge presented to the delegate.
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    /// Where the challenge applies.
    pub space: ProtectionSpace,
    /// How many credentials this fetch already had rejected.
    pub previous_failure_count: u32,
    /// The 401 response that carried the challenge.
    pub failure_response: ResponseHead,
}

/// Credentials a delegate can answer with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Username and optional password for HTTP Basic.
    Basic {
        /// The username.
        username: String,
        /// The password, if any.
        password: Option<String>,
    },
    /// A bearer token.
    Bearer {
        /// The token.
        token: String,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

impl Credential {
    pub(crate) fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Basic { username, password } => builder.basic_auth(username, password.as_ref()),
            Self::Bearer { token } => builder.bearer_auth(token),
        }
    }
}

/// How a delegate resolves a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeDisposition {
    /// Repeat the request with this credential.
    UseCredential(Credential),
    /// Accept the 401 response as final.
    ContinueWithoutCredential,
    /// Abandon the challenge; the 401 response is final.
    Cancel,
}

/// Capability that answers authentication challenges for a fetch.
///
/// Both calls run on the fetch's execution context. If the fetch is
/// cancelled while [`handle_challenge`](Self::handle_challenge) is pending,
/// that future is dropped.
#[async_trait]
pub trait AuthenticationDelegate: Send + Sync {
    /// Returns true if this delegate can answer challenges for `space`.
    fn can_authenticate(&self, space: &ProtectionSpace) -> bool;

    /// Resolves a challenge.
    async fn handle_challenge(&self, challenge: &AuthChallenge) -> ChallengeDisposition;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::StatusCode;
    use reqwest::header::{HeaderMap, HeaderValue};
    use url::Url;

    use super::*;

    fn unauthorized(challenge: &str) -> ResponseHead {
        let mut headers = HeaderMap::new();
        headers.insert(WWW_AUTHENTICATE, HeaderValue::from_str(challenge).unwrap());
        ResponseHead::new(
            StatusCode::UNAUTHORIZED,
            Url::parse("https://media.example.com/v/1").unwrap(),
            headers,
        )
    }

    #[test]
    fn test_protection_space_from_basic_challenge() {
        let space = ProtectionSpace::from_response(&unauthorized(r#"Basic realm="Members Only""#))
            .unwrap();
        assert_eq!(space.scheme, AuthScheme::Basic);
        assert_eq!(space.realm.as_deref(), Some("Members Only"));
        assert_eq!(space.host, "media.example.com");
        assert_eq!(space.port, Some(443));
    }

    #[test]
    fn test_protection_space_unquoted_realm_and_other_scheme() {
        let space =
            ProtectionSpace::from_response(&unauthorized("Negotiate realm=corp, x=1")).unwrap();
        assert_eq!(space.scheme, AuthScheme::Other("negotiate".to_string()));
        assert_eq!(space.realm.as_deref(), Some("corp"));
    }

    #[test]
    fn test_no_challenge_header_means_no_protection_space() {
        let response = ResponseHead::new(
            StatusCode::UNAUTHORIZED,
            Url::parse("https://media.example.com/").unwrap(),
            HeaderMap::new(),
        );
        assert!(ProtectionSpace::from_response(&response).is_none());
    }

    #[test]
    fn test_credential_debug_redacts_secrets() {
        let basic = Credential::Basic {
            username: "viewer".to_string(),
            password: Some("hunter2".to_string()),
        };
        let bearer = Credential::Bearer {
            token: "tok-123".to_string(),
        };
        let rendered = format!("{basic:?} {bearer:?}");
        assert!(rendered.contains("viewer"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("tok-123"));
    }
}
