//! Google Workspace Admin Directory client.
//!
//! Authenticates as a service account (RS256 JWT assertion exchanged for an
//! OAuth2 access token) and lists group members, including members inherited
//! through nested groups.

use super::{GroupMembersFetcher, Member, sort_by_email};
use crate::error::PluginError;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use rust_common::{HttpConfig, PlatformError, build_http_client, read_json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};
use url::Url;

/// Read-only scope for group membership listing.
pub const DIRECTORY_MEMBER_SCOPE: &str =
    "https://www.googleapis.com/auth/admin.directory.group.member.readonly";

/// Public Admin SDK endpoint.
pub const DEFAULT_DIRECTORY_URL: &str = "https://admin.googleapis.com";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Upper bound on how long an access token is reused.
const MAX_TOKEN_LIFETIME_SECS: u64 = 3600;
/// Tokens are refreshed this long before Google would reject them.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Fields of a service account JSON key used by this client.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Service account email, the assertion issuer
    pub client_email: String,
    /// PEM-encoded RSA private key
    pub private_key: String,
    /// Key identifier placed in the assertion header
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// OAuth2 token endpoint
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Parses a service account key from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns a credential error if the JSON is malformed or lacks the
    /// client email or private key.
    pub fn from_json(raw: &[u8]) -> Result<Self, PluginError> {
        let key: Self = serde_json::from_slice(raw)
            .map_err(|e| PluginError::credentials(format!("malformed service account key: {e}")))?;
        if key.client_email.is_empty() {
            return Err(PluginError::credentials("service account key has no client_email"));
        }
        if key.private_key.is_empty() {
            return Err(PluginError::credentials("service account key has no private_key"));
        }
        Ok(key)
    }

    /// Reads and parses a service account key file.
    ///
    /// # Errors
    ///
    /// Returns a credential error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        debug!(path = %path.display(), "read service account file");
        let raw = std::fs::read(path).map_err(|e| {
            PluginError::credentials(format!(
                "failed to read service account file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersPage {
    #[serde(default)]
    members: Vec<Member>,
    #[serde(default)]
    next_page_token: Option<String>,
}

struct AccessToken {
    value: String,
    refresh_after: Instant,
}

/// Directory client backed by the Google Admin SDK.
pub struct GoogleDirectory {
    client: Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    directory_url: Url,
    token: Mutex<Option<AccessToken>>,
}

impl GoogleDirectory {
    /// Creates a client for the given service account and API endpoint.
    ///
    /// # Errors
    ///
    /// Returns a credential error if the private key is not a valid RSA PEM
    /// key, or a platform error if the HTTP client cannot be built.
    pub fn new(
        key: ServiceAccountKey,
        directory_url: Url,
        http: &HttpConfig,
    ) -> Result<Self, PluginError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            PluginError::credentials(format!(
                "invalid private key for service account {}: {e}",
                key.client_email
            ))
        })?;
        let client = build_http_client(http)?;

        Ok(Self {
            client,
            key,
            encoding_key,
            directory_url,
            token: Mutex::new(None),
        })
    }

    /// Service account email this client authenticates as.
    #[must_use]
    pub fn service_account(&self) -> &str {
        &self.key.client_email
    }

    fn sign_assertion(&self) -> Result<String, PluginError> {
        let iat = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: DIRECTORY_MEMBER_SCOPE,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.key.private_key_id);

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| PluginError::credentials(format!("failed to sign assertion: {e}")))
    }

    /// Returns a valid access token, exchanging a fresh assertion when needed.
    async fn access_token(&self) -> Result<String, PluginError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.refresh_after {
                return Ok(token.value.clone());
            }
        }

        debug!(service_account = %self.key.client_email, "exchange service account assertion");
        let assertion = self.sign_assertion()?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(PlatformError::from)?;
        let token: TokenResponse = read_json(response).await?;

        let lifetime_secs = token
            .expires_in
            .map_or(MAX_TOKEN_LIFETIME_SECS, |secs| secs.min(MAX_TOKEN_LIFETIME_SECS));
        let lifetime = Duration::from_secs(lifetime_secs);
        let refresh_after = Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN);
        *guard = Some(AccessToken {
            value: token.access_token.clone(),
            refresh_after,
        });

        Ok(token.access_token)
    }

    fn members_url(&self, group_email: &str) -> Result<Url, PlatformError> {
        let mut url = self.directory_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                PlatformError::invalid_input(format!(
                    "directory url {} cannot carry a path",
                    self.directory_url
                ))
            })?
            .pop_if_empty()
            .extend(["admin", "directory", "v1", "groups", group_email, "members"]);
        Ok(url)
    }

    async fn list_members(&self, group_email: &str) -> Result<Vec<Member>, PluginError> {
        let url = self.members_url(group_email)?;
        let mut set = BTreeMap::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.access_token().await?;
            let mut request = self
                .client
                .get(url.clone())
                .bearer_auth(token)
                .query(&[("includeDerivedMembership", "true")]);
            if let Some(page) = page_token.as_deref() {
                request = request.query(&[("pageToken", page)]);
            }

            let response = request.send().await.map_err(PlatformError::from)?;
            let page: MembersPage = read_json(response).await?;
            for member in page.members {
                set.insert(member.email.clone(), member);
            }

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        let mut members: Vec<Member> = set.into_values().collect();
        sort_by_email(&mut members);
        Ok(members)
    }
}

#[async_trait]
impl GroupMembersFetcher for GoogleDirectory {
    #[instrument(skip(self), fields(service_account = %self.key.client_email))]
    async fn group_members(&self, group_email: &str) -> Result<Vec<Member>, PluginError> {
        debug!(group = %group_email, "fetch group's members");

        match self.list_members(group_email).await {
            Ok(members) => {
                info!(group = %group_email, members_count = members.len(), "fetch group's members completed");
                Ok(members)
            }
            Err(err) => {
                error!(
                    group = %group_email,
                    retryable = err.is_retryable(),
                    error = %err,
                    "failed to fetch group's members"
                );
                match err {
                    PluginError::Platform(source) => Err(PluginError::Directory {
                        group: group_email.to_string(),
                        source,
                    }),
                    other => Err(other),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_requires_client_email() {
        let raw = br#"{"client_email": "", "private_key": "pem"}"#;
        let err = ServiceAccountKey::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("client_email"));
    }

    #[test]
    fn test_key_requires_private_key() {
        let raw = br#"{"client_email": "sa@project.iam.gserviceaccount.com"}"#;
        assert!(ServiceAccountKey::from_json(raw).is_err());
    }

    #[test]
    fn test_key_defaults_token_uri() {
        let raw = br#"{
            "type": "service_account",
            "client_email": "sa@project.iam.gserviceaccount.com",
            "private_key": "pem"
        }"#;
        let key = ServiceAccountKey::from_json(raw).unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
        assert!(key.private_key_id.is_none());
    }

    #[test]
    fn test_debug_hides_private_key() {
        let raw = br#"{"client_email": "sa@x.iam.gserviceaccount.com", "private_key": "SECRET-PEM"}"#;
        let key = ServiceAccountKey::from_json(raw).unwrap();
        assert!(!format!("{key:?}").contains("SECRET-PEM"));
    }

    #[test]
    fn test_invalid_pem_rejected() {
        let raw = br#"{"client_email": "sa@x.iam.gserviceaccount.com", "private_key": "not a pem"}"#;
        let key = ServiceAccountKey::from_json(raw).unwrap();
        let url = Url::parse(DEFAULT_DIRECTORY_URL).unwrap();
        let result = GoogleDirectory::new(key, url, &HttpConfig::default());
        assert!(matches!(result, Err(PluginError::Credentials { .. })));
    }
}
