//! Authorization request handed over by opkssh through the environment.

use crate::error::PluginError;
use std::collections::HashMap;
use std::ffi::OsString;
use tracing::debug;

/// Local account being logged into.
pub const ENV_PRINCIPAL: &str = "OPKSSH_PLUGIN_U";
/// Email claim of the identity token.
pub const ENV_EMAIL: &str = "OPKSSH_PLUGIN_EMAIL";
/// `email_verified` claim of the identity token.
pub const ENV_EMAIL_VERIFIED: &str = "OPKSSH_PLUGIN_EMAIL_VERIFIED";
/// Audience (OAuth client id) of the identity token.
pub const ENV_CLIENT_ID: &str = "OPKSSH_PLUGIN_AUD";

/// One authorization request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Local account name
    pub principal: String,
    /// Identity email
    pub email: String,
    /// Whether the identity provider verified the email
    pub email_verified: bool,
    /// Audience of the identity token
    pub client_id: String,
}

impl Request {
    /// Reads the request from the process environment. Only the plugin
    /// variables are looked up, so unrelated entries are never decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if a plugin variable is not valid UTF-8 or
    /// `OPKSSH_PLUGIN_EMAIL_VERIFIED` is not a boolean.
    pub fn from_env() -> Result<Self, PluginError> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// Reads the request from the given variables. Missing variables default
    /// to empty strings and `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if `OPKSSH_PLUGIN_EMAIL_VERIFIED` is not a boolean.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, PluginError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_lookup(|name| vars.remove(name).map(OsString::from))
    }

    /// Reads the request through `lookup`, which returns the raw value of a
    /// variable or `None` when it is unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a plugin variable is not valid UTF-8 or
    /// `OPKSSH_PLUGIN_EMAIL_VERIFIED` is not a boolean.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, PluginError>
    where
        F: FnMut(&str) -> Option<OsString>,
    {
        debug!("load request");
        let mut take = |name: &str| -> Result<String, PluginError> {
            lookup(name).map_or_else(
                || Ok(String::new()),
                |raw| {
                    raw.into_string().map_err(|raw| PluginError::InvalidRequest {
                        name: name.to_string(),
                        reason: format!("{raw:?} is not valid UTF-8"),
                    })
                },
            )
        };

        let principal = take(ENV_PRINCIPAL)?;
        let email = take(ENV_EMAIL)?;
        let client_id = take(ENV_CLIENT_ID)?;
        let verified = take(ENV_EMAIL_VERIFIED)?;
        let email_verified = if verified.is_empty() {
            false
        } else {
            parse_bool(&verified).ok_or_else(|| PluginError::InvalidRequest {
                name: ENV_EMAIL_VERIFIED.to_string(),
                reason: format!("{verified:?} is not a boolean"),
            })?
        };

        debug!("request loaded");
        Ok(Self {
            principal,
            email,
            email_verified,
            client_id,
        })
    }
}

/// Accepts the spellings identity tooling commonly emits for booleans.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_request() {
        let request = Request::from_vars([
            (ENV_PRINCIPAL, "alice"),
            (ENV_EMAIL, "alice@example.com"),
            (ENV_EMAIL_VERIFIED, "true"),
            (ENV_CLIENT_ID, "client-1"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();

        assert_eq!(
            request,
            Request {
                principal: "alice".to_string(),
                email: "alice@example.com".to_string(),
                email_verified: true,
                client_id: "client-1".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_vars_default() {
        let request = Request::from_vars(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(request, Request::default());
    }

    #[test]
    fn test_bool_spellings() {
        for (raw, expected) in [("1", true), ("T", true), ("True", true), ("0", false), ("f", false), ("FALSE", false)] {
            let request = Request::from_vars([(ENV_EMAIL_VERIFIED, raw)]).unwrap();
            assert_eq!(request.email_verified, expected, "{raw}");
        }
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let err = Request::from_vars([(ENV_EMAIL_VERIFIED, "yes")]).unwrap_err();
        assert!(matches!(err, PluginError::InvalidRequest { ref name, .. } if name == ENV_EMAIL_VERIFIED));
        assert_eq!(err.code(), "REQUEST_INVALID");
    }

    #[cfg(unix)]
    fn lookup_in(vars: Vec<(&'static str, OsString)>) -> impl FnMut(&str) -> Option<OsString> {
        let mut vars: HashMap<&'static str, OsString> = vars.into_iter().collect();
        move |name| vars.remove(name)
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_unrelated_variable_ignored() {
        use std::os::unix::ffi::OsStringExt;

        let request = Request::from_lookup(lookup_in(vec![
            (ENV_PRINCIPAL, OsString::from("alice")),
            (ENV_EMAIL_VERIFIED, OsString::from("true")),
            ("UNRELATED", OsString::from_vec(b"f\xFFf".to_vec())),
        ]))
        .unwrap();
        assert_eq!(request.principal, "alice");
        assert!(request.email_verified);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_plugin_variable_rejected() {
        use std::os::unix::ffi::OsStringExt;

        let err = Request::from_lookup(lookup_in(vec![(
            ENV_EMAIL,
            OsString::from_vec(b"a\xFF@example.com".to_vec()),
        )]))
        .unwrap_err();
        assert!(matches!(err, PluginError::InvalidRequest { ref name, .. } if name == ENV_EMAIL));
    }
}
