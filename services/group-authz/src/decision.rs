//! Authorization decision for one login attempt.
//!
//! Denials and errors are padded to the next multiple of a fixed round so
//! response latency does not reveal which check failed or whether a group
//! lookup was cached.

use crate::config::{PluginConfig, Policy};
use crate::directory::GroupMembersFetcher;
use crate::error::PluginError;
use crate::request::Request;
use crate::shutdown::CancelSignal;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Default latency round for deny and error outcomes.
pub const DEFAULT_ROUND: Duration = Duration::from_secs(5);

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Login permitted
    Allow,
    /// Login refused
    Deny,
}

impl Decision {
    /// Check if this decision permits the login.
    #[must_use]
    pub const fn is_allow(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Lowercase label used in log records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// Evaluates requests against a policy.
#[derive(Debug, Clone)]
pub struct Verifier {
    client_id: String,
    policy: Policy,
    round: Duration,
}

impl Verifier {
    /// Creates a verifier expecting identities issued for `client_id`.
    pub fn new(client_id: impl Into<String>, policy: Policy) -> Self {
        Self {
            client_id: client_id.into(),
            policy,
            round: DEFAULT_ROUND,
        }
    }

    /// Creates a verifier from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &PluginConfig) -> Self {
        Self::new(config.google.oauth.client_id.clone(), config.policy.clone())
    }

    /// Sets the latency round; zero disables padding.
    #[must_use]
    pub const fn with_round(mut self, round: Duration) -> Self {
        self.round = round;
        self
    }

    /// Evaluates `request`. Any outcome other than [`Decision::Allow`] returns
    /// only after the latency floor is reached.
    ///
    /// # Errors
    ///
    /// Returns an error if a group lookup fails or `cancel` fires while one is
    /// in flight.
    pub async fn verify(
        &self,
        fetcher: &dyn GroupMembersFetcher,
        request: &Request,
        cancel: &CancelSignal,
    ) -> Result<Decision, PluginError> {
        let started = Instant::now();
        let outcome = self.evaluate(fetcher, request, cancel).await;

        if !matches!(outcome, Ok(Decision::Allow)) {
            let elapsed = started.elapsed();
            let delay = padded_latency(elapsed, self.round).saturating_sub(elapsed);
            debug!(delay_ms = delay.as_millis(), "pad deny latency");
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    #[instrument(
        skip_all,
        fields(
            principal = %request.principal,
            email = %request.email,
            email_verified = request.email_verified,
            aud = %request.client_id,
        )
    )]
    async fn evaluate(
        &self,
        fetcher: &dyn GroupMembersFetcher,
        request: &Request,
        cancel: &CancelSignal,
    ) -> Result<Decision, PluginError> {
        if !request.email_verified {
            warn!(decision = "deny", reason = "email not verified", "deny");
            return Ok(Decision::Deny);
        }

        if request.client_id != self.client_id {
            warn!(
                decision = "deny",
                reason = "client_id and aud mismatch",
                client_id = %self.client_id,
                "deny"
            );
            return Ok(Decision::Deny);
        }

        let Some(policy) = self.policy.get(&request.principal) else {
            warn!(decision = "deny", reason = "principal does not have any policy", "deny");
            return Ok(Decision::Deny);
        };

        if policy.users.iter().any(|user| *user == request.email) {
            info!(decision = "allow", reason = "user's policy of principal", "allow");
            return Ok(Decision::Allow);
        }

        for group in &policy.groups {
            let fetched = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!(group = %group, "evaluation cancelled");
                    return Err(PluginError::Cancelled);
                }
                result = fetcher.group_members(group) => result,
            };

            let members = fetched.map_err(|source| {
                error!(group = %group, error = %source, "failed to fetch group's members");
                PluginError::GroupLookup {
                    group: group.clone(),
                    source: Box::new(source),
                }
            })?;

            if members.iter().any(|member| member.email == request.email) {
                info!(
                    decision = "allow",
                    reason = "group's policy of principal",
                    group = %group,
                    "allow"
                );
                return Ok(Decision::Allow);
            }
        }

        warn!(decision = "deny", reason = "no policy to allow", "deny");
        Ok(Decision::Deny)
    }
}

/// Smallest multiple of `round` strictly greater than `elapsed`.
#[must_use]
pub fn padded_latency(elapsed: Duration, round: Duration) -> Duration {
    let round_nanos = round.as_nanos();
    if round_nanos == 0 {
        return elapsed;
    }
    let target = (elapsed.as_nanos() / round_nanos + 1) * round_nanos;
    u64::try_from(target).map_or(Duration::MAX, Duration::from_nanos)
}
