use crate::control::{ControlError, Session};
use onionpay_common::config::provisioning::{
    VERIFY_ATTEMPTS, VERIFY_INITIAL_INTERVAL_MS, VERIFY_MAX_INTERVAL_MS,
};
use onionpay_common::ServiceId;
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

const DETACHED_KEY: &str = "onions/detached";

/// Snapshot of the detached onion services the daemon knows about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetachedRegistry {
    ids: HashSet<ServiceId>,
}

impl DetachedRegistry {
    /// `GETINFO onions/detached`
    pub async fn query<S>(session: &mut Session<S>) -> Result<Self, ControlError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let reply = session.get_info(DETACHED_KEY).await?;

        let mut ids = HashSet::new();
        for entry in reply.list(DETACHED_KEY) {
            match ServiceId::new(entry.as_str()) {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(e) => warn!("Ignoring unparsable detached onion {:?}: {}", entry, e),
            }
        }

        Ok(Self { ids })
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<ServiceId> for DetachedRegistry {
    fn from_iter<T: IntoIterator<Item = ServiceId>>(iter: T) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Bounded poll-with-backoff used to wait for the daemon's registry to
/// reflect an acknowledged command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyPolicy {
    pub attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            attempts: VERIFY_ATTEMPTS,
            initial_interval: Duration::from_millis(VERIFY_INITIAL_INTERVAL_MS),
            max_interval: Duration::from_millis(VERIFY_MAX_INTERVAL_MS),
        }
    }
}

impl VerifyPolicy {
    /// Wait before each attempt: doubling, capped at `max_interval`
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut next = self.initial_interval;
        (0..self.attempts).map(move |_| {
            let delay = next.min(self.max_interval);
            next = next.saturating_mul(2);
            delay
        })
    }

    /// Query the registry until `done` holds or the attempts run out.
    ///
    /// Returns the last snapshot together with whether `done` held.
    pub async fn wait_for<S, F>(
        &self,
        session: &mut Session<S>,
        mut done: F,
    ) -> Result<(bool, DetachedRegistry), ControlError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: FnMut(&DetachedRegistry) -> bool,
    {
        let mut last = DetachedRegistry::default();

        for (attempt, delay) in self.delays().enumerate() {
            tokio::time::sleep(delay).await;

            last = DetachedRegistry::query(session).await?;
            if done(&last) {
                debug!("Registry converged after {} poll(s)", attempt + 1);
                return Ok((true, last));
            }
            debug!(
                "Registry not converged (poll {}/{}, {} detached)",
                attempt + 1,
                self.attempts,
                last.len()
            );
        }

        Ok((false, last))
    }
}
