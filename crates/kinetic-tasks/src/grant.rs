//! Counted background-execution grant.
//!
//! The host (mobile OS, desktop shell, test double) hands out a grant that
//! keeps the process running while it is not in the foreground. One grant is
//! shared by every running task: it is requested when the count leaves zero
//! and released when the count returns to zero.

use std::sync::Arc;

pub type GrantId = u64;

pub trait ExecutionHost: Send + Sync {
    /// Ask the host for continued background execution. `None` when refused.
    fn begin_grant(&self) -> Option<GrantId>;

    fn end_grant(&self, grant: GrantId);
}

/// Host without any background budget to manage.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl ExecutionHost for NoopHost {
    fn begin_grant(&self) -> Option<GrantId> {
        Some(0)
    }

    fn end_grant(&self, _grant: GrantId) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantSnapshot {
    pub active: usize,
    pub held: bool,
}

/// Reference count over the host grant. Callers serialise access; the
/// registry keeps it inside its own critical section.
pub struct ExecutionGrant {
    host: Arc<dyn ExecutionHost>,
    active: usize,
    grant: Option<GrantId>,
}

impl ExecutionGrant {
    pub fn new(host: Arc<dyn ExecutionHost>) -> Self {
        Self {
            host,
            active: 0,
            grant: None,
        }
    }

    pub fn acquire(&mut self) {
        if self.grant.is_none() {
            self.grant = self.host.begin_grant();
            match self.grant {
                Some(grant) => tracing::debug!(grant, "background execution grant acquired"),
                None => tracing::warn!(
                    active = self.active,
                    "host refused background execution grant"
                ),
            }
        }
        self.active += 1;
    }

    pub fn release(&mut self) {
        if self.active == 0 {
            tracing::warn!("grant release without matching acquire ignored");
            return;
        }
        self.active -= 1;
        if self.active == 0 {
            if let Some(grant) = self.grant.take() {
                self.host.end_grant(grant);
                tracing::debug!(grant, "background execution grant released");
            }
        }
    }

    /// The host revoked the grant on its own. Running tasks keep going; the
    /// next acquire asks for a fresh grant.
    pub fn host_expired(&mut self) {
        if let Some(grant) = self.grant.take() {
            tracing::warn!(
                grant,
                active = self.active,
                "host expired background execution grant"
            );
        }
    }

    pub fn snapshot(&self) -> GrantSnapshot {
        GrantSnapshot {
            active: self.active,
            held: self.grant.is_some(),
        }
    }
}
