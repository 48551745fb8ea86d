//! MCP session state management
//!
//! Tracks the lifecycle of an MCP connection: Uninitialized -> Initializing ->
//! Initialized. Network sessions are additionally bound to the tenant that
//! opened them; see [`SessionOwner`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::identity::TenantScope;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    /// Only `initialize` and `ping` are valid
    Uninitialized = 0,
    /// `initialize` answered, waiting for `notifications/initialized`
    Initializing = 1,
    Initialized = 2,
}

impl From<u8> for SessionPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => SessionPhase::Initializing,
            2 => SessionPhase::Initialized,
            _ => SessionPhase::Uninitialized,
        }
    }
}

/// Shared session phase; clones observe the same state.
#[derive(Debug, Clone)]
pub struct SessionState {
    phase: Arc<AtomicU8>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Arc::new(AtomicU8::new(SessionPhase::Uninitialized as u8)),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from(self.phase.load(Ordering::Acquire))
    }

    pub fn is_initialized(&self) -> bool {
        self.phase() == SessionPhase::Initialized
    }

    /// Uninitialized -> Initializing. Returns false if not in Uninitialized.
    pub fn mark_initializing(&self) -> bool {
        self.transition(SessionPhase::Uninitialized, SessionPhase::Initializing)
    }

    /// Initializing -> Initialized. Returns false if not in Initializing.
    pub fn mark_initialized(&self) -> bool {
        self.transition(SessionPhase::Initializing, SessionPhase::Initialized)
    }

    fn transition(&self, from: SessionPhase, to: SessionPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `ping` is always allowed; everything else but `initialize` waits for
    /// the handshake.
    pub fn is_request_allowed(&self, method: &str) -> bool {
        match self.phase() {
            SessionPhase::Uninitialized => matches!(method, "initialize" | "ping"),
            SessionPhase::Initializing | SessionPhase::Initialized => true,
        }
    }
}

/// The tenant a network session was opened by.
///
/// A session id is only honored for the same subject that created it, so a
/// leaked session id does not let another tenant ride on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOwner {
    Tenant(String),
    Unscoped,
}

impl SessionOwner {
    pub fn of(scope: &TenantScope) -> Self {
        match scope.subject() {
            Some(subject) => SessionOwner::Tenant(subject.to_string()),
            None => SessionOwner::Unscoped,
        }
    }

    pub fn admits(&self, scope: &TenantScope) -> bool {
        *self == SessionOwner::of(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TenantIdentity;

    #[test]
    fn test_session_lifecycle() {
        let session = SessionState::new();
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
        assert!(session.is_request_allowed("initialize"));
        assert!(session.is_request_allowed("ping"));
        assert!(!session.is_request_allowed("tools/list"));

        assert!(session.mark_initializing());
        assert!(!session.mark_initializing());
        assert!(session.is_request_allowed("tools/list"));

        assert!(session.mark_initialized());
        assert!(session.is_initialized());
        assert!(!session.mark_initialized());
    }

    #[test]
    fn test_initialized_requires_initializing_first() {
        let session = SessionState::new();
        assert!(!session.mark_initialized());
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
    }

    #[test]
    fn test_session_clone_shares_state() {
        let session1 = SessionState::new();
        let session2 = session1.clone();

        session1.mark_initializing();
        assert_eq!(session2.phase(), SessionPhase::Initializing);
    }

    #[test]
    fn test_owner_admits_only_same_subject() {
        let alice = TenantScope::from(TenantIdentity::from_header("alice").unwrap());
        let bob = TenantScope::from(TenantIdentity::from_header("bob").unwrap());

        let owner = SessionOwner::of(&alice);
        assert!(owner.admits(&alice));
        assert!(!owner.admits(&bob));
        assert!(!owner.admits(&TenantScope::Unscoped));
        assert!(SessionOwner::Unscoped.admits(&TenantScope::Unscoped));
    }
}
