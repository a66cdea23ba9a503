use std::num::NonZeroU32;
use std::time::Duration;

use dashmap::DashMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

/// Where a user currently is in the conversation. Everything outside
/// `Main` is a prompt waiting for one specific kind of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Main,
    AwaitingTelegramHandle,
    AwaitingTwitterHandle,
    AwaitingGroupCheck,
    AwaitingWallet,
    AwaitingWithdrawalAmount,
    /// Admin composing a broadcast message.
    AwaitingBroadcast,
}

/// Per-user conversation state plus the inter-message throttle. Process
/// local by design: losing it on restart only drops users back to the
/// main menu, never any ledger state.
pub struct SessionStore {
    states: DashMap<i64, SessionState>,
    limiter: DefaultKeyedRateLimiter<i64>,
}

impl SessionStore {
    pub fn new(min_interval: Duration) -> Self {
        let quota = Quota::with_period(min_interval)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
        Self {
            states: DashMap::new(),
            limiter: RateLimiter::keyed(quota),
        }
    }

    pub fn get(&self, user_id: i64) -> SessionState {
        self.states
            .get(&user_id)
            .map(|s| *s)
            .unwrap_or_default()
    }

    pub fn set(&self, user_id: i64, state: SessionState) {
        self.states.insert(user_id, state);
    }

    pub fn reset(&self, user_id: i64) {
        self.states.remove(&user_id);
    }

    /// Atomic check-and-record of the user's message budget. One call per
    /// inbound message; `false` means drop the message.
    pub fn allow_message(&self, user_id: i64) -> bool {
        self.limiter.check_key(&user_id).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_main_menu() {
        let store = SessionStore::new(Duration::from_secs(2));
        assert_eq!(store.get(42), SessionState::Main);
    }

    #[test]
    fn state_round_trip() {
        let store = SessionStore::new(Duration::from_secs(2));
        store.set(42, SessionState::AwaitingWallet);
        assert_eq!(store.get(42), SessionState::AwaitingWallet);
        store.reset(42);
        assert_eq!(store.get(42), SessionState::Main);
    }

    #[test]
    fn states_are_per_user() {
        let store = SessionStore::new(Duration::from_secs(2));
        store.set(1, SessionState::AwaitingWithdrawalAmount);
        assert_eq!(store.get(2), SessionState::Main);
    }

    #[test]
    fn throttle_rejects_rapid_messages() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert!(store.allow_message(7));
        assert!(!store.allow_message(7));
        // a different user is unaffected
        assert!(store.allow_message(8));
    }
}
