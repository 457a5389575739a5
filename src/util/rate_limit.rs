//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn per_second(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Max input messages per second per session; 60 Hz clients get headroom
pub const INPUT_RATE_LIMIT: u32 = 120;

/// Minimum spacing between emotes from one session
pub const EMOTE_COOLDOWN: Duration = Duration::from_secs(2);

/// Per-session rate limiter state
#[derive(Clone)]
pub struct SessionRateLimiter {
    input: Arc<Limiter>,
    emote: Arc<Limiter>,
}

impl SessionRateLimiter {
    pub fn new() -> Self {
        let emote_quota = Quota::with_period(EMOTE_COOLDOWN)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
        Self {
            input: per_second(INPUT_RATE_LIMIT),
            emote: Arc::new(RateLimiter::direct(emote_quota)),
        }
    }

    /// True when an input message is allowed
    pub fn check_input(&self) -> bool {
        self.input.check().is_ok()
    }

    /// True when an emote is allowed (cooldown elapsed)
    pub fn check_emote(&self) -> bool {
        self.emote.check().is_ok()
    }
}

impl Default for SessionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
