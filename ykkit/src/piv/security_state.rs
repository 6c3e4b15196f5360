//! PIV Security State
//!
//! The host's view of the PIN retry counter. The device only reveals the
//! counter in failure replies or metadata, so between those the session
//! keeps an estimate.

/// Default PIN retry limit of a freshly reset application
pub const DEFAULT_PIN_ATTEMPTS: u8 = 3;

/// PIN attempt estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinAttemptEstimate {
    max: u8,
    current: u8,
}

impl PinAttemptEstimate {
    pub fn new(max: u8) -> Self {
        Self { max, current: max }
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// A successful verification restores the full count
    pub fn reset(&mut self) {
        self.current = self.max;
    }

    /// Record the count reported by a failure reply
    pub fn record(&mut self, remaining: u8) {
        self.current = remaining;
    }

    /// A new retry limit, as set by SET PIN RETRIES
    pub fn configure(&mut self, max: u8) {
        *self = Self::new(max);
    }
}

impl Default for PinAttemptEstimate {
    fn default() -> Self {
        Self::new(DEFAULT_PIN_ATTEMPTS)
    }
}
