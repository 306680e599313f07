/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

const MAX_DELAY_MS: u64 = 60_000;
const ATTEMPTS_BEFORE_GROWTH: u32 = 10;

/// Current retry delay: constant for the first attempts, then growing linearly by
/// the base value per attempt up to one minute (or the base, if larger).
#[derive(Debug, Clone)]
pub(crate) struct RetryDelayCounter {
    base: u64,
    current: u64,
    attempts: u32,
}

impl RetryDelayCounter {
    pub(crate) fn new(base: u64) -> Self {
        Self {
            base,
            current: base,
            attempts: 0,
        }
    }

    pub(crate) fn reset(&mut self, base: u64) {
        self.base = base;
        self.current = base;
        self.attempts = 0;
    }

    pub(crate) fn increase(&mut self) {
        if self.attempts >= ATTEMPTS_BEFORE_GROWTH - 1 {
            let cap = self.base.max(MAX_DELAY_MS);
            self.current = (self.current + self.base).min(cap);
        }
        self.attempts = self.attempts.saturating_add(1);
    }

    pub(crate) fn current(&self) -> u64 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_then_linear() {
        let mut retry = RetryDelayCounter::new(4000);
        for _ in 0..9 {
            retry.increase();
            assert_eq!(retry.current(), 4000);
        }
        retry.increase();
        assert_eq!(retry.current(), 8000);
        retry.increase();
        assert_eq!(retry.current(), 12000);
    }

    #[test]
    fn test_never_decreases_and_is_capped() {
        let mut retry = RetryDelayCounter::new(7000);
        let mut last = retry.current();
        for _ in 0..100 {
            retry.increase();
            assert!(retry.current() >= last);
            last = retry.current();
        }
        assert_eq!(retry.current(), 60_000);
    }

    #[test]
    fn test_large_base_is_its_own_cap() {
        let mut retry = RetryDelayCounter::new(90_000);
        for _ in 0..20 {
            retry.increase();
        }
        assert_eq!(retry.current(), 90_000);
    }

    #[test]
    fn test_reset_restores_base() {
        let mut retry = RetryDelayCounter::new(1000);
        for _ in 0..30 {
            retry.increase();
        }
        assert!(retry.current() > 1000);
        retry.reset(1000);
        assert_eq!(retry.current(), 1000);
        retry.reset(2500);
        assert_eq!(retry.current(), 2500);
    }
}
