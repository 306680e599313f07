/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

const HUGE_DELAY_MS: f64 = 20_000.0;
const SLOW_THRESHOLD_MS: f64 = 7_000.0;
const NEGLIGIBLE_MS: f64 = 60.0;

/// Classification of the client's lag behind the server clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlowingVerdict {
    Good,
    NotGood,
    Bad,
}

/// Detects a slow consumer from the drift between `SYNC` server time and the
/// local clock, smoothed with an exponential moving average.
#[derive(Debug, Clone, Default)]
pub(crate) struct SlowingDetector {
    reference: Option<(u64, u64)>,
    average: f64,
    last: Option<SlowingVerdict>,
}

impl SlowingDetector {
    /// Diagnostic state code: 330 init, 331 first sync / good, 333 not good, 334 bad.
    pub(crate) fn code(&self) -> u16 {
        match (self.reference, self.last) {
            (None, _) => 330,
            (Some(_), None) | (Some(_), Some(SlowingVerdict::Good)) => 331,
            (Some(_), Some(SlowingVerdict::NotGood)) => 333,
            (Some(_), Some(SlowingVerdict::Bad)) => 334,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feeds one `SYNC,<seconds>` observed at local time `now`.
    pub(crate) fn on_sync(&mut self, now: u64, seconds: u64, slowing_enabled: bool) -> SlowingVerdict {
        let server_ms = seconds.saturating_mul(1000);
        let Some((ref_local, ref_server)) = self.reference else {
            self.reference = Some((now, server_ms));
            self.average = 0.0;
            self.last = None;
            return SlowingVerdict::Good;
        };
        let local_elapsed = now as f64 - ref_local as f64;
        let server_elapsed = server_ms as f64 - ref_server as f64;
        let diff = local_elapsed - server_elapsed;

        let verdict = if diff > HUGE_DELAY_MS
            && diff > 2.0 * self.average
            && self.average <= SLOW_THRESHOLD_MS
        {
            // a single huge delay is taken for a pause of the local process
            SlowingVerdict::Good
        } else {
            self.average = self.average * 0.5 + diff * 0.5;
            if self.average < NEGLIGIBLE_MS {
                self.average = 0.0;
            }
            if self.average > SLOW_THRESHOLD_MS {
                if slowing_enabled {
                    SlowingVerdict::Bad
                } else {
                    SlowingVerdict::NotGood
                }
            } else {
                SlowingVerdict::Good
            }
        };
        self.last = Some(verdict);
        verdict
    }

    #[cfg(test)]
    fn average(&self) -> f64 {
        self.average
    }
}
