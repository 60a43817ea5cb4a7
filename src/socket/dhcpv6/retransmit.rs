//! Retransmission timing (RFC 8415, sections 7.6 and 15).

use crate::rand::Rand;
use crate::time::{Duration, Instant};

pub const SOL_MAX_DELAY: Duration = Duration::from_secs(1);
pub const SOL_TIMEOUT: Duration = Duration::from_secs(1);
pub const SOL_MAX_RT: Duration = Duration::from_secs(3600 / 30);
pub const REQ_TIMEOUT: Duration = Duration::from_secs(1);
pub const REQ_MAX_RT: Duration = Duration::from_secs(30);
pub const REQ_MAX_RC: u32 = 10;
pub const CNF_MAX_DELAY: Duration = Duration::from_secs(1);
pub const CNF_TIMEOUT: Duration = Duration::from_secs(1);
pub const CNF_MAX_RT: Duration = Duration::from_secs(4);
pub const CNF_MAX_RD: Duration = Duration::from_secs(10);
pub const REN_TIMEOUT: Duration = Duration::from_secs(10);
pub const REN_MAX_RT: Duration = Duration::from_secs(600);
pub const REB_TIMEOUT: Duration = Duration::from_secs(10);
pub const REB_MAX_RT: Duration = Duration::from_secs(600);
pub const INF_MAX_DELAY: Duration = Duration::from_secs(1);
pub const INF_TIMEOUT: Duration = Duration::from_secs(1);
pub const INF_MAX_RT: Duration = Duration::from_secs(3600 / 30);
pub const REL_TIMEOUT: Duration = Duration::from_secs(1);
pub const REL_MAX_RC: u32 = 4;
pub const DEC_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEC_MAX_RC: u32 = 5;

/// Default INFORMATION_REFRESH_TIME, in seconds.
pub const IRT_DEFAULT: u32 = 86400;
/// Smallest INFORMATION_REFRESH_TIME honoured, in seconds.
pub const IRT_MINIMUM: u32 = 600;

/// Range accepted for SOL_MAX_RT and INF_MAX_RT options, in seconds.
pub const MAX_RT_OPTION_RANGE: core::ops::RangeInclusive<u32> = 60..=86400;

/// Parameters of one retransmission schedule.
///
/// A zero `max_rt`, `max_rc` or `max_rd` means no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    /// Initial retransmission time.
    pub initial_rt: Duration,
    /// Cap on the retransmission time.
    pub max_rt: Duration,
    /// Maximum number of transmissions.
    pub max_rc: u32,
    /// Maximum duration of the whole exchange.
    pub max_rd: Duration,
    /// The first timeout lies strictly above `initial_rt` (Solicit only).
    pub positive_first: bool,
}

impl Parameters {
    pub const SOLICIT: Parameters = Parameters {
        initial_rt: SOL_TIMEOUT,
        max_rt: SOL_MAX_RT,
        max_rc: 0,
        max_rd: Duration::ZERO,
        positive_first: true,
    };
    pub const REQUEST: Parameters = Parameters {
        initial_rt: REQ_TIMEOUT,
        max_rt: REQ_MAX_RT,
        max_rc: REQ_MAX_RC,
        max_rd: Duration::ZERO,
        positive_first: false,
    };
    pub const CONFIRM: Parameters = Parameters {
        initial_rt: CNF_TIMEOUT,
        max_rt: CNF_MAX_RT,
        max_rc: 0,
        max_rd: CNF_MAX_RD,
        positive_first: false,
    };
    pub const RENEW: Parameters = Parameters {
        initial_rt: REN_TIMEOUT,
        max_rt: REN_MAX_RT,
        max_rc: 0,
        max_rd: Duration::ZERO,
        positive_first: false,
    };
    pub const REBIND: Parameters = Parameters {
        initial_rt: REB_TIMEOUT,
        max_rt: REB_MAX_RT,
        max_rc: 0,
        max_rd: Duration::ZERO,
        positive_first: false,
    };
    pub const INFORMATION_REQUEST: Parameters = Parameters {
        initial_rt: INF_TIMEOUT,
        max_rt: INF_MAX_RT,
        max_rc: 0,
        max_rd: Duration::ZERO,
        positive_first: false,
    };
    pub const DECLINE: Parameters = Parameters {
        initial_rt: DEC_TIMEOUT,
        max_rt: Duration::ZERO,
        max_rc: DEC_MAX_RC,
        max_rd: Duration::ZERO,
        positive_first: false,
    };

    pub const RELEASE: Parameters = Parameters {
        initial_rt: REL_TIMEOUT,
        max_rt: Duration::ZERO,
        max_rc: REL_MAX_RC,
        max_rd: Duration::ZERO,
        positive_first: false,
    };

    pub const fn with_max_rt(mut self, max_rt: Duration) -> Self {
        self.max_rt = max_rt;
        self
    }

    pub const fn with_max_rc(mut self, max_rc: u32) -> Self {
        self.max_rc = max_rc;
        self
    }

    pub const fn with_max_rd(mut self, max_rd: Duration) -> Self {
        self.max_rd = max_rd;
        self
    }
}

/// `base` scaled by a random factor in `[-0.1, 0.1]`, or `(0, 0.1]` if `positive`.
fn jitter(rand: &mut Rand, base: Duration, positive: bool) -> (Duration, bool) {
    let permille = if positive {
        rand.rand_inclusive(99) + 1
    } else {
        rand.rand_inclusive(200)
    };
    let scaled = |permille: u64| Duration::from_micros(base.total_micros() / 1000 * permille);
    if positive {
        (scaled(permille), true)
    } else if permille >= 100 {
        (scaled(permille - 100), true)
    } else {
        (scaled(100 - permille), false)
    }
}

fn apply_jitter(rand: &mut Rand, base: Duration, positive: bool) -> Duration {
    match jitter(rand, base, positive) {
        (amount, true) => base + amount,
        (amount, false) => base - amount,
    }
}

/// A uniformly random delay in `[0, max]`.
pub(crate) fn random_delay(rand: &mut Rand, max: Duration) -> Duration {
    Duration::from_micros(rand.rand_inclusive(max.total_micros()))
}

/// State of one retransmission schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retransmit {
    params: Parameters,
    started: Option<Instant>,
    count: u32,
    rt: Duration,
}

impl Retransmit {
    pub fn new(params: Parameters) -> Retransmit {
        Retransmit {
            params,
            started: None,
            count: 0,
            rt: Duration::ZERO,
        }
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Change the cap on the retransmission time for the remaining transmissions.
    pub fn set_max_rt(&mut self, max_rt: Duration) {
        self.params.max_rt = max_rt;
    }

    /// Number of transmissions so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The time of the first transmission.
    pub fn started(&self) -> Option<Instant> {
        self.started
    }

    /// Record a transmission at `now` and return the time to wait for a
    /// response before transmitting again.
    pub(crate) fn next_timeout(&mut self, now: Instant, rand: &mut Rand) -> Duration {
        let params = self.params;
        let mut rt = if self.count == 0 {
            apply_jitter(rand, params.initial_rt, params.positive_first)
        } else {
            // Jitter is relative to the previous RT, not the doubled one.
            match jitter(rand, self.rt, false) {
                (amount, true) => self.rt * 2 + amount,
                (amount, false) => self.rt * 2 - amount,
            }
        };
        if params.max_rt != Duration::ZERO && rt > params.max_rt {
            rt = apply_jitter(rand, params.max_rt, false);
        }

        if self.started.is_none() {
            self.started = Some(now);
        }
        self.count += 1;
        self.rt = rt;
        rt
    }

    /// The end of the exchange imposed by the maximum duration, if any.
    pub fn deadline(&self) -> Option<Instant> {
        if self.params.max_rd == Duration::ZERO {
            return None;
        }
        self.started.map(|started| started + self.params.max_rd)
    }

    /// Whether no further transmission is allowed at `now`.
    pub fn exhausted(&self, now: Instant) -> bool {
        if self.params.max_rc != 0 && self.count >= self.params.max_rc {
            return true;
        }
        matches!(self.deadline(), Some(deadline) if now >= deadline)
    }

    /// Value of the Elapsed Time option for a transmission at `now`, in
    /// hundredths of a second.
    pub fn elapsed_time(&self, now: Instant) -> u16 {
        match self.started {
            Some(started) => ((now - started).total_millis() / 10).min(0xffff) as u16,
            None => 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_first_solicit_timeout_above_irt() {
        for seed in 0..200 {
            let mut rand = Rand::new(seed);
            let mut retransmit = Retransmit::new(Parameters::SOLICIT);
            let rt = retransmit.next_timeout(Instant::ZERO, &mut rand);
            assert!(rt > SOL_TIMEOUT, "{rt}");
            assert!(rt <= Duration::from_millis(1100), "{rt}");
        }
    }

    #[test]
    fn test_timeouts_double_with_jitter() {
        let mut rand = Rand::new(1);
        let mut retransmit = Retransmit::new(Parameters::REQUEST);
        let mut previous = retransmit.next_timeout(Instant::ZERO, &mut rand);
        for _ in 0..4 {
            let rt = retransmit.next_timeout(Instant::ZERO, &mut rand);
            assert!(rt >= previous * 19 / 10, "{rt} after {previous}");
            assert!(rt <= previous * 21 / 10, "{rt} after {previous}");
            previous = rt;
        }
    }

    #[test]
    fn test_solicit_timeout_never_exceeds_cap() {
        let bound = SOL_MAX_RT + SOL_MAX_RT / 10;
        for seed in 0..20 {
            let mut rand = Rand::new(seed);
            let mut retransmit = Retransmit::new(Parameters::SOLICIT);
            let mut now = Instant::ZERO;
            for _ in 0..100 {
                let rt = retransmit.next_timeout(now, &mut rand);
                assert!(rt <= bound, "{rt}");
                now += rt;
            }
            assert!(!retransmit.exhausted(now));
        }
    }

    #[test]
    fn test_cap_jitter_is_symmetric() {
        let mut rand = Rand::new(9);
        let mut retransmit = Retransmit::new(Parameters::SOLICIT);
        for _ in 0..12 {
            retransmit.next_timeout(Instant::ZERO, &mut rand);
        }
        let low = SOL_MAX_RT - SOL_MAX_RT / 10;
        let high = SOL_MAX_RT + SOL_MAX_RT / 10;
        for _ in 0..50 {
            let rt = retransmit.next_timeout(Instant::ZERO, &mut rand);
            assert!(rt >= low && rt <= high, "{rt}");
        }
    }

    #[test]
    fn test_max_rc() {
        let mut rand = Rand::new(3);
        let mut retransmit = Retransmit::new(Parameters::REQUEST);
        for _ in 0..REQ_MAX_RC {
            assert!(!retransmit.exhausted(Instant::ZERO));
            retransmit.next_timeout(Instant::ZERO, &mut rand);
        }
        assert!(retransmit.exhausted(Instant::ZERO));
    }

    #[test]
    fn test_max_rd() {
        let mut rand = Rand::new(3);
        let mut retransmit = Retransmit::new(Parameters::CONFIRM);
        assert_eq!(retransmit.deadline(), None);
        retransmit.next_timeout(Instant::from_secs(5), &mut rand);
        assert_eq!(retransmit.deadline(), Some(Instant::from_secs(15)));
        assert!(!retransmit.exhausted(Instant::from_secs(14)));
        assert!(retransmit.exhausted(Instant::from_secs(15)));
    }

    #[test]
    fn test_elapsed_time() {
        let mut rand = Rand::new(3);
        let mut retransmit = Retransmit::new(Parameters::RENEW);
        assert_eq!(retransmit.elapsed_time(Instant::from_secs(100)), 0);
        retransmit.next_timeout(Instant::from_secs(100), &mut rand);
        assert_eq!(retransmit.elapsed_time(Instant::from_secs(100)), 0);
        assert_eq!(retransmit.elapsed_time(Instant::from_millis(101_500)), 150);
        assert_eq!(retransmit.elapsed_time(Instant::from_secs(100_000)), 0xffff);
    }

    #[test]
    fn test_random_delay_bounds() {
        let mut rand = Rand::new(11);
        for _ in 0..1000 {
            assert!(random_delay(&mut rand, SOL_MAX_DELAY) <= SOL_MAX_DELAY);
        }
        assert_eq!(random_delay(&mut rand, Duration::ZERO), Duration::ZERO);
    }
}
