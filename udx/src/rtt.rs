use std::time::Duration;

/// Smoothed round-trip estimation and retransmission timeout, RFC 6298:
/// `RTO = SRTT + 4 * RTTVAR`, clamped to a configured floor and ceiling,
/// doubled on each timer backoff until the next valid sample.
#[derive(Debug)]
pub(crate) struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
}

impl RttEstimator {
    pub(crate) fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        RttEstimator {
            srtt: None,
            rttvar: Duration::from_millis(0),
            rto: initial_rto,
            min_rto,
            max_rto,
        }
    }

    /// Feeds a round-trip sample. Samples from retransmitted segments must
    /// not be fed (Karn's rule); the caller enforces that.
    pub(crate) fn sample(&mut self, rtt: Duration) {
        let srtt = match self.srtt {
            None => {
                self.rttvar = rtt / 2;
                rtt
            }
            Some(srtt) => {
                let delta = if srtt > rtt { srtt - rtt } else { rtt - srtt };
                // RTTVAR := 3/4 RTTVAR + 1/4 |SRTT - R|
                self.rttvar = (self.rttvar * 3 + delta) / 4;
                // SRTT := 7/8 SRTT + 1/8 R
                (srtt * 7 + rtt) / 8
            }
        };
        self.srtt = Some(srtt);
        self.rto = clamp(srtt + 4 * self.rttvar, self.min_rto, self.max_rto);
    }

    pub(crate) fn rto(&self) -> Duration {
        self.rto
    }

    /// Exponential backoff after a retransmission timeout.
    pub(crate) fn backoff(&mut self) {
        self.rto = clamp(self.rto * 2, self.min_rto, self.max_rto);
    }
}

fn clamp(d: Duration, lo: Duration, hi: Duration) -> Duration {
    if d < lo {
        lo
    } else if d > hi {
        hi
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> RttEstimator {
        RttEstimator::new(
            Duration::from_secs(1),
            Duration::from_millis(200),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn first_sample_initialises() {
        let mut rtt = estimator();
        rtt.sample(Duration::from_millis(100));
        // SRTT = 100ms, RTTVAR = 50ms, RTO = 100 + 4*50 = 300ms.
        assert_eq!(rtt.rto(), Duration::from_millis(300));
    }

    #[test]
    fn rto_respects_the_floor() {
        let mut rtt = estimator();
        for _ in 0..16 {
            rtt.sample(Duration::from_millis(1));
        }
        assert_eq!(rtt.rto(), Duration::from_millis(200));
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let mut rtt = estimator();
        rtt.sample(Duration::from_millis(100));
        let before = rtt.rto();
        rtt.backoff();
        assert_eq!(rtt.rto(), before * 2);
        for _ in 0..16 {
            rtt.backoff();
        }
        assert_eq!(rtt.rto(), Duration::from_secs(30));
    }
}
