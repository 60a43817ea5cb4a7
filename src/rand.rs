/// PCG32 generator used for transaction identifiers and retransmission jitter.
#[derive(Debug, Clone)]
pub(crate) struct Rand {
    state: u64,
}

impl Rand {
    pub(crate) const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(crate) fn rand_u32(&mut self) -> u32 {
        // https://www.pcg-random.org/download.html, XSH RR variant
        const MULTIPLIER: u64 = 6364136223846793005;
        const INCREMENT: u64 = 1442695040888963407;

        let old = self.state;
        self.state = old.wrapping_mul(MULTIPLIER).wrapping_add(INCREMENT);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    pub(crate) fn rand_u64(&mut self) -> u64 {
        (u64::from(self.rand_u32()) << 32) | u64::from(self.rand_u32())
    }

    /// Uniform value in `0..=bound`.
    pub(crate) fn rand_inclusive(&mut self, bound: u64) -> u64 {
        if bound == u64::MAX {
            self.rand_u64()
        } else {
            self.rand_u64() % (bound + 1)
        }
    }
}
