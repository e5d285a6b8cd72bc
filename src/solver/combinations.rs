//! Brightest-first pair enumeration.
//!
//! Yields index pairs `(i, j)` with `i < j` ordered by the sum of their
//! positions in a brightness-sorted list, so pairs involving the brightest
//! points come first. Ties are broken by ascending `i`, which makes the order
//! fully deterministic. Truncating the iterator gives a bounded pair budget
//! that keeps the most informative pairs.
//!
//! Implementation: walk the anti-diagonals `i + j = s` of the upper triangle.

/// Iterator over `(i, j)` positions, `0 <= i < j < n`, ordered by `i + j`.
pub struct BrightestFirstPairs {
    n: usize,
    sum: usize,
    i: usize,
}

impl BrightestFirstPairs {
    /// Create an iterator over all pairs of `n` brightness-sorted items.
    pub fn new(n: usize) -> Self {
        let mut pairs = Self { n, sum: 1, i: 0 };
        pairs.i = pairs.first_i();
        pairs
    }

    /// Smallest valid `i` on the current anti-diagonal.
    fn first_i(&self) -> usize {
        (self.sum + 1).saturating_sub(self.n)
    }
}

impl Iterator for BrightestFirstPairs {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        // Largest possible sum is (n - 2) + (n - 1)
        while self.n >= 2 && self.sum <= 2 * self.n - 3 {
            let j = self.sum - self.i;
            if self.i < j {
                let pair = (self.i, j);
                self.i += 1;
                return Some(pair);
            }
            self.sum += 1;
            self.i = self.first_i();
        }
        None
    }
}
