use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::error::{Error, Result};

/// A pool of 16-bit identifiers that can be borrowed and returned
///
/// Internally this is a circular buffer. `next` points at the next value
/// that may be borrowed and `returned` at the slot the next return will be
/// written to. The arc from `next` forward to `returned` holds the values
/// currently available; everything else is on loan. When both cursors meet,
/// `next_is_ahead` tells a drained pool apart from a full one.
#[derive(Debug, Clone)]
pub struct NumPool {
    /// Backing storage. Doubles as the freelist.
    array: Vec<u16>,
    /// Index of the next value to lend out.
    next: usize,
    /// Index the next returned value will be written to.
    returned: usize,
    /// True while at least one value is on loan. Disambiguates the cursors
    /// meeting because the pool drained from them meeting because every
    /// loan came back.
    next_is_ahead: bool,
}

impl NumPool {
    /// Construct a pool holding every value in `[min, max]` that is
    /// reachable from `min` in steps of `stride`, in a randomized order.
    pub fn new(min: u16, max: u16, stride: u16) -> Result<Self> {
        Self::build(min, max, stride, &mut rand::thread_rng())
    }

    /// Same as [`NumPool::new`], but with a deterministic shuffle order.
    pub fn with_seed(min: u16, max: u16, stride: u16, seed: u64) -> Result<Self> {
        Self::build(min, max, stride, &mut StdRng::seed_from_u64(seed))
    }

    fn build<R: Rng>(min: u16, max: u16, stride: u16, rng: &mut R) -> Result<Self> {
        if min > max || stride == 0 {
            return Err(Error::InvalidRange { min, max, stride });
        }

        // Sample the range, then scramble it so identifiers are not handed
        // out in ascending order (a known port-prediction side channel)
        let mut array: Vec<u16> = (min..=max).step_by(stride as usize).collect();
        array.shuffle(rng);
        log::trace!(
            "Built an identifier pool over [{}, {}] (stride {}) with {} values",
            min,
            max,
            stride,
            array.len()
        );

        Ok(Self {
            array,
            next: 0,
            returned: 0,
            next_is_ahead: false,
        })
    }

    /// Total number of identifiers this pool was built with
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.array.len()
    }

    /// Number of identifiers currently available for borrowing
    #[must_use]
    pub fn available(&self) -> usize {
        if self.next == self.returned {
            match self.next_is_ahead {
                true => 0,
                false => self.array.len(),
            }
        } else {
            (self.returned + self.array.len() - self.next) % self.array.len()
        }
    }

    /// Check if every identifier is currently on loan
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.next == self.returned && self.next_is_ahead
    }

    /// Check if no identifier is currently on loan
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.next == self.returned && !self.next_is_ahead
    }

    /// Borrow the next available identifier
    #[profiling::function]
    pub fn get_any(&mut self) -> Result<u16> {
        if self.is_exhausted() {
            return Err(Error::Exhausted);
        }

        let value = self.array[self.next];
        self.advance_next();
        Ok(value)
    }

    /// Borrow a specific identifier
    ///
    /// Linearly scans the available arc for `value`. On a hit, the value at
    /// `next` is moved into the vacated slot so the arc stays contiguous;
    /// the scan cost is bounded by the pool size.
    #[profiling::function]
    pub fn get(&mut self, value: u16) -> Result<()> {
        for offset in 0..self.available() {
            let slot = (self.next + offset) % self.array.len();
            if self.array[slot] == value {
                self.array[slot] = self.array[self.next];
                self.advance_next();
                return Ok(());
            }
        }

        Err(Error::NotFound(value))
    }

    /// Return a borrowed identifier to the pool
    ///
    /// The caller is trusted: nothing verifies `value` was actually borrowed
    /// from this pool. Returning more values than were borrowed fails with
    /// [`Error::Overflow`].
    #[profiling::function]
    pub fn ret(&mut self, value: u16) -> Result<()> {
        if self.is_full() {
            return Err(Error::Overflow);
        }

        self.array[self.returned] = value;
        self.returned = (self.returned + 1) % self.array.len();
        if self.returned == self.next {
            self.next_is_ahead = false;
        }
        Ok(())
    }

    fn advance_next(&mut self) {
        self.next = (self.next + 1) % self.array.len();
        self.next_is_ahead = true;
    }
}
