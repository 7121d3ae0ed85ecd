use std::fmt;

/// TCP sequence number with serial-number arithmetic.
///
/// Addition wraps at 2^32 and comparisons are made through
/// [`Sequence::difference`], which stays correct across the wrap as long as
/// the two numbers are less than 2^31 apart.
///
/// # Examples
/// ```
/// use flowrtt_core::Sequence;
///
/// let seq = Sequence::new(u32::MAX);
/// assert_eq!(seq.add(2), Sequence::new(1));
/// assert_eq!(seq.difference(Sequence::new(1)), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sequence(u32);

impl Sequence {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// Advance by `n` bytes, wrapping at 2^32.
    pub fn add(self, n: usize) -> Self {
        Self(self.0.wrapping_add(n as u32))
    }

    pub fn sub(self, n: usize) -> Self {
        Self(self.0.wrapping_sub(n as u32))
    }

    /// Signed distance from `self` to `other`: positive when `other` comes
    /// after `self`.
    pub fn difference(self, other: Sequence) -> i32 {
        other.0.wrapping_sub(self.0) as i32
    }

    /// `self <= other` in sequence space.
    pub fn precedes_or_eq(self, other: Sequence) -> bool {
        self.difference(other) >= 0
    }
}

impl From<u32> for Sequence {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::Sequence;

    #[test]
    fn add_wraps_around() {
        assert_eq!(Sequence::new(u32::MAX - 1).add(3), Sequence::new(1));
        assert_eq!(Sequence::new(0).sub(1), Sequence::new(u32::MAX));
    }

    #[test]
    fn difference_is_signed() {
        assert_eq!(Sequence::new(4).difference(Sequence::new(8)), 4);
        assert_eq!(Sequence::new(8).difference(Sequence::new(4)), -4);
        assert_eq!(Sequence::new(8).difference(Sequence::new(8)), 0);
    }

    #[test]
    fn ordering_survives_rollover() {
        let late = Sequence::new(u32::MAX - 10);
        let early = Sequence::new(5);
        assert!(late.precedes_or_eq(early));
        assert!(!early.precedes_or_eq(late));
    }
}
