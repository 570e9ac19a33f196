/// Memory-limit seam for table growth.
///
/// The table consults the policy before every backing-array growth; a
/// rejection surfaces as a fatal capacity error. This guards against a
/// source file that *claims* an enormous highest object number.
pub trait CapacityPolicy {
    /// May the table grow to hold `requested` slots?
    fn approve(&self, requested: usize) -> bool;
}

/// Accepts any growth. The default for trusted inputs.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnlimitedCapacity;

impl CapacityPolicy for UnlimitedCapacity {
    fn approve(&self, _requested: usize) -> bool {
        true
    }
}

/// Rejects growth past a fixed slot count.
#[derive(Clone, Copy, Debug)]
pub struct CappedCapacity {
    pub max_slots: usize,
}

impl CappedCapacity {
    pub fn new(max_slots: usize) -> Self {
        Self { max_slots }
    }
}

impl CapacityPolicy for CappedCapacity {
    fn approve(&self, requested: usize) -> bool {
        requested <= self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_always_approves() {
        assert!(UnlimitedCapacity.approve(usize::MAX));
    }

    #[test]
    fn capped_rejects_past_limit() {
        let p = CappedCapacity::new(100);
        assert!(p.approve(100));
        assert!(!p.approve(101));
    }
}
