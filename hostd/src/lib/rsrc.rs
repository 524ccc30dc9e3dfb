use crate::utils::*;

/// A vector of discrete resource counts. Used both for what a job
/// requests and for what the dispatcher owns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourceVec {
    pub printers:   u32,
    pub scanners:   u32,
    pub modems:     u32,
    pub drives:     u32,
}

impl ResourceVec {
    pub const fn new(printers: u32, scanners: u32, modems: u32, drives: u32) -> Self {
        Self { printers, scanners, modems, drives }
    }

    pub fn as_array(&self) -> [u32; 4] {
        [self.printers, self.scanners, self.modems, self.drives]
    }

    pub fn is_zero(&self) -> bool {
        self.as_array()
            .iter()
            .all(|&c| c == 0)
    }

    /// Every count of `self` is at most the matching count of `other`.
    pub fn fits_within(&self, other: &Self) -> bool {
        self.as_array()
            .iter()
            .zip(other.as_array())
            .all(|(&mine, theirs)| mine <= theirs)
    }

    fn zip_with(&self, other: &Self, f: impl Fn(u32, u32) -> u32) -> Self {
        let [p, s, m, d] = self.as_array();
        let [op, os, om, od] = other.as_array();
        Self::new(f(p, op), f(s, os), f(m, om), f(d, od))
    }

    pub fn saturating_add(&self, other: &Self) -> Self {
        self.zip_with(other, u32::saturating_add)
    }

    pub fn saturating_sub(&self, other: &Self) -> Self {
        self.zip_with(other, u32::saturating_sub)
    }
}

impl From<[u32; 4]> for ResourceVec {
    fn from(v: [u32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl fmt::Display for ResourceVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.printers, self.scanners, self.modems, self.drives)
    }
}

/// Book-keeping of the printers, scanners, modems and optical drives
/// that the dispatcher hands out.
///
/// Requests are granted whole or not at all. The table never goes
/// below zero nor above its fixed capacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceTable {
    capacity:   ResourceVec,
    available:  ResourceVec,
}

impl ResourceTable {
    pub fn new(capacity: ResourceVec) -> Self {
        Self {
            capacity,
            available: capacity,
        }
    }

    pub fn capacity(&self) -> ResourceVec {
        self.capacity
    }

    pub fn available(&self) -> ResourceVec {
        self.available
    }

    /// What is currently out on loan.
    pub fn allocated(&self) -> ResourceVec {
        self.capacity.saturating_sub(&self.available)
    }

    pub fn can_allocate(&self, req: &ResourceVec) -> bool {
        req.fits_within(&self.available)
    }

    /// Takes `req` out of the table. Returns `false`, and touches
    /// nothing, if any single count can't be satisfied right now.
    pub fn allocate(&mut self, req: &ResourceVec) -> bool {
        if !self.can_allocate(req) {
            return false;
        }
        self.available = self.available.saturating_sub(req);

        true
    }

    /// Gives back a vector previously obtained through [`allocate`](Self::allocate).
    pub fn free(&mut self, req: &ResourceVec) {
        let restored = self.available.saturating_add(req);
        debug_assert!(restored.fits_within(&self.capacity), "Freed more than was allocated");
        // Clamp anyway: capacity is the hard ceiling.
        self.available = restored.zip_with(&self.capacity, u32::min);
    }

    /// `true` if `req` could never be satisfied, no matter how long
    /// the job waits.
    pub fn exceeds_capacity(&self, req: &ResourceVec) -> bool {
        !req.fits_within(&self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ResourceTable {
        ResourceTable::new(ResourceVec::new(2, 1, 1, 2))
    }

    #[test]
    fn grants_whole_vectors_only() {
        let mut t = table();
        assert!(t.allocate(&ResourceVec::new(1, 1, 0, 0)));
        // One scanner is already out: nothing of this request is taken.
        assert!(!t.allocate(&ResourceVec::new(1, 1, 0, 0)));
        assert_eq!(t.available(), ResourceVec::new(1, 0, 1, 2));
        assert_eq!(t.allocated(), ResourceVec::new(1, 1, 0, 0));
    }

    #[test]
    fn free_restores_availability() {
        let mut t = table();
        let req = ResourceVec::new(2, 0, 1, 1);
        assert!(t.allocate(&req));
        assert!(!t.can_allocate(&ResourceVec::new(1, 0, 0, 0)));
        t.free(&req);
        assert_eq!(t.available(), t.capacity());
        assert!(t.allocated().is_zero());
    }

    #[test]
    fn capacity_vs_availability() {
        let mut t = table();
        assert!(t.allocate(&ResourceVec::new(0, 0, 0, 2)));
        let req = ResourceVec::new(0, 0, 0, 2);
        // Busy for now, but satisfiable in principle.
        assert!(!t.can_allocate(&req));
        assert!(!t.exceeds_capacity(&req));
        // This one never will be.
        assert!(t.exceeds_capacity(&ResourceVec::new(3, 0, 0, 0)));
    }
}
