//! Ratio-weighted op sequencing
//!
//! Ops with ratios `A:3, B:1` form the sequence `A B A A`: ops are
//! visited in declaration order, round after round, and each takes a slot
//! while it has ratio left. Cycle `c` runs `seq[c mod len]`.

use std::fmt;

/// A fixed, ratio-weighted sequence of ops
#[derive(Clone)]
pub struct OpSequence<T> {
    ops: Vec<T>,
    order: Vec<usize>,
}

impl<T> OpSequence<T> {
    /// Build from `(op, ratio)` pairs
    ///
    /// Returns `None` if every ratio is zero.
    pub fn new(weighted: Vec<(T, u32)>) -> Option<Self> {
        let mut remaining: Vec<u32> = weighted.iter().map(|(_, r)| *r).collect();
        let total: u64 = remaining.iter().map(|r| u64::from(*r)).sum();
        if total == 0 {
            return None;
        }
        let mut order = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
        while remaining.iter().any(|r| *r > 0) {
            for (index, left) in remaining.iter_mut().enumerate() {
                if *left > 0 {
                    *left -= 1;
                    order.push(index);
                }
            }
        }
        Some(Self {
            ops: weighted.into_iter().map(|(op, _)| op).collect(),
            order,
        })
    }

    /// Op for `cycle`
    #[inline]
    pub fn get(&self, cycle: i64) -> &T {
        let len = i64::try_from(self.order.len()).unwrap_or(i64::MAX);
        let slot = usize::try_from(cycle.rem_euclid(len)).unwrap_or(0);
        &self.ops[self.order[slot]]
    }

    /// Sequence length (sum of ratios)
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Always false; an empty sequence cannot be built
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Distinct ops in declaration order
    #[must_use]
    pub fn ops(&self) -> &[T] {
        &self.ops
    }

    /// Op indices in sequence order
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl<T> fmt::Debug for OpSequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpSequence")
            .field("ops", &self.ops.len())
            .field("order", &self.order)
            .finish()
    }
}
