/// Working buffers of the combination generator.
///
/// Owned by a single event's processing; `fill` resets both buffers before use so
/// nothing carries over between events.
#[derive(Clone, Debug)]
pub struct CombinationScratch<T> {
    current: Vec<T>,
    combinations: Vec<Vec<T>>,
}

impl<T: Clone> CombinationScratch<T> {
    pub fn new() -> Self {
        CombinationScratch { current: Vec::new(), combinations: Vec::new() }
    }

    /// Fills the buffer with every k-element combination of `pool`.
    ///
    /// Combinations keep source order and come out in lexicographic index order.
    /// Nothing is produced for `k == 0` or when the pool holds fewer than `k` elements.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use vtxcore::algorithm::combinations::CombinationScratch;
    /// let mut scratch = CombinationScratch::new();
    /// let combos = scratch.fill(&['a', 'b', 'c'], 2);
    /// assert_eq!(combos, &[vec!['a', 'b'], vec!['a', 'c'], vec!['b', 'c']]);
    /// ```
    pub fn fill(&mut self, pool: &[T], k: usize) -> &[Vec<T>] {
        self.current.clear();
        self.combinations.clear();
        if k > 0 && pool.len() >= k {
            self.current.reserve(k);
            self.do_combinations(pool, 0, k);
        }
        &self.combinations
    }

    pub fn take(&mut self) -> Vec<Vec<T>> {
        std::mem::take(&mut self.combinations)
    }

    fn do_combinations(&mut self, pool: &[T], offset: usize, k: usize) {
        if k == 0 {
            self.combinations.push(self.current.clone());
            return;
        }
        for i in offset..=pool.len() - k {
            self.current.push(pool[i].clone());
            self.do_combinations(pool, i + 1, k - 1);
            self.current.pop();
        }
    }
}

impl<T: Clone> Default for CombinationScratch<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Every k-element combination of `pool`, see [`CombinationScratch::fill`].
pub fn combinations<T: Clone>(pool: &[T], k: usize) -> Vec<Vec<T>> {
    let mut scratch = CombinationScratch::new();
    scratch.fill(pool, k);
    scratch.take()
}
