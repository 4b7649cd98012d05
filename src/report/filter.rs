//! Inclusion predicates as ordered, named guard clauses
//!
//! Guards run in insertion order and stop at the first failure, so a guard
//! that proves a field exists and parses must be added before any guard
//! comparing against it.

type Guard<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

pub struct Filter<T> {
    guards: Vec<(&'static str, Guard<T>)>,
}

impl<T> Default for Filter<T> {
    fn default() -> Self {
        Self { guards: Vec::new() }
    }
}

impl<T> Filter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a guard; `check` returns true when the record may pass
    pub fn guard(
        mut self,
        name: &'static str,
        check: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.guards.push((name, Box::new(check)));
        self
    }

    /// Append a guard only when `enabled`
    pub fn guard_if(
        self,
        enabled: bool,
        name: &'static str,
        check: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        if enabled { self.guard(name, check) } else { self }
    }

    /// `Err(name)` of the first guard that rejects `record`
    pub fn check(&self, record: &T) -> Result<(), &'static str> {
        for (name, guard) in &self.guards {
            if !guard(record) {
                return Err(*name);
            }
        }
        Ok(())
    }

    pub fn accepts(&self, record: &T) -> bool {
        self.check(record).is_ok()
    }

    pub fn guard_names(&self) -> Vec<&'static str> {
        self.guards.iter().map(|(name, _)| *name).collect()
    }
}

/// Counts of rejected records per guard, for the end-of-run summary
#[derive(Debug, Default)]
pub struct SkipTally {
    counts: Vec<(&'static str, usize)>,
}

impl SkipTally {
    pub fn record(&mut self, guard: &'static str) {
        match self.counts.iter_mut().find(|(name, _)| *name == guard) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((guard, 1)),
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, c)| c).sum()
    }

    pub fn counts(&self) -> &[(&'static str, usize)] {
        &self.counts
    }
}
