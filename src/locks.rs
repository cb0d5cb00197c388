//! Named mutual-exclusion locks shared by all services.
//!
//! A lock is a plain name; it is either held or not. Controllers acquire the
//! locks of a command around its execution so that two services never run
//! conflicting commands at the same time (for example two compose stacks
//! binding the same port). Ownership is not tracked: the controller that
//! requested an acquisition is responsible for requesting the release.

use std::collections::HashSet;

/// The process-wide set of held lock names.
#[derive(Debug, Default)]
pub struct LockRegistry {
    held: HashSet<String>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks each name as held. Acquiring a name twice is a no-op.
    pub fn acquire(&mut self, names: &[String]) {
        for name in names {
            self.held.insert(name.clone());
        }
    }

    /// Releases each name if held, returning the names that were actually
    /// removed. Releasing a name that is not held is a no-op.
    pub fn release(&mut self, names: &[String]) -> Vec<String> {
        let mut released = Vec::new();
        for name in names {
            if self.held.remove(name) {
                released.push(name.clone());
            }
        }
        released
    }

    /// Returns the subset of `names` currently held, in the order given.
    pub fn overlap(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| self.held.contains(*name))
            .cloned()
            .collect()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.contains(name)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}
