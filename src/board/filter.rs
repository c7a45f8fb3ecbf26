use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::models::OwnershipScope;
use crate::errors::BoardError;
use crate::identity::IdentityProvider;

/// Committed filter state handed to every column fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSnapshot {
    pub search: String,
    pub scope: OwnershipScope,
    pub generation: u64,
}

/// Debounced search text plus ownership scope.
///
/// Every committed change bumps the generation; the board reinitializes all
/// columns under the new generation and columns drop responses from older
/// ones.
#[derive(Debug, Clone)]
pub struct FilterController {
    raw_input: String,
    committed_search: String,
    deadline: Option<Instant>,
    debounce: Duration,
    scope: OwnershipScope,
    scope_forced: bool,
    generation: u64,
}

impl FilterController {
    pub fn new(debounce: Duration, identity: &dyn IdentityProvider) -> Self {
        Self {
            raw_input: String::new(),
            committed_search: String::new(),
            deadline: None,
            debounce,
            scope: identity.initial_scope(),
            scope_forced: identity.scope_forced(),
            generation: 1,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn raw_input(&self) -> &str {
        &self.raw_input
    }

    pub fn search(&self) -> &str {
        &self.committed_search
    }

    pub fn scope(&self) -> &OwnershipScope {
        &self.scope
    }

    pub fn scope_forced(&self) -> bool {
        self.scope_forced
    }

    pub fn snapshot(&self) -> FilterSnapshot {
        FilterSnapshot {
            search: self.committed_search.clone(),
            scope: self.scope.clone(),
            generation: self.generation,
        }
    }

    /// When the pending input settles, if any input is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Record a keystroke; restarts the quiet period.
    pub fn set_search_input(&mut self, text: impl Into<String>, now: Instant) {
        self.raw_input = text.into();
        self.deadline = Some(now + self.debounce);
    }

    /// Commit the input if its quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<FilterSnapshot> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// Commit the pending input immediately.
    pub fn flush(&mut self) -> Option<FilterSnapshot> {
        self.deadline = None;
        let settled = self.raw_input.trim();
        if settled == self.committed_search {
            return None;
        }
        self.committed_search = settled.to_string();
        self.generation += 1;
        debug!(search = %self.committed_search, generation = self.generation, "search committed");
        Some(self.snapshot())
    }

    pub fn set_scope(
        &mut self,
        scope: OwnershipScope,
    ) -> Result<Option<FilterSnapshot>, BoardError> {
        if scope == self.scope {
            return Ok(None);
        }
        if self.scope_forced {
            return Err(BoardError::ScopeLocked);
        }
        self.scope = scope;
        self.generation += 1;
        debug!(scope = ?self.scope, generation = self.generation, "scope changed");
        Ok(Some(self.snapshot()))
    }
}
