//! Ensemble selection.
//!
//! The client never decides placement itself: it asks an
//! [`EnsembleProvider`] for `size` bookies, optionally excluding some (the
//! current ensemble during a bookie replacement).
//! [`RandomEnsembleProvider`] places ledgers uniformly at random over a known
//! bookie set.

use std::collections::HashSet;

use async_trait::async_trait;
use ledgerkit_meta::BookieId;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use thiserror::Error;

/// Ensemble selection failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EnsembleError {
    /// Fewer eligible bookies than requested.
    #[error("not enough bookies: requested {requested}, {available} eligible")]
    NotEnoughBookies {
        /// Requested ensemble size.
        requested: usize,
        /// Bookies left after exclusions.
        available: usize,
    },
}

/// Supplies bookies for new ensembles and replacements.
#[async_trait]
pub trait EnsembleProvider: Send + Sync {
    /// Returns `size` distinct bookies, none of them in `excluding`.
    ///
    /// # Errors
    ///
    /// Returns [`EnsembleError::NotEnoughBookies`] when fewer than `size`
    /// eligible bookies exist.
    async fn select(
        &self,
        size: usize,
        excluding: &[BookieId],
    ) -> Result<Vec<BookieId>, EnsembleError>;
}

/// [`EnsembleProvider`] choosing uniformly at random from a known bookie set.
#[derive(Debug, Default)]
pub struct RandomEnsembleProvider {
    bookies: RwLock<Vec<BookieId>>,
}

impl RandomEnsembleProvider {
    /// Creates a provider over `bookies`. Duplicates are ignored.
    pub fn new(bookies: impl IntoIterator<Item = BookieId>) -> Self {
        let provider = Self::default();
        for bookie in bookies {
            provider.add_bookie(bookie);
        }
        provider
    }

    /// Makes `bookie` eligible for selection.
    pub fn add_bookie(&self, bookie: BookieId) {
        let mut bookies = self.bookies.write();
        if !bookies.contains(&bookie) {
            bookies.push(bookie);
        }
    }

    /// Stops selecting `bookie`. Existing ensembles are unaffected.
    pub fn remove_bookie(&self, bookie: &BookieId) {
        self.bookies.write().retain(|b| b != bookie);
    }

    /// Bookies currently eligible.
    #[must_use]
    pub fn bookies(&self) -> Vec<BookieId> {
        self.bookies.read().clone()
    }
}

#[async_trait]
impl EnsembleProvider for RandomEnsembleProvider {
    async fn select(
        &self,
        size: usize,
        excluding: &[BookieId],
    ) -> Result<Vec<BookieId>, EnsembleError> {
        let excluded: HashSet<&BookieId> = excluding.iter().collect();
        let mut eligible: Vec<BookieId> =
            self.bookies.read().iter().filter(|b| !excluded.contains(b)).cloned().collect();
        if eligible.len() < size {
            return Err(EnsembleError::NotEnoughBookies {
                requested: size,
                available: eligible.len(),
            });
        }
        eligible.shuffle(&mut rand::rng());
        eligible.truncate(size);
        Ok(eligible)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn bookies(n: usize) -> Vec<BookieId> {
        (0..n).map(|i| BookieId::new(format!("bookie-{i}"))).collect()
    }

    #[tokio::test]
    async fn test_select_returns_distinct_bookies() {
        let provider = RandomEnsembleProvider::new(bookies(5));
        let selected = provider.select(3, &[]).await.unwrap();
        assert_eq!(selected.len(), 3);
        let distinct: HashSet<_> = selected.iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[tokio::test]
    async fn test_select_honors_exclusions() {
        let provider = RandomEnsembleProvider::new(bookies(3));
        let excluded = bookies(2);
        let selected = provider.select(1, &excluded).await.unwrap();
        assert_eq!(selected, vec![BookieId::new("bookie-2")]);
    }

    #[tokio::test]
    async fn test_select_fails_when_too_few_eligible() {
        let provider = RandomEnsembleProvider::new(bookies(3));
        let err = provider.select(3, &bookies(1)).await.unwrap_err();
        assert_eq!(err, EnsembleError::NotEnoughBookies { requested: 3, available: 2 });
    }

    #[tokio::test]
    async fn test_zero_sized_selection_is_empty() {
        let provider = RandomEnsembleProvider::default();
        assert!(provider.select(0, &[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_membership_changes() {
        let provider = RandomEnsembleProvider::new([BookieId::new("a"), BookieId::new("a")]);
        assert_eq!(provider.bookies().len(), 1);
        provider.add_bookie(BookieId::new("b"));
        provider.remove_bookie(&BookieId::new("a"));
        assert_eq!(provider.bookies(), vec![BookieId::new("b")]);
    }
}
