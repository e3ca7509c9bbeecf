//! Matching engine: turns a chain's roster into a committed assignment
use super::assignment::{Assignment, assign_with_retry, compute_assignment};
use super::config::MatchingConfig;
use super::error::MatchingError;
use super::store::{ChainStore, CommitError, MatchingStore, StatusSwap};
use super::types::{ChainId, ChainStatus, Fid};
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub struct MatchingEngine<S> {
    store: Arc<S>,
    config: MatchingConfig,
    in_flight: Mutex<HashSet<ChainId>>,
}

// Holds a chain's slot in `in_flight` until dropped
struct InFlight<'a> {
    chains: &'a Mutex<HashSet<ChainId>>,
    chain_id: ChainId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut chains = self.chains.lock().unwrap_or_else(|e| e.into_inner());
        chains.remove(&self.chain_id);
    }
}

// Holds the store-level matching claim until dropped
struct StoreClaim<'a, S: ChainStore> {
    store: &'a S,
    chain_id: &'a ChainId,
}

impl<S: ChainStore> Drop for StoreClaim<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.store.release_matching(self.chain_id) {
            tracing::error!(chain_id = %self.chain_id, error = %err, "failed to release matching claim");
        }
    }
}

impl<S: MatchingStore> MatchingEngine<S> {
    pub fn new(store: Arc<S>, config: MatchingConfig) -> Self {
        Self {
            store,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn claim(&self, chain_id: &ChainId) -> Option<InFlight<'_>> {
        let mut chains = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !chains.insert(chain_id.clone()) {
            return None;
        }
        Some(InFlight {
            chains: &self.in_flight,
            chain_id: chain_id.clone(),
        })
    }

    /// Match the chain's participants with fresh randomness.
    pub fn run_matching(&self, chain_id: &ChainId) -> Result<Assignment, MatchingError> {
        self.run_matching_with(chain_id, &mut rand::thread_rng())
    }

    /// Load the roster, build a single-cycle derangement and commit it while
    /// moving the chain to `active`.
    ///
    /// The chain must be `open` or `matching`. A chain that already has an
    /// assignment is never reshuffled, and at most one run per chain executes
    /// at a time, across every engine sharing the store. An `open` chain is
    /// moved to `matching` before its roster is read so nobody can join
    /// mid-run, and is put back to `open` if the run fails.
    pub fn run_matching_with<R>(
        &self,
        chain_id: &ChainId,
        rng: &mut R,
    ) -> Result<Assignment, MatchingError>
    where
        R: Rng + ?Sized,
    {
        let Some(_guard) = self.claim(chain_id) else {
            tracing::warn!(%chain_id, "matching already running");
            return Err(MatchingError::MatchingAlreadyInProgress(chain_id.clone()));
        };
        if !self.store.claim_matching(chain_id)? {
            tracing::warn!(%chain_id, "matching claimed by another run");
            return Err(MatchingError::MatchingAlreadyInProgress(chain_id.clone()));
        }
        let _claim = StoreClaim {
            store: &*self.store,
            chain_id,
        };

        let chain = self
            .store
            .get_chain(chain_id)?
            .ok_or_else(|| MatchingError::ChainNotFound(chain_id.clone()))?;
        if chain.status.is_matched() {
            tracing::warn!(%chain_id, status = %chain.status, "chain already matched");
            return Err(MatchingError::MatchingAlreadyComplete {
                chain_id: chain_id.clone(),
                status: chain.status,
            });
        }

        let opened = chain.status == ChainStatus::Open;
        if opened {
            match self
                .store
                .set_chain_status_if(chain_id, ChainStatus::Open, ChainStatus::Matching)?
            {
                StatusSwap::Swapped => {}
                StatusSwap::Mismatch(current) => return Err(status_conflict(chain_id, current)),
            }
        }

        let res = self.match_roster(chain_id, rng);
        if res.is_err() && opened {
            self.reopen(chain_id);
        }
        res
    }

    fn match_roster<R>(&self, chain_id: &ChainId, rng: &mut R) -> Result<Assignment, MatchingError>
    where
        R: Rng + ?Sized,
    {
        let roster: Vec<Fid> = self
            .store
            .list_participants(chain_id)?
            .into_iter()
            .map(|p| p.fid)
            .collect();
        if roster.len() < 2 {
            return Err(MatchingError::InsufficientParticipants {
                found: roster.len(),
            });
        }

        let assignment = assign_with_retry(self.config.max_attempts, || {
            compute_assignment(&roster, &mut *rng)
        })?;

        self.store
            .commit_matching(chain_id, ChainStatus::Matching, &assignment)
            .map_err(|err| commit_failure(chain_id, err))?;

        tracing::info!(
            %chain_id,
            participants = assignment.len(),
            "chain matched and active"
        );
        Ok(assignment)
    }

    // put a chain this run moved to `matching` back to `open`
    fn reopen(&self, chain_id: &ChainId) {
        match self
            .store
            .set_chain_status_if(chain_id, ChainStatus::Matching, ChainStatus::Open)
        {
            Ok(StatusSwap::Swapped) => {}
            Ok(StatusSwap::Mismatch(current)) => {
                tracing::warn!(%chain_id, %current, "chain left matching before reopen")
            }
            Err(err) => {
                tracing::error!(%chain_id, error = %err, "failed to reopen chain after matching failure")
            }
        }
    }
}

fn status_conflict(chain_id: &ChainId, current: ChainStatus) -> MatchingError {
    if current.is_matched() {
        MatchingError::MatchingAlreadyComplete {
            chain_id: chain_id.clone(),
            status: current,
        }
    } else {
        MatchingError::MatchingAlreadyInProgress(chain_id.clone())
    }
}

fn commit_failure(chain_id: &ChainId, err: CommitError) -> MatchingError {
    match err {
        CommitError::Conflict {
            current,
            rolled_back,
        } => {
            tracing::warn!(%chain_id, %current, rolled_back, "chain status changed during matching");
            status_conflict(chain_id, current)
        }
        CommitError::Assignment {
            written,
            failed,
            rolled_back,
            source,
        } => {
            tracing::error!(%chain_id, written = written.len(), %failed, rolled_back, error = %source, "assignment write failed");
            MatchingError::PersistenceFailure {
                written,
                failed: Some(failed),
                rolled_back,
                source,
            }
        }
        CommitError::Status {
            written,
            rolled_back,
            source,
        } => {
            tracing::error!(%chain_id, written = written.len(), rolled_back, error = %source, "chain status write failed");
            MatchingError::PersistenceFailure {
                written,
                failed: None,
                rolled_back,
                source,
            }
        }
        CommitError::Store(source) => {
            tracing::error!(%chain_id, error = %source, "matching commit failed");
            MatchingError::PersistenceFailure {
                written: Vec::new(),
                failed: None,
                rolled_back: true,
                source,
            }
        }
    }
}
