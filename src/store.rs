//! Store interfaces consumed by the matching engine
use super::assignment::Assignment;
use super::error::StoreError;
use super::types::{Chain, ChainId, ChainStatus, Fid, Participant};

/// Outcome of a conditional status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSwap {
    Swapped,
    /// Current status did not match the expected one; nothing was written.
    Mismatch(ChainStatus),
}

pub trait ParticipantStore {
    fn list_participants(&self, chain_id: &ChainId) -> Result<Vec<Participant>, StoreError>;

    fn get_participant(
        &self,
        chain_id: &ChainId,
        fid: Fid,
    ) -> Result<Option<Participant>, StoreError>;

    fn set_assigned_recipient(
        &self,
        chain_id: &ChainId,
        fid: Fid,
        recipient: Fid,
    ) -> Result<(), StoreError>;

    fn clear_assigned_recipient(&self, chain_id: &ChainId, fid: Fid) -> Result<(), StoreError>;
}

pub trait ChainStore {
    fn get_chain(&self, chain_id: &ChainId) -> Result<Option<Chain>, StoreError>;

    fn set_chain_status(&self, chain_id: &ChainId, status: ChainStatus) -> Result<(), StoreError>;

    /// Write `status` only if the chain is currently `expected`.
    fn set_chain_status_if(
        &self,
        chain_id: &ChainId,
        expected: ChainStatus,
        status: ChainStatus,
    ) -> Result<StatusSwap, StoreError>;

    /// Mark a matching run on the chain as in progress. Returns false if
    /// another run, from any process sharing the store, already holds it.
    fn claim_matching(&self, chain_id: &ChainId) -> Result<bool, StoreError>;

    fn release_matching(&self, chain_id: &ChainId) -> Result<(), StoreError>;
}

/// Why committing a matching failed.
#[derive(thiserror::Error, Debug)]
pub enum CommitError {
    #[error("Chain status changed to {current} before the commit")]
    Conflict { current: ChainStatus, rolled_back: bool },
    #[error("Writing the assignment of {failed} failed after {} writes", .written.len())]
    Assignment {
        written: Vec<(Fid, Fid)>,
        failed: Fid,
        rolled_back: bool,
        source: StoreError,
    },
    #[error("Writing the chain status failed after {} assignment writes", .written.len())]
    Status {
        written: Vec<(Fid, Fid)>,
        rolled_back: bool,
        source: StoreError,
    },
    /// Nothing was written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub trait MatchingStore: ParticipantStore + ChainStore {
    /// Persist every pair of `assignment` and move the chain from `expected`
    /// to `active`. The chain must never become active with a partial
    /// assignment. Callers hold the chain's matching claim.
    ///
    /// The provided implementation stages the pairs one by one, flips the
    /// status with a conditional write last, and clears whatever it wrote if
    /// any step fails. Stores with multi-record transactions should override it.
    fn commit_matching(
        &self,
        chain_id: &ChainId,
        expected: ChainStatus,
        assignment: &Assignment,
    ) -> Result<(), CommitError> {
        let mut written = Vec::with_capacity(assignment.len());

        for (giver, receiver) in assignment.pairs() {
            if let Err(source) = self.set_assigned_recipient(chain_id, giver, receiver) {
                let rolled_back = clear_written(self, chain_id, &written);
                return Err(CommitError::Assignment {
                    written,
                    failed: giver,
                    rolled_back,
                    source,
                });
            }
            written.push((giver, receiver));
        }

        match self.set_chain_status_if(chain_id, expected, ChainStatus::Active) {
            Ok(StatusSwap::Swapped) => Ok(()),
            Ok(StatusSwap::Mismatch(current)) => {
                // rows of a matched chain belong to the run that matched it
                let rolled_back = !current.is_matched() && clear_written(self, chain_id, &written);
                Err(CommitError::Conflict {
                    current,
                    rolled_back,
                })
            }
            Err(source) => {
                let rolled_back = clear_written(self, chain_id, &written);
                Err(CommitError::Status {
                    written,
                    rolled_back,
                    source,
                })
            }
        }
    }
}

// best effort compensation, reports whether every staged pair was cleared
fn clear_written<S>(store: &S, chain_id: &ChainId, written: &[(Fid, Fid)]) -> bool
where
    S: ParticipantStore + ?Sized,
{
    let mut clean = true;
    for (giver, _) in written {
        if let Err(err) = store.clear_assigned_recipient(chain_id, *giver) {
            tracing::error!(%chain_id, fid = %giver, error = %err, "failed to clear staged assignment");
            clean = false;
        }
    }
    clean
}
