use crate::types::{ChainId, ChainStatus, Fid};

/// Failures raised by a participant or chain store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(String),
    #[error("Failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("Chain {0} not found")]
    ChainNotFound(ChainId),
    #[error("Participant {fid} is not part of chain {chain_id}")]
    ParticipantNotFound { chain_id: ChainId, fid: Fid },
    #[error("Chain {chain_id} has {expected} participants but {assigned} were assigned")]
    RosterChanged {
        chain_id: ChainId,
        expected: u32,
        assigned: usize,
    },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn encode<E: std::fmt::Display>(err: E) -> Self {
        StoreError::Encode(err.to_string())
    }
}

/// Failures of a matching run. None of these are swallowed by the engine.
#[derive(thiserror::Error, Debug)]
pub enum MatchingError {
    #[error("Chain {0} not found")]
    ChainNotFound(ChainId),
    #[error("Not enough participants for matching (minimum 2, found {found})")]
    InsufficientParticipants { found: usize },
    #[error("Failed to create a valid assignment after {attempts} attempts")]
    AssignmentFailed { attempts: u32 },
    /// Some or all writes failed. `written` lists the pairs that reached the
    /// store before the failure, `rolled_back` whether they were cleared again.
    #[error(
        "Failed to persist assignment ({} written, failed at {failed:?}, rolled back: {rolled_back})",
        .written.len()
    )]
    PersistenceFailure {
        written: Vec<(Fid, Fid)>,
        failed: Option<Fid>,
        rolled_back: bool,
        #[source]
        source: StoreError,
    },
    #[error("Matching for chain {0} is already in progress")]
    MatchingAlreadyInProgress(ChainId),
    #[error("Matching for chain {chain_id} already completed (status: {status})")]
    MatchingAlreadyComplete {
        chain_id: ChainId,
        status: ChainStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Chain creation and lifecycle rule violations.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ChainError {
    #[error("Chain field {0} is missing")]
    MissingField(&'static str),
    #[error("Chain name must be between 3 and 100 characters")]
    InvalidName,
    #[error("Chain description must be at most 500 characters")]
    DescriptionTooLong,
    #[error("Gift amounts must be positive and minimum <= maximum")]
    InvalidAmounts,
    #[error("Participant bounds {min}..={max} are outside {floor}..={ceiling} or inverted")]
    InvalidParticipantBounds {
        min: u32,
        max: u32,
        floor: u32,
        ceiling: u32,
    },
    #[error("Join deadline must be in the future")]
    JoinDeadlineInPast,
    #[error("Reveal date must be after join deadline")]
    RevealBeforeJoinDeadline,
    #[error("Chain {0} not found")]
    NotFound(ChainId),
    #[error("Chain is no longer accepting participants (status: {0})")]
    NotOpen(ChainStatus),
    #[error("Join deadline has passed")]
    JoinDeadlinePassed,
    #[error("Chain has reached maximum participants ({0})")]
    Full(u32),
    #[error("Participant {0} has already joined this chain")]
    AlreadyJoined(Fid),
    #[error("Only the chain creator can perform this action")]
    NotCreator,
    #[error("Need at least {required} participants to start matching, found {found}")]
    NotEnoughParticipants { required: u32, found: u32 },
    #[error("Action not allowed while chain is {0}")]
    InvalidStatus(ChainStatus),
    #[error("Participant {0} is not part of this chain")]
    NotParticipant(Fid),
    #[error("Participant is not assigned to gift recipient {0}")]
    WrongRecipient(Fid),
    #[error("Participant {0} has already sent a gift in this chain")]
    GiftAlreadySent(Fid),
    #[error("Gift amount must be between {min} and {max}")]
    AmountOutOfRange { min: u64, max: u64 },
    #[error("Gift message must be at most 500 characters")]
    MessageTooLong,
    #[error("Reveal date has not arrived yet")]
    RevealNotDue,
    #[error("{0} gifts are still unrevealed")]
    GiftsPending(usize),
}
