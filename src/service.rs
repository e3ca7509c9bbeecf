//! Service layer API for chain lifecycle operations
use super::assignment::Assignment;
use super::chain::ChainDetails;
use super::config::ServiceConfig;
use super::engine::MatchingEngine;
use super::error::{ChainError, MatchingError};
use super::sled_store::{GiftOutcome, JoinOutcome, SledStore};
use super::store::{ChainStore, ParticipantStore, StatusSwap};
use super::types::{Chain, ChainId, ChainStatus, Fid, Gift, GiftKind, Participant, TimeStamp};
use chrono::Utc;
use std::sync::Arc;

/// Source of "now" for deadline checks.
pub type Clock = Arc<dyn Fn() -> TimeStamp<Utc> + Send + Sync>;

pub struct ChainService {
    store: Arc<SledStore>,
    engine: MatchingEngine<SledStore>,
    config: ServiceConfig,
    clock: Clock,
}

/// A gift a participant wants to send to their assigned recipient.
#[derive(Debug, Clone)]
pub struct GiftRequest {
    pub chain_id: ChainId,
    pub sender: Fid,
    pub recipient: Fid,
    pub kind: GiftKind,
    pub message: Option<String>,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiftFilter {
    Sent,
    Received,
    All,
}

/// A gift as shown to one user. The sender stays hidden from the recipient
/// until the chain is revealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftView {
    pub chain_id: ChainId,
    pub sender: Option<Fid>,
    pub recipient: Fid,
    pub kind: GiftKind,
    pub message: Option<String>,
    pub sent_at: TimeStamp<Utc>,
    pub revealed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStats {
    pub total_participants: usize,
    pub gifts_sent: usize,
    pub gifts_revealed: usize,
    pub completion_percentage: u32,
}

impl ChainService {
    pub fn new(store: Arc<SledStore>, config: ServiceConfig) -> Self {
        Self::with_clock(store, config, Arc::new(TimeStamp::new))
    }

    pub fn with_clock(store: Arc<SledStore>, config: ServiceConfig, clock: Clock) -> Self {
        let engine = MatchingEngine::new(store.clone(), config.matching.clone());
        Self {
            store,
            engine,
            config,
            clock,
        }
    }

    /// Open the database at `config.db_path`.
    pub fn open(config: ServiceConfig) -> anyhow::Result<Self> {
        let store = SledStore::open(&config.db_path)?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn store(&self) -> &Arc<SledStore> {
        &self.store
    }

    fn now(&self) -> TimeStamp<Utc> {
        (self.clock)()
    }

    /// Load chain from database
    fn load_chain(&self, chain_id: &ChainId) -> anyhow::Result<Chain> {
        self.store
            .get_chain(chain_id)?
            .ok_or_else(|| ChainError::NotFound(chain_id.clone()).into())
    }

    /// Create a new chain; the creator is its first participant.
    pub fn create_chain(&self, details: ChainDetails) -> anyhow::Result<Chain> {
        let now = self.now();
        let chain = details.validate_and_finalise(ChainId::generate()?, &self.config, &now)?;
        let chain = self.store.create_chain(&chain, &now)?;

        tracing::info!(chain_id = %chain.id, creator = %chain.creator, "chain created");
        Ok(chain)
    }

    /// Join an open chain before its deadline
    pub fn join_chain(&self, chain_id: &ChainId, fid: Fid) -> anyhow::Result<Chain> {
        let chain = self.load_chain(chain_id)?;

        if chain.status != ChainStatus::Open {
            return Err(ChainError::NotOpen(chain.status).into());
        }
        if chain.join_deadline <= self.now() {
            return Err(ChainError::JoinDeadlinePassed.into());
        }

        match self.store.add_participant(chain_id, fid, &self.now())? {
            JoinOutcome::Joined(chain) => {
                tracing::info!(%chain_id, %fid, count = chain.participant_count, "participant joined");
                Ok(chain)
            }
            JoinOutcome::NotOpen(status) => Err(ChainError::NotOpen(status).into()),
            JoinOutcome::Full(max) => Err(ChainError::Full(max).into()),
            JoinOutcome::AlreadyJoined => Err(ChainError::AlreadyJoined(fid).into()),
        }
    }

    /// Move an open chain into matching and run the engine. Any engine
    /// failure puts the chain back to `open`.
    pub fn start_matching(&self, chain_id: &ChainId, actor: Fid) -> anyhow::Result<Assignment> {
        let chain = self.load_chain(chain_id)?;

        // Verify the actor is the creator
        if chain.creator != actor {
            return Err(ChainError::NotCreator.into());
        }
        match chain.status {
            ChainStatus::Open => {}
            status if status.is_matched() => {
                return Err(MatchingError::MatchingAlreadyComplete {
                    chain_id: chain_id.clone(),
                    status,
                }
                .into());
            }
            _ => return Err(MatchingError::MatchingAlreadyInProgress(chain_id.clone()).into()),
        }
        if chain.participant_count < chain.min_participants {
            return Err(ChainError::NotEnoughParticipants {
                required: chain.min_participants,
                found: chain.participant_count,
            }
            .into());
        }

        match self
            .store
            .set_chain_status_if(chain_id, ChainStatus::Open, ChainStatus::Matching)?
        {
            StatusSwap::Swapped => {}
            StatusSwap::Mismatch(current) if current.is_matched() => {
                return Err(MatchingError::MatchingAlreadyComplete {
                    chain_id: chain_id.clone(),
                    status: current,
                }
                .into());
            }
            StatusSwap::Mismatch(_) => {
                return Err(MatchingError::MatchingAlreadyInProgress(chain_id.clone()).into());
            }
        }
        tracing::info!(%chain_id, "matching started");

        match self.engine.run_matching(chain_id) {
            Ok(assignment) => Ok(assignment),
            Err(err) => {
                tracing::warn!(%chain_id, error = %err, "matching failed, reopening chain");
                self.reopen(chain_id);
                Err(err.into())
            }
        }
    }

    // compensating revert for a failed matching run
    fn reopen(&self, chain_id: &ChainId) {
        match self
            .store
            .set_chain_status_if(chain_id, ChainStatus::Matching, ChainStatus::Open)
        {
            Ok(StatusSwap::Swapped) => {}
            Ok(StatusSwap::Mismatch(current)) => {
                tracing::warn!(%chain_id, %current, "chain left matching before revert")
            }
            Err(err) => {
                tracing::error!(%chain_id, error = %err, "failed to reopen chain after matching failure")
            }
        }
    }

    /// Send a gift to the sender's assigned recipient
    pub fn send_gift(&self, request: GiftRequest) -> anyhow::Result<Gift> {
        let chain = self.load_chain(&request.chain_id)?;

        if chain.status != ChainStatus::Active {
            return Err(ChainError::InvalidStatus(chain.status).into());
        }

        let sender = self
            .store
            .get_participant(&request.chain_id, request.sender)?
            .ok_or(ChainError::NotParticipant(request.sender))?;
        if sender.assigned_recipient != Some(request.recipient) {
            return Err(ChainError::WrongRecipient(request.recipient).into());
        }
        if sender.has_sent_gift {
            return Err(ChainError::GiftAlreadySent(request.sender).into());
        }
        if let GiftKind::Crypto { amount, .. } = &request.kind {
            if *amount < chain.min_amount || *amount > chain.max_amount {
                return Err(ChainError::AmountOutOfRange {
                    min: chain.min_amount,
                    max: chain.max_amount,
                }
                .into());
            }
        }
        if let Some(message) = &request.message {
            if message.chars().count() > 500 {
                return Err(ChainError::MessageTooLong.into());
            }
        }

        let gift = Gift {
            chain_id: request.chain_id,
            sender: request.sender,
            recipient: request.recipient,
            kind: request.kind,
            message: request.message,
            tx_hash: request.tx_hash,
            sent_at: self.now(),
            revealed: false,
        };

        match self.store.record_gift(&gift)? {
            GiftOutcome::Recorded(hash) => {
                tracing::info!(chain_id = %gift.chain_id, sender = %gift.sender, %hash, "gift sent");
                Ok(gift)
            }
            GiftOutcome::NotParticipant => Err(ChainError::NotParticipant(gift.sender).into()),
            GiftOutcome::WrongRecipient(_) => Err(ChainError::WrongRecipient(gift.recipient).into()),
            GiftOutcome::AlreadySent => Err(ChainError::GiftAlreadySent(gift.sender).into()),
            GiftOutcome::NotActive(status) => Err(ChainError::InvalidStatus(status).into()),
        }
    }

    /// Reveal every gift once the reveal date has passed. Returns the number
    /// of gifts in the chain.
    pub fn reveal_chain(&self, chain_id: &ChainId) -> anyhow::Result<usize> {
        let chain = self.load_chain(chain_id)?;

        if self.now() < chain.reveal_date {
            return Err(ChainError::RevealNotDue.into());
        }
        match chain.status {
            ChainStatus::Active => {
                if let StatusSwap::Mismatch(current) = self.store.set_chain_status_if(
                    chain_id,
                    ChainStatus::Active,
                    ChainStatus::Revealing,
                )? {
                    return Err(ChainError::InvalidStatus(current).into());
                }
            }
            ChainStatus::Revealing => {}
            other => return Err(ChainError::InvalidStatus(other).into()),
        }

        let revealed = self.store.reveal_gifts(chain_id)?;
        tracing::info!(%chain_id, revealed, "chain revealed");
        Ok(revealed)
    }

    /// Close a revealed chain.
    pub fn complete_chain(&self, chain_id: &ChainId) -> anyhow::Result<Chain> {
        let chain = self.load_chain(chain_id)?;

        if chain.status != ChainStatus::Revealing {
            return Err(ChainError::InvalidStatus(chain.status).into());
        }
        let pending = self
            .store
            .gifts_for_chain(chain_id)?
            .iter()
            .filter(|gift| !gift.revealed)
            .count();
        if pending > 0 {
            return Err(ChainError::GiftsPending(pending).into());
        }

        if let StatusSwap::Mismatch(current) = self.store.set_chain_status_if(
            chain_id,
            ChainStatus::Revealing,
            ChainStatus::Completed,
        )? {
            return Err(ChainError::InvalidStatus(current).into());
        }
        tracing::info!(%chain_id, "chain completed");

        self.load_chain(chain_id)
    }

    pub fn chain(&self, chain_id: &ChainId) -> anyhow::Result<Chain> {
        self.load_chain(chain_id)
    }

    /// Chains in `status`, newest first.
    pub fn list_chains(
        &self,
        status: ChainStatus,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<Chain>> {
        let mut chains: Vec<Chain> = self
            .store
            .list_chains()?
            .into_iter()
            .filter(|chain| chain.status == status)
            .collect();
        chains.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(chains.into_iter().skip(offset).take(limit).collect())
    }

    pub fn participants(&self, chain_id: &ChainId) -> anyhow::Result<Vec<Participant>> {
        Ok(self.store.list_participants(chain_id)?)
    }

    pub fn assigned_recipient(&self, chain_id: &ChainId, fid: Fid) -> anyhow::Result<Option<Fid>> {
        Ok(self
            .store
            .get_participant(chain_id, fid)?
            .and_then(|p| p.assigned_recipient))
    }

    pub fn all_gifts_sent(&self, chain_id: &ChainId) -> anyhow::Result<bool> {
        let participants = self.store.list_participants(chain_id)?;
        Ok(!participants.is_empty() && participants.iter().all(|p| p.has_sent_gift))
    }

    pub fn chain_stats(&self, chain_id: &ChainId) -> anyhow::Result<ChainStats> {
        let participants = self.store.list_participants(chain_id)?;
        let gifts = self.store.gifts_for_chain(chain_id)?;

        let total_participants = participants.len();
        let gifts_sent = participants.iter().filter(|p| p.has_sent_gift).count();
        let gifts_revealed = gifts.iter().filter(|g| g.revealed).count();
        let completion_percentage = if total_participants > 0 {
            ((gifts_sent as f64 / total_participants as f64) * 100.0).round() as u32
        } else {
            0
        };

        Ok(ChainStats {
            total_participants,
            gifts_sent,
            gifts_revealed,
            completion_percentage,
        })
    }

    /// Gifts `fid` sent or received, newest first.
    pub fn gifts_for_user(
        &self,
        fid: Fid,
        filter: GiftFilter,
        chain_id: Option<&ChainId>,
    ) -> anyhow::Result<Vec<GiftView>> {
        let gifts = match chain_id {
            Some(chain_id) => self.store.gifts_for_chain(chain_id)?,
            None => self.store.all_gifts()?,
        };

        let mut views: Vec<GiftView> = gifts
            .into_iter()
            .filter(|gift| match filter {
                GiftFilter::Sent => gift.sender == fid,
                GiftFilter::Received => gift.recipient == fid,
                GiftFilter::All => gift.sender == fid || gift.recipient == fid,
            })
            .map(|gift| GiftView {
                // hide sender until revealed
                sender: (gift.revealed || gift.recipient != fid).then_some(gift.sender),
                chain_id: gift.chain_id,
                recipient: gift.recipient,
                kind: gift.kind,
                message: gift.message,
                sent_at: gift.sent_at,
                revealed: gift.revealed,
            })
            .collect();
        views.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

        Ok(views)
    }
}
