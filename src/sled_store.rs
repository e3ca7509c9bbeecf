//! sled backed participant, chain and gift storage
//!
//! Trees:
//! - `chains`: chain id -> CBOR [`Chain`]
//! - `participants`: `chain id / fid (big endian)` -> CBOR [`Participant`]
//! - `gifts`: sha256 of the gift's CBOR -> CBOR [`Gift`]
//! - `matching_claims`: chain id -> empty marker while a matching run holds it
use super::assignment::Assignment;
use super::error::StoreError;
use super::store::{ChainStore, CommitError, MatchingStore, ParticipantStore, StatusSwap};
use super::types::{Chain, ChainId, ChainStatus, Fid, Gift, Participant, TimeStamp};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use std::path::Path;
use std::sync::Arc;

pub struct SledStore {
    instance: Arc<Db>,
    chains: Tree,
    participants: Tree,
    gifts: Tree,
    claims: Tree,
}

/// Result of trying to add someone to a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(Chain),
    NotOpen(ChainStatus),
    Full(u32),
    AlreadyJoined,
}

/// Result of trying to record a sent gift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiftOutcome {
    /// Holds the gift's content hash.
    Recorded(String),
    NotParticipant,
    WrongRecipient(Option<Fid>),
    AlreadySent,
    /// Chain stopped accepting gifts, e.g. reveal already started.
    NotActive(ChainStatus),
}

// transaction abort reasons: a business rejection or a store failure
enum Abort<R> {
    Rejected(R),
    Store(StoreError),
}

type TxResult<T, R> = Result<T, ConflictableTransactionError<Abort<R>>>;

fn reject<T, R>(reason: R) -> TxResult<T, R> {
    Err(ConflictableTransactionError::Abort(Abort::Rejected(reason)))
}

fn abort_store<R>(err: StoreError) -> ConflictableTransactionError<Abort<R>> {
    ConflictableTransactionError::Abort(Abort::Store(err))
}

// collapse a transaction result into (committed value | rejection) or a store error
fn settle<T, R>(res: Result<T, TransactionError<Abort<R>>>) -> Result<Result<T, R>, StoreError> {
    match res {
        Ok(value) => Ok(Ok(value)),
        Err(TransactionError::Abort(Abort::Rejected(reason))) => Ok(Err(reason)),
        Err(TransactionError::Abort(Abort::Store(err))) => Err(err),
        Err(TransactionError::Storage(err)) => Err(err.into()),
    }
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(StoreError::encode)
}

fn decode<T>(bytes: &[u8]) -> Result<T, StoreError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

fn participant_prefix(chain_id: &ChainId) -> Vec<u8> {
    let mut key = chain_id.as_str().as_bytes().to_vec();
    key.push(b'/');
    key
}

fn participant_key(chain_id: &ChainId, fid: Fid) -> Vec<u8> {
    let mut key = participant_prefix(chain_id);
    key.extend_from_slice(&fid.get().to_be_bytes());
    key
}

impl SledStore {
    pub fn new(instance: Arc<Db>) -> Result<Self, StoreError> {
        let chains = instance.open_tree("chains")?;
        let participants = instance.open_tree("participants")?;
        let gifts = instance.open_tree("gifts")?;
        let claims = instance.open_tree("matching_claims")?;

        Ok(Self {
            instance,
            chains,
            participants,
            gifts,
            claims,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::new(Arc::new(sled::open(path)?))
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.instance.flush()?;
        Ok(())
    }

    /// Store a new chain with its creator as the first participant.
    pub fn create_chain(&self, chain: &Chain, now: &TimeStamp<Utc>) -> Result<Chain, StoreError> {
        let mut chain = chain.clone();
        chain.participant_count = 1;
        let creator = Participant {
            chain_id: chain.id.clone(),
            fid: chain.creator,
            assigned_recipient: None,
            has_sent_gift: false,
            gift_hash: None,
            joined_at: now.clone(),
        };

        let chain_key = chain.id.as_str().as_bytes();
        let chain_bytes = encode(&chain)?;
        let creator_key = participant_key(&chain.id, chain.creator);
        let creator_bytes = encode(&creator)?;

        let res = (&self.chains, &self.participants).transaction(|(chains, participants)| {
            chains.insert(chain_key, chain_bytes.clone())?;
            participants.insert(creator_key.as_slice(), creator_bytes.clone())?;
            Ok::<_, ConflictableTransactionError<Abort<()>>>(())
        });
        let _ = settle(res)?;

        Ok(chain)
    }

    /// Add `fid` to an open chain that still has room.
    pub fn add_participant(
        &self,
        chain_id: &ChainId,
        fid: Fid,
        now: &TimeStamp<Utc>,
    ) -> Result<JoinOutcome, StoreError> {
        let participant = Participant {
            chain_id: chain_id.clone(),
            fid,
            assigned_recipient: None,
            has_sent_gift: false,
            gift_hash: None,
            joined_at: now.clone(),
        };
        let chain_key = chain_id.as_str().as_bytes();
        let key = participant_key(chain_id, fid);
        let bytes = encode(&participant)?;

        let res = (&self.chains, &self.participants).transaction(|(chains, participants)| {
            let Some(raw) = chains.get(chain_key)? else {
                return Err(abort_store(StoreError::ChainNotFound(chain_id.clone())));
            };
            let mut chain: Chain = decode(&raw).map_err(abort_store)?;

            if chain.status != ChainStatus::Open {
                return reject(JoinOutcome::NotOpen(chain.status));
            }
            if chain.participant_count >= chain.max_participants {
                return reject(JoinOutcome::Full(chain.max_participants));
            }
            if participants.get(key.as_slice())?.is_some() {
                return reject(JoinOutcome::AlreadyJoined);
            }

            participants.insert(key.as_slice(), bytes.clone())?;
            chain.participant_count += 1;
            chains.insert(chain_key, encode(&chain).map_err(abort_store)?)?;
            Ok(chain)
        });

        Ok(match settle(res)? {
            Ok(chain) => JoinOutcome::Joined(chain),
            Err(outcome) => outcome,
        })
    }

    pub fn list_chains(&self) -> Result<Vec<Chain>, StoreError> {
        self.chains
            .iter()
            .values()
            .map(|raw| decode(&raw?))
            .collect()
    }

    /// Store `gift` and mark its sender as done, after re-checking that the
    /// chain is still active, the sender is assigned to the gift's recipient
    /// and has not sent yet.
    pub fn record_gift(&self, gift: &Gift) -> Result<GiftOutcome, StoreError> {
        let (hash, cbor) = gift.build()?;
        let chain_key = gift.chain_id.as_str().as_bytes();
        let key = participant_key(&gift.chain_id, gift.sender);

        let trees = (&self.chains, &self.participants, &self.gifts);
        let res = trees.transaction(|(chains, participants, gifts)| {
            let Some(raw) = chains.get(chain_key)? else {
                return Err(abort_store(StoreError::ChainNotFound(gift.chain_id.clone())));
            };
            let chain: Chain = decode(&raw).map_err(abort_store)?;
            // reveal flips the status in this tree first, so a gift either
            // lands before the reveal batch or is refused
            if chain.status != ChainStatus::Active {
                return reject(GiftOutcome::NotActive(chain.status));
            }

            let Some(raw) = participants.get(key.as_slice())? else {
                return reject(GiftOutcome::NotParticipant);
            };
            let mut sender: Participant = decode(&raw).map_err(abort_store)?;

            if sender.has_sent_gift {
                return reject(GiftOutcome::AlreadySent);
            }
            if sender.assigned_recipient != Some(gift.recipient) {
                return reject(GiftOutcome::WrongRecipient(sender.assigned_recipient));
            }

            sender.has_sent_gift = true;
            sender.gift_hash = Some(hash.clone());
            participants.insert(key.as_slice(), encode(&sender).map_err(abort_store)?)?;
            gifts.insert(hash.as_bytes(), cbor.clone())?;
            Ok(())
        });

        Ok(match settle(res)? {
            Ok(()) => GiftOutcome::Recorded(hash),
            Err(outcome) => outcome,
        })
    }

    pub fn get_gift(&self, hash: &str) -> Result<Option<Gift>, StoreError> {
        self.gifts
            .get(hash.as_bytes())?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// Every gift sent in `chain_id`.
    pub fn gifts_for_chain(&self, chain_id: &ChainId) -> Result<Vec<Gift>, StoreError> {
        let mut gifts = Vec::new();
        for participant in self.list_participants(chain_id)? {
            if let Some(hash) = participant.gift_hash {
                if let Some(gift) = self.get_gift(&hash)? {
                    gifts.push(gift);
                }
            }
        }
        Ok(gifts)
    }

    pub fn all_gifts(&self) -> Result<Vec<Gift>, StoreError> {
        self.gifts
            .iter()
            .values()
            .map(|raw| decode(&raw?))
            .collect()
    }

    /// Flag every gift of the chain as revealed in one batch. Returns how
    /// many gifts the chain has.
    pub fn reveal_gifts(&self, chain_id: &ChainId) -> Result<usize, StoreError> {
        let mut batch = Batch::default();
        let mut count = 0;

        for participant in self.list_participants(chain_id)? {
            let Some(hash) = participant.gift_hash else {
                continue;
            };
            let Some(mut gift) = self.get_gift(&hash)? else {
                continue;
            };
            count += 1;
            if !gift.revealed {
                gift.revealed = true;
                batch.insert(hash.as_bytes(), encode(&gift)?);
            }
        }
        self.gifts.apply_batch(batch)?;

        Ok(count)
    }

    fn update_participant<F>(&self, chain_id: &ChainId, fid: Fid, update: F) -> Result<(), StoreError>
    where
        F: Fn(&mut Participant),
    {
        let key = participant_key(chain_id, fid);
        let res = self.participants.transaction(|tx| {
            let Some(raw) = tx.get(key.as_slice())? else {
                return Err(abort_store::<()>(StoreError::ParticipantNotFound {
                    chain_id: chain_id.clone(),
                    fid,
                }));
            };
            let mut participant: Participant = decode(&raw).map_err(abort_store)?;
            update(&mut participant);
            tx.insert(key.as_slice(), encode(&participant).map_err(abort_store)?)?;
            Ok(())
        });
        let _ = settle(res)?;
        Ok(())
    }
}

impl ParticipantStore for SledStore {
    fn list_participants(&self, chain_id: &ChainId) -> Result<Vec<Participant>, StoreError> {
        self.participants
            .scan_prefix(participant_prefix(chain_id))
            .values()
            .map(|raw| decode(&raw?))
            .collect()
    }

    fn get_participant(
        &self,
        chain_id: &ChainId,
        fid: Fid,
    ) -> Result<Option<Participant>, StoreError> {
        self.participants
            .get(participant_key(chain_id, fid))?
            .map(|raw| decode(&raw))
            .transpose()
    }

    fn set_assigned_recipient(
        &self,
        chain_id: &ChainId,
        fid: Fid,
        recipient: Fid,
    ) -> Result<(), StoreError> {
        self.update_participant(chain_id, fid, |p| p.assigned_recipient = Some(recipient))
    }

    fn clear_assigned_recipient(&self, chain_id: &ChainId, fid: Fid) -> Result<(), StoreError> {
        self.update_participant(chain_id, fid, |p| p.assigned_recipient = None)
    }
}

impl ChainStore for SledStore {
    fn get_chain(&self, chain_id: &ChainId) -> Result<Option<Chain>, StoreError> {
        self.chains
            .get(chain_id.as_str().as_bytes())?
            .map(|raw| decode(&raw))
            .transpose()
    }

    fn set_chain_status(&self, chain_id: &ChainId, status: ChainStatus) -> Result<(), StoreError> {
        let key = chain_id.as_str().as_bytes();
        let res = self.chains.transaction(|tx| {
            let Some(raw) = tx.get(key)? else {
                return Err(abort_store::<()>(StoreError::ChainNotFound(chain_id.clone())));
            };
            let mut chain: Chain = decode(&raw).map_err(abort_store)?;
            chain.status = status;
            tx.insert(key, encode(&chain).map_err(abort_store)?)?;
            Ok(())
        });
        let _ = settle(res)?;
        Ok(())
    }

    fn set_chain_status_if(
        &self,
        chain_id: &ChainId,
        expected: ChainStatus,
        status: ChainStatus,
    ) -> Result<StatusSwap, StoreError> {
        let key = chain_id.as_str().as_bytes();
        let res = self.chains.transaction(|tx| {
            let Some(raw) = tx.get(key)? else {
                return Err(abort_store(StoreError::ChainNotFound(chain_id.clone())));
            };
            let mut chain: Chain = decode(&raw).map_err(abort_store)?;
            if chain.status != expected {
                return reject(chain.status);
            }
            chain.status = status;
            tx.insert(key, encode(&chain).map_err(abort_store)?)?;
            Ok(())
        });

        Ok(match settle(res)? {
            Ok(()) => StatusSwap::Swapped,
            Err(current) => StatusSwap::Mismatch(current),
        })
    }

    fn claim_matching(&self, chain_id: &ChainId) -> Result<bool, StoreError> {
        let claimed = self.claims.compare_and_swap(
            chain_id.as_str().as_bytes(),
            None as Option<&[u8]>,
            Some(&b""[..]),
        )?;
        Ok(claimed.is_ok())
    }

    fn release_matching(&self, chain_id: &ChainId) -> Result<(), StoreError> {
        self.claims.remove(chain_id.as_str().as_bytes())?;
        Ok(())
    }
}

impl MatchingStore for SledStore {
    /// All assignment writes and the status flip happen in one transaction,
    /// so a failure leaves nothing behind.
    fn commit_matching(
        &self,
        chain_id: &ChainId,
        expected: ChainStatus,
        assignment: &Assignment,
    ) -> Result<(), CommitError> {
        let chain_key = chain_id.as_str().as_bytes();

        let res = (&self.chains, &self.participants).transaction(|(chains, participants)| {
            let Some(raw) = chains.get(chain_key)? else {
                return Err(abort_store(StoreError::ChainNotFound(chain_id.clone())));
            };
            let mut chain: Chain = decode(&raw).map_err(abort_store)?;
            if chain.status != expected {
                return reject(chain.status);
            }
            if chain.participant_count as usize != assignment.len() {
                return Err(abort_store(StoreError::RosterChanged {
                    chain_id: chain_id.clone(),
                    expected: chain.participant_count,
                    assigned: assignment.len(),
                }));
            }

            for (giver, receiver) in assignment.pairs() {
                let key = participant_key(chain_id, giver);
                let Some(raw) = participants.get(key.as_slice())? else {
                    return Err(abort_store(StoreError::ParticipantNotFound {
                        chain_id: chain_id.clone(),
                        fid: giver,
                    }));
                };
                let mut participant: Participant = decode(&raw).map_err(abort_store)?;
                participant.assigned_recipient = Some(receiver);
                participants.insert(key, encode(&participant).map_err(abort_store)?)?;
            }

            chain.status = ChainStatus::Active;
            chains.insert(chain_key, encode(&chain).map_err(abort_store)?)?;
            Ok(())
        });

        match settle(res)? {
            Ok(()) => Ok(()),
            Err(current) => Err(CommitError::Conflict {
                current,
                rolled_back: true,
            }),
        }
    }
}
