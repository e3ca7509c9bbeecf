//! In-memory store with fault injection for engine tests
#![allow(dead_code)]

use gift_chain::error::StoreError;
use gift_chain::store::{ChainStore, MatchingStore, ParticipantStore, StatusSwap};
use gift_chain::types::{Chain, ChainId, ChainStatus, Currency, Fid, Participant, TimeStamp};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryStore {
    chains: Mutex<HashMap<ChainId, Chain>>,
    participants: Mutex<BTreeMap<(ChainId, Fid), Participant>>,
    // 1-based index of the assignment write that should fail
    fail_assignment_write: Mutex<Option<usize>>,
    assignment_writes: AtomicUsize,
    fail_status_write: AtomicBool,
    fail_clears: AtomicBool,
    claims: Mutex<HashSet<ChainId>>,
    // runs once, right before the next conditional status write
    before_status_write: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

pub fn test_chain(id: &str, status: ChainStatus, roster: &[u64]) -> Chain {
    Chain {
        id: ChainId::from(id),
        name: "Memory chain".into(),
        description: None,
        creator: Fid(roster.first().copied().unwrap_or(1)),
        min_amount: 1,
        max_amount: 100,
        currency: Currency::ETH,
        min_participants: 2,
        max_participants: 50,
        participant_count: roster.len() as u32,
        join_deadline: TimeStamp::new_with(2030, 12, 1, 0, 0, 0),
        reveal_date: TimeStamp::new_with(2030, 12, 24, 0, 0, 0),
        status,
        created_at: TimeStamp::new_with(2030, 11, 1, 0, 0, 0),
    }
}

impl MemoryStore {
    pub fn with_chain(id: &str, status: ChainStatus, roster: &[u64]) -> Self {
        let store = Self::default();
        store.insert_chain(test_chain(id, status, roster), roster);
        store
    }

    pub fn insert_chain(&self, chain: Chain, roster: &[u64]) {
        let mut participants = self.participants.lock().unwrap();
        for fid in roster {
            participants.insert(
                (chain.id.clone(), Fid(*fid)),
                Participant {
                    chain_id: chain.id.clone(),
                    fid: Fid(*fid),
                    assigned_recipient: None,
                    has_sent_gift: false,
                    gift_hash: None,
                    joined_at: TimeStamp::new_with(2030, 11, 2, 0, 0, 0),
                },
            );
        }
        self.chains.lock().unwrap().insert(chain.id.clone(), chain);
    }

    pub fn fail_on_assignment_write(&self, nth: usize) {
        *self.fail_assignment_write.lock().unwrap() = Some(nth);
    }

    pub fn fail_status_writes(&self) {
        self.fail_status_write.store(true, Ordering::SeqCst);
    }

    pub fn fail_clears(&self) {
        self.fail_clears.store(true, Ordering::SeqCst);
    }

    pub fn before_status_write<F: FnOnce() + Send + 'static>(&self, hook: F) {
        *self.before_status_write.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn is_claimed(&self, id: &str) -> bool {
        self.claims.lock().unwrap().contains(&ChainId::from(id))
    }

    pub fn status(&self, id: &str) -> ChainStatus {
        self.chains.lock().unwrap()[&ChainId::from(id)].status
    }

    /// giver -> assigned recipient for every participant of the chain
    pub fn assignments(&self, id: &str) -> BTreeMap<Fid, Option<Fid>> {
        let chain_id = ChainId::from(id);
        self.participants
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.chain_id == chain_id)
            .map(|p| (p.fid, p.assigned_recipient))
            .collect()
    }
}

impl ParticipantStore for MemoryStore {
    fn list_participants(&self, chain_id: &ChainId) -> Result<Vec<Participant>, StoreError> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .values()
            .filter(|p| &p.chain_id == chain_id)
            .cloned()
            .collect())
    }

    fn get_participant(
        &self,
        chain_id: &ChainId,
        fid: Fid,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .get(&(chain_id.clone(), fid))
            .cloned())
    }

    fn set_assigned_recipient(
        &self,
        chain_id: &ChainId,
        fid: Fid,
        recipient: Fid,
    ) -> Result<(), StoreError> {
        let nth = self.assignment_writes.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_assignment_write.lock().unwrap() == Some(nth) {
            return Err(StoreError::Backend(format!("injected failure on write {nth}")));
        }

        let mut participants = self.participants.lock().unwrap();
        let participant = participants
            .get_mut(&(chain_id.clone(), fid))
            .ok_or_else(|| StoreError::ParticipantNotFound {
                chain_id: chain_id.clone(),
                fid,
            })?;
        participant.assigned_recipient = Some(recipient);
        Ok(())
    }

    fn clear_assigned_recipient(&self, chain_id: &ChainId, fid: Fid) -> Result<(), StoreError> {
        if self.fail_clears.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected clear failure".into()));
        }
        if let Some(participant) = self
            .participants
            .lock()
            .unwrap()
            .get_mut(&(chain_id.clone(), fid))
        {
            participant.assigned_recipient = None;
        }
        Ok(())
    }
}

impl ChainStore for MemoryStore {
    fn get_chain(&self, chain_id: &ChainId) -> Result<Option<Chain>, StoreError> {
        Ok(self.chains.lock().unwrap().get(chain_id).cloned())
    }

    fn set_chain_status(&self, chain_id: &ChainId, status: ChainStatus) -> Result<(), StoreError> {
        let mut chains = self.chains.lock().unwrap();
        let chain = chains
            .get_mut(chain_id)
            .ok_or_else(|| StoreError::ChainNotFound(chain_id.clone()))?;
        chain.status = status;
        Ok(())
    }

    fn set_chain_status_if(
        &self,
        chain_id: &ChainId,
        expected: ChainStatus,
        status: ChainStatus,
    ) -> Result<StatusSwap, StoreError> {
        let hook = self.before_status_write.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if self.fail_status_write.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected status failure".into()));
        }
        let mut chains = self.chains.lock().unwrap();
        let chain = chains
            .get_mut(chain_id)
            .ok_or_else(|| StoreError::ChainNotFound(chain_id.clone()))?;
        if chain.status != expected {
            return Ok(StatusSwap::Mismatch(chain.status));
        }
        chain.status = status;
        Ok(StatusSwap::Swapped)
    }

    fn claim_matching(&self, chain_id: &ChainId) -> Result<bool, StoreError> {
        Ok(self.claims.lock().unwrap().insert(chain_id.clone()))
    }

    fn release_matching(&self, chain_id: &ChainId) -> Result<(), StoreError> {
        self.claims.lock().unwrap().remove(chain_id);
        Ok(())
    }
}

impl MatchingStore for MemoryStore {}
