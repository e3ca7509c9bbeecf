//! Chain drafts and creation rules
use super::config::ServiceConfig;
use super::error::ChainError;
use super::types::{Chain, ChainId, ChainStatus, Currency, Fid, TimeStamp};
use chrono::Utc;

// Used for constructing drafts before a chain is stored
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChainDetails {
    name: Option<String>,
    description: Option<String>,
    creator: Option<Fid>,
    min_amount: u64,
    max_amount: u64,
    currency: Option<Currency>,
    min_participants: Option<u32>,
    max_participants: Option<u32>,
    join_deadline: Option<TimeStamp<Utc>>,
    reveal_date: Option<TimeStamp<Utc>>,
}

impl ChainDetails {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = Some(name.trim().to_owned());
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }
    pub fn set_creator(mut self, creator: Fid) -> Self {
        self.creator = Some(creator);
        self
    }
    pub fn set_amounts(mut self, min: u64, max: u64) -> Self {
        self.min_amount = min;
        self.max_amount = max;
        self
    }
    pub fn set_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }
    pub fn set_participant_bounds(mut self, min: u32, max: u32) -> Self {
        self.min_participants = Some(min);
        self.max_participants = Some(max);
        self
    }
    pub fn set_join_deadline(mut self, date: TimeStamp<Utc>) -> Self {
        self.join_deadline = Some(date);
        self
    }
    pub fn set_reveal_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.reveal_date = Some(date);
        self
    }
    pub fn creator(&self) -> Option<Fid> {
        self.creator
    }

    /// Checks every creation rule against `now` and the configured roster
    /// bounds, then produces an `open` chain with no participants yet.
    pub fn validate_and_finalise(
        self,
        id: ChainId,
        config: &ServiceConfig,
        now: &TimeStamp<Utc>,
    ) -> Result<Chain, ChainError> {
        let name = self.name.ok_or(ChainError::MissingField("name"))?;
        let name_len = name.chars().count();
        if !(3..=100).contains(&name_len) {
            return Err(ChainError::InvalidName);
        }
        if let Some(description) = &self.description {
            if description.chars().count() > 500 {
                return Err(ChainError::DescriptionTooLong);
            }
        }
        let creator = self.creator.ok_or(ChainError::MissingField("creator"))?;

        if self.min_amount == 0 || self.max_amount == 0 || self.min_amount > self.max_amount {
            return Err(ChainError::InvalidAmounts);
        }

        let min = self
            .min_participants
            .unwrap_or(config.default_min_participants);
        let max = self
            .max_participants
            .unwrap_or(config.default_max_participants);
        let floor = config.min_participants;
        let ceiling = config.max_participants;
        if min < floor || max > ceiling || min > max {
            return Err(ChainError::InvalidParticipantBounds {
                min,
                max,
                floor,
                ceiling,
            });
        }

        let join_deadline = self
            .join_deadline
            .ok_or(ChainError::MissingField("join_deadline"))?;
        let reveal_date = self
            .reveal_date
            .ok_or(ChainError::MissingField("reveal_date"))?;
        if join_deadline <= *now {
            return Err(ChainError::JoinDeadlineInPast);
        }
        if reveal_date <= join_deadline {
            return Err(ChainError::RevealBeforeJoinDeadline);
        }

        Ok(Chain {
            id,
            name,
            description: self.description,
            creator,
            min_amount: self.min_amount,
            max_amount: self.max_amount,
            currency: self.currency.unwrap_or(Currency::ETH),
            min_participants: min,
            max_participants: max,
            participant_count: 0,
            join_deadline,
            reveal_date,
            status: ChainStatus::Open,
            created_at: now.clone(),
        })
    }
}
