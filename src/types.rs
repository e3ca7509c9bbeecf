//! Core records shared by the store, the matching engine and the service
use super::error::StoreError;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// Social-network account id of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fid(pub u64);

/// Opaque chain identifier, a bech32 encoded uuid7 (`chain_1...`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainId(String);

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// chrono's Utc has no ordering of its own, so compare the instants
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainStatus {
    #[n(0)]
    Open,
    #[n(1)]
    Matching,
    #[n(2)]
    Active,
    // identities visible; the legacy name "revealed" maps here
    #[n(3)]
    Revealing,
    #[n(4)]
    Completed,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    #[n(0)]
    ETH,
    #[n(1)]
    USDC,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    #[n(0)]
    pub id: ChainId,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub description: Option<String>,
    #[n(3)]
    pub creator: Fid,
    #[n(4)]
    pub min_amount: u64, // smallest currency unit
    #[n(5)]
    pub max_amount: u64,
    #[n(6)]
    pub currency: Currency,
    #[n(7)]
    pub min_participants: u32,
    #[n(8)]
    pub max_participants: u32,
    #[n(9)]
    pub participant_count: u32,
    #[n(10)]
    pub join_deadline: TimeStamp<Utc>,
    #[n(11)]
    pub reveal_date: TimeStamp<Utc>,
    #[n(12)]
    pub status: ChainStatus,
    #[n(13)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    #[n(0)]
    pub chain_id: ChainId,
    #[n(1)]
    pub fid: Fid,
    #[n(2)]
    pub assigned_recipient: Option<Fid>,
    #[n(3)]
    pub has_sent_gift: bool,
    #[n(4)]
    pub gift_hash: Option<String>, // key of the sent gift in the gifts tree
    #[n(5)]
    pub joined_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum GiftKind {
    #[n(0)]
    Crypto {
        #[n(0)]
        amount: u64,
        #[n(1)]
        currency: Currency,
    },
    #[n(1)]
    Nft {
        #[n(0)]
        token_address: String,
        #[n(1)]
        token_id: String,
    },
    #[n(2)]
    Message,
}

// Key is the hash of this struct encoded into CBOR at send time
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Gift {
    #[n(0)]
    pub chain_id: ChainId,
    #[n(1)]
    pub sender: Fid,
    #[n(2)]
    pub recipient: Fid,
    #[n(3)]
    pub kind: GiftKind,
    #[n(4)]
    pub message: Option<String>,
    #[n(5)]
    pub tx_hash: Option<String>,
    #[n(6)]
    pub sent_at: TimeStamp<Utc>,
    #[n(7)]
    pub revealed: bool,
}

impl Fid {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for Fid {
    fn from(value: u64) -> Self {
        Fid(value)
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ChainId {
    /// Mint a fresh identifier.
    pub fn generate() -> anyhow::Result<Self> {
        Ok(Self(crate::utils::new_uuid_to_bech32("chain_")?))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChainId {
    fn from(value: String) -> Self {
        ChainId(value)
    }
}

impl From<&str> for ChainId {
    fn from(value: &str) -> Self {
        ChainId(value.to_owned())
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::Open => "open",
            ChainStatus::Matching => "matching",
            ChainStatus::Active => "active",
            ChainStatus::Revealing => "revealing",
            ChainStatus::Completed => "completed",
        }
    }
    /// True once an assignment has been committed for the chain.
    pub fn is_matched(&self) -> bool {
        matches!(
            self,
            ChainStatus::Active | ChainStatus::Revealing | ChainStatus::Completed
        )
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ChainStatus::Open),
            "matching" => Ok(ChainStatus::Matching),
            "active" => Ok(ChainStatus::Active),
            "revealing" | "revealed" => Ok(ChainStatus::Revealing),
            "completed" => Ok(ChainStatus::Completed),
            other => Err(anyhow::anyhow!("unknown chain status: {other}")),
        }
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .unwrap_or_default()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl<C> minicbor::Encode<C> for Fid {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.u64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Fid {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Fid(d.u64()?))
    }
}

impl<C> minicbor::Encode<C> for ChainId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for ChainId {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(ChainId(d.str()?.to_owned()))
    }
}

impl Gift {
    /// Encode the gift and derive its content address.
    pub fn build(&self) -> Result<(String, Vec<u8>), StoreError> {
        let cbor = minicbor::to_vec(self).map_err(StoreError::encode)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn timestamps_order_by_instant() {
        let deadline = TimeStamp::new_with(2025, 12, 10, 0, 0, 0);
        let before = TimeStamp::new_with(2025, 12, 9, 23, 59, 59);
        let after = TimeStamp::new_with(2025, 12, 24, 0, 0, 0);

        assert!(before < deadline);
        assert!(deadline <= deadline.clone());
        assert!(after > deadline);

        let mut dates = vec![after.clone(), before.clone(), deadline.clone()];
        dates.sort_by(|a, b| b.cmp(a));
        assert_eq!(dates, vec![after, deadline, before]);
    }

    #[test]
    fn legacy_revealed_status_parses_as_revealing() {
        assert_eq!(
            "revealed".parse::<ChainStatus>().unwrap(),
            ChainStatus::Revealing
        );
        assert_eq!(
            "revealing".parse::<ChainStatus>().unwrap(),
            ChainStatus::Revealing
        );
        assert!("pending".parse::<ChainStatus>().is_err());
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            ChainStatus::Open,
            ChainStatus::Matching,
            ChainStatus::Active,
            ChainStatus::Revealing,
            ChainStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<ChainStatus>().unwrap(), status);
        }
    }

    #[test]
    fn gift_hash_changes_with_contents() {
        let gift = Gift {
            chain_id: ChainId::from("chain_test"),
            sender: Fid(1),
            recipient: Fid(2),
            kind: GiftKind::Message,
            message: Some("happy holidays".into()),
            tx_hash: None,
            sent_at: TimeStamp::new_with(2025, 12, 1, 0, 0, 0),
            revealed: false,
        };
        let mut other = gift.clone();
        other.recipient = Fid(3);

        let (hash_a, cbor) = gift.build().unwrap();
        let (hash_b, _) = other.build().unwrap();

        assert_ne!(hash_a, hash_b);
        let decoded: Gift = minicbor::decode(&cbor).unwrap();
        assert_eq!(decoded, gift);
    }
}
