//! Walks one chain from creation to completion against a throwaway sled db.
//!
//! Run with `RUST_LOG=debug` for engine output. The clock is shifted forward
//! by hand so the reveal date can pass without waiting.

use chrono::{Duration, Utc};
use gift_chain::chain::ChainDetails;
use gift_chain::config::ServiceConfig;
use gift_chain::service::{ChainService, Clock, GiftFilter, GiftRequest};
use gift_chain::sled_store::SledStore;
use gift_chain::types::{Currency, Fid, GiftKind, TimeStamp};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,gift_chain=debug")),
        )
        .init();

    let temp_dir = tempfile::tempdir()?;
    let mut config = ServiceConfig::from_env();
    config.db_path = temp_dir.path().join("gift_chain.db");
    tracing::info!(db_path = %config.db_path.display(), "opening store");

    let store = Arc::new(SledStore::open(&config.db_path)?);

    // seconds added to the wall clock
    let skew = Arc::new(AtomicI64::new(0));
    let clock_skew = skew.clone();
    let clock: Clock = Arc::new(move || {
        (Utc::now() + Duration::seconds(clock_skew.load(Ordering::SeqCst))).into()
    });
    let service = ChainService::with_clock(store.clone(), config, clock);

    let today = Utc::now();
    let chain = service.create_chain(
        ChainDetails::new()
            .set_name("Demo Secret Santa")
            .set_description("Five friends, one ring")
            .set_creator(Fid(1))
            .set_amounts(5, 25)
            .set_currency(Currency::USDC)
            .set_join_deadline(TimeStamp::from(today + Duration::days(7)))
            .set_reveal_date(TimeStamp::from(today + Duration::days(14))),
    )?;

    for fid in 2..=5 {
        service.join_chain(&chain.id, Fid(fid))?;
    }

    let assignment = service.start_matching(&chain.id, Fid(1))?;
    for (giver, receiver) in assignment.pairs() {
        tracing::debug!(%giver, %receiver, "assigned");
    }

    for (giver, receiver) in assignment.pairs() {
        service.send_gift(GiftRequest {
            chain_id: chain.id.clone(),
            sender: giver,
            recipient: receiver,
            kind: GiftKind::Crypto {
                amount: 10 + giver.get(),
                currency: Currency::USDC,
            },
            message: Some(format!("From your secret santa, to {receiver}")),
            tx_hash: None,
        })?;
    }

    let hidden = service.gifts_for_user(Fid(1), GiftFilter::Received, Some(&chain.id))?;
    tracing::info!(sender = ?hidden[0].sender, "before reveal");

    skew.store(Duration::days(15).num_seconds(), Ordering::SeqCst);
    let revealed = service.reveal_chain(&chain.id)?;
    let shown = service.gifts_for_user(Fid(1), GiftFilter::Received, Some(&chain.id))?;
    tracing::info!(revealed, sender = ?shown[0].sender, "after reveal");

    let stats = service.chain_stats(&chain.id)?;
    let done = service.complete_chain(&chain.id)?;
    tracing::info!(
        chain_id = %done.id,
        status = %done.status,
        completion = stats.completion_percentage,
        "chain finished"
    );

    store.flush()?;
    Ok(())
}
