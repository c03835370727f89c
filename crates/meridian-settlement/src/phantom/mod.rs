//! Sub-100 ms sealed-bid auction for price improvement over a CFMM baseline.
//!
//! The auction runs in two timed phases. During the commit window bidders
//! submit `SHA-256(bidder_id || price || nonce)` commitments; during the
//! trailing reveal window they disclose `(price, nonce)` pairs, which are
//! checked against the stored commitment. Bidders cannot observe each
//! other's prices before the reveal, so surplus that searchers would
//! otherwise capture is competed back to the user.
//!
//! Resolution is first-price over the verified reveals with ties broken by
//! earliest reveal. An improvement must clear `min_improvement_bps` to be
//! accepted and is clamped to `max_improvement_bps`; too few participants
//! or a blown deadline fall back to the baseline price.

use eyre::WrapErr as _;
use meridian_core::primitive::BidderId;
use rust_decimal::Decimal;
use sha2::{
    Digest as _,
    Sha256,
};
use tokio::{
    select,
    sync::mpsc,
    time::{
        sleep_until,
        Duration,
        Instant,
    },
};
use tracing::{
    debug,
    info,
    instrument,
};

use crate::config::PhantomConfig;

/// Mailbox depth for commits and reveals.
const CHANNEL_CAPACITY: usize = 64;

const BPS_SCALE: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Computes the commitment a bidder must publish during the commit phase.
#[must_use]
pub fn commitment_hash(bidder_id: &BidderId, price: Decimal, nonce: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bidder_id.as_str().as_bytes());
    hasher.update(price.to_string().as_bytes());
    hasher.update(nonce);
    hasher.finalize().into()
}

struct Commit {
    bidder_id: BidderId,
    commitment: [u8; 32],
}

struct Reveal {
    bidder_id: BidderId,
    price: Decimal,
    nonce: Vec<u8>,
}

/// Producer-side handle feeding a running phantom auction.
#[derive(Clone)]
pub struct PhantomHandle {
    commits: mpsc::Sender<Commit>,
    reveals: mpsc::Sender<Reveal>,
}

impl PhantomHandle {
    /// Submits a commitment for `bidder_id`.
    ///
    /// # Errors
    /// Returns an error if the auction is gone or its mailbox is full.
    pub fn commit(&self, bidder_id: BidderId, commitment: [u8; 32]) -> eyre::Result<()> {
        self.commits
            .try_send(Commit {
                bidder_id,
                commitment,
            })
            .wrap_err("failed to submit commitment: phantom auction gone or mailbox full")
    }

    /// Reveals the committed `(price, nonce)` pair for `bidder_id`.
    ///
    /// # Errors
    /// Returns an error if the auction is gone or its mailbox is full.
    pub fn reveal(
        &self,
        bidder_id: BidderId,
        price: Decimal,
        nonce: Vec<u8>,
    ) -> eyre::Result<()> {
        self.reveals
            .try_send(Reveal {
                bidder_id,
                price,
                nonce,
            })
            .wrap_err("failed to submit reveal: phantom auction gone or mailbox full")
    }
}

/// The winning phantom bid.
#[derive(Clone, Debug, PartialEq)]
pub struct PhantomBid {
    pub bidder_id: BidderId,
    /// The price the winner offered, before clamping.
    pub offered_price: Decimal,
}

/// Outcome of one phantom auction.
#[derive(Clone, Debug, PartialEq)]
pub struct PhantomResult {
    pub winning_bid: Option<PhantomBid>,
    /// The price settlement should use: the clamped improvement, or the
    /// baseline when no improvement stood.
    pub price: Decimal,
    pub amount: Decimal,
    /// Granted improvement over the baseline; zero without a winner.
    pub improvement_bps: Decimal,
    /// Number of bidders that revealed successfully.
    pub num_participants: usize,
    pub duration_ms: u64,
}

/// A single sealed-bid auction instance.
pub struct PhantomAuction {
    config: PhantomConfig,
    baseline_price: Decimal,
    amount: Decimal,
    commits: mpsc::Receiver<Commit>,
    reveals: mpsc::Receiver<Reveal>,
}

impl PhantomAuction {
    /// Creates an auction over `baseline_price` and the handle bidders use
    /// to participate.
    #[must_use]
    pub fn new(
        config: PhantomConfig,
        baseline_price: Decimal,
        amount: Decimal,
    ) -> (Self, PhantomHandle) {
        let (commits_tx, commits_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (reveals_tx, reveals_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                config,
                baseline_price,
                amount,
                commits: commits_rx,
                reveals: reveals_rx,
            },
            PhantomHandle {
                commits: commits_tx,
                reveals: reveals_tx,
            },
        )
    }

    /// Drives the auction to completion.
    ///
    /// `hard_deadline` is the settlement-wide budget: blowing it at any
    /// stage terminates the auction with a baseline (no improvement)
    /// result.
    #[instrument(skip_all, fields(baseline = %self.baseline_price))]
    pub async fn run(mut self, hard_deadline: Option<Instant>) -> PhantomResult {
        let started = Instant::now();
        let total = Duration::from_millis(self.config.max_auction_duration_ms);
        let reveal_window = Duration::from_millis(self.config.reveal_delay_ms).min(total);
        let commit_window = total - reveal_window;

        let commitments = self.collect_commits(started + commit_window, hard_deadline).await;
        if blew_deadline(hard_deadline) {
            debug!("deadline exceeded during commit phase");
            return self.no_improvement(started, 0);
        }

        let reveals = self
            .collect_reveals(&commitments, started + total, hard_deadline)
            .await;
        if blew_deadline(hard_deadline) {
            debug!("deadline exceeded during reveal phase");
            return self.no_improvement(started, reveals.len());
        }

        self.resolve(started, reveals)
    }

    async fn collect_commits(
        &mut self,
        phase_end: Instant,
        hard_deadline: Option<Instant>,
    ) -> Vec<(BidderId, [u8; 32])> {
        let mut commitments: Vec<(BidderId, [u8; 32])> = Vec::new();
        let timer = sleep_until(clamp_deadline(phase_end, hard_deadline));
        tokio::pin!(timer);
        loop {
            select! {
                () = &mut timer => break,
                commit = self.commits.recv() => {
                    let Some(Commit { bidder_id, commitment }) = commit else {
                        break;
                    };
                    // Re-commits replace the earlier commitment.
                    if let Some(entry) =
                        commitments.iter_mut().find(|(id, _)| *id == bidder_id)
                    {
                        entry.1 = commitment;
                    } else {
                        commitments.push((bidder_id, commitment));
                    }
                }
            }
        }
        commitments
    }

    async fn collect_reveals(
        &mut self,
        commitments: &[(BidderId, [u8; 32])],
        phase_end: Instant,
        hard_deadline: Option<Instant>,
    ) -> Vec<(BidderId, Decimal)> {
        let mut verified: Vec<(BidderId, Decimal)> = Vec::new();
        let timer = sleep_until(clamp_deadline(phase_end, hard_deadline));
        tokio::pin!(timer);
        loop {
            select! {
                () = &mut timer => break,
                reveal = self.reveals.recv() => {
                    let Some(Reveal { bidder_id, price, nonce }) = reveal else {
                        break;
                    };
                    let Some((_, commitment)) =
                        commitments.iter().find(|(id, _)| *id == bidder_id)
                    else {
                        debug!(%bidder_id, "dropping reveal without commitment");
                        continue;
                    };
                    if commitment_hash(&bidder_id, price, &nonce) != *commitment {
                        debug!(%bidder_id, "dropping reveal that does not match commitment");
                        continue;
                    }
                    if verified.iter().any(|(id, _)| *id == bidder_id) {
                        continue;
                    }
                    verified.push((bidder_id, price));
                }
            }
        }
        verified
    }

    /// First-price resolution over the verified reveals, earliest reveal
    /// winning ties.
    fn resolve(&self, started: Instant, reveals: Vec<(BidderId, Decimal)>) -> PhantomResult {
        let num_participants = reveals.len();
        if num_participants < self.config.min_participants {
            debug!(
                num_participants,
                min = self.config.min_participants,
                "not enough revealed bidders",
            );
            return self.no_improvement(started, num_participants);
        }
        // Strictly-greater keeps the earliest of equal prices in front.
        let Some((winner, offered_price)) = reveals
            .into_iter()
            .fold(None::<(BidderId, Decimal)>, |best, candidate| match best {
                Some(best) if best.1 >= candidate.1 => Some(best),
                _ => Some(candidate),
            })
        else {
            return self.no_improvement(started, num_participants);
        };

        if self.baseline_price <= Decimal::ZERO {
            return self.no_improvement(started, num_participants);
        }
        let raw_bps =
            (offered_price - self.baseline_price) / self.baseline_price * BPS_SCALE;
        if raw_bps < Decimal::from(self.config.min_improvement_bps) {
            debug!(%raw_bps, "improvement below acceptance floor");
            return self.no_improvement(started, num_participants);
        }
        let granted_bps = raw_bps.min(Decimal::from(self.config.max_improvement_bps));
        let price = self.baseline_price * (Decimal::ONE + granted_bps / BPS_SCALE);
        info!(
            winner = %winner,
            %offered_price,
            %granted_bps,
            "phantom auction improved on the baseline",
        );
        PhantomResult {
            winning_bid: Some(PhantomBid {
                bidder_id: winner,
                offered_price,
            }),
            price,
            amount: self.amount,
            improvement_bps: granted_bps,
            num_participants,
            duration_ms: elapsed_ms(started),
        }
    }

    fn no_improvement(&self, started: Instant, num_participants: usize) -> PhantomResult {
        PhantomResult {
            winning_bid: None,
            price: self.baseline_price,
            amount: self.amount,
            improvement_bps: Decimal::ZERO,
            num_participants,
            duration_ms: elapsed_ms(started),
        }
    }
}

fn clamp_deadline(phase_end: Instant, hard_deadline: Option<Instant>) -> Instant {
    hard_deadline.map_or(phase_end, |deadline| phase_end.min(deadline))
}

fn blew_deadline(hard_deadline: Option<Instant>) -> bool {
    hard_deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
