//! Random selection of a previously-unused, still-live thread.
//!
//! The picker runs two phases per forum: a cheap sampled pass over a few
//! random pages, then an exhaustive ascending scan as fallback. Sampling
//! spreads load across the whole board instead of hammering page 1; the
//! fallback guarantees a thread is only missed when every scanned page is
//! genuinely used or dead.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::client::ForumClient;
use crate::db::{self, Database};
use crate::extract::ThreadRef;

/// A committed pick: a live thread never handed out before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedThread {
    pub fid: u64,
    pub tid: u64,
    /// Resolved final URL of the thread, post-redirect.
    pub url: String,
}

/// Durable record of threads already used, keyed by `(fid, tid)`.
///
/// The ledger only grows; nothing in the core unmarks or expires entries.
#[async_trait]
pub trait UsedThreadLedger: Send + Sync {
    /// Membership test.
    async fn has_used(&self, fid: u64, tid: u64) -> Result<bool>;

    /// Record a pick. Idempotent; returns `false` when the pair was already
    /// present, meaning an earlier run or a concurrent selection got there
    /// first.
    async fn mark_used(&self, fid: u64, tid: u64, url: &str) -> Result<bool>;
}

#[async_trait]
impl UsedThreadLedger for Database {
    async fn has_used(&self, fid: u64, tid: u64) -> Result<bool> {
        db::has_used_thread(self.pool(), fid, tid).await
    }

    async fn mark_used(&self, fid: u64, tid: u64, url: &str) -> Result<bool> {
        db::mark_thread_used(self.pool(), fid, tid, url).await
    }
}

/// Pick one random unused live thread from the given forums.
///
/// Forums are visited once each in random order, first match wins. Within a
/// forum, up to `max_trials_per_forum` distinct pages are sampled uniformly
/// from the usable range (`min(max_pages_scan, reported max page)`), each
/// scanned in shuffled listing order; if the sampled pass yields nothing the
/// forum is re-scanned exhaustively, pages ascending, listing order as-is.
///
/// Threads already in the ledger are skipped. A candidate is validated
/// before being committed; dead threads are never marked, so transient
/// unavailability does not poison them for later calls.
///
/// Returns `Ok(None)` when every candidate forum is exhausted — a normal
/// outcome, not an error.
///
/// # Errors
///
/// Only ledger storage failures propagate. Fetch and parse failures degrade
/// inside the client per its contract and simply produce fewer candidates.
pub async fn pick_random_thread(
    client: &dyn ForumClient,
    ledger: &dyn UsedThreadLedger,
    forum_ids: &[u64],
    max_trials_per_forum: usize,
    max_pages_scan: u32,
) -> Result<Option<PickedThread>> {
    if forum_ids.is_empty() {
        return Ok(None);
    }

    // Duplicate ids collapse so each forum is visited at most once per call.
    let mut seen_forums = HashSet::new();
    let mut order: Vec<u64> = forum_ids
        .iter()
        .copied()
        .filter(|fid| seen_forums.insert(*fid))
        .collect();
    order.shuffle(&mut rand::thread_rng());

    for fid in order {
        let reported = client.forum_max_page(fid).await;
        let usable_max = reported.min(max_pages_scan).max(1);
        debug!(fid, reported, usable_max, "Scanning forum");

        // Sampling phase
        for page in sample_distinct_pages(usable_max, max_trials_per_forum) {
            let mut listing = client.threads_on_page(fid, page).await;
            listing.shuffle(&mut rand::thread_rng());
            if let Some(picked) = claim_first_unused(client, ledger, fid, &listing).await? {
                return Ok(Some(picked));
            }
        }

        // Exhaustive fallback
        for page in 1..=usable_max {
            let listing = client.threads_on_page(fid, page).await;
            if let Some(picked) = claim_first_unused(client, ledger, fid, &listing).await? {
                return Ok(Some(picked));
            }
        }

        debug!(fid, "Forum exhausted with no usable thread");
    }

    Ok(None)
}

/// Draw up to `max_trials` distinct page numbers uniformly from
/// `[1, max_page]`, in draw order. The number of draw attempts is capped at
/// `3 × max_trials` so a small page range cannot spin the loop forever.
fn sample_distinct_pages(max_page: u32, max_trials: usize) -> Vec<u32> {
    let want = max_trials.min(max_page as usize);
    let max_draws = max_trials.saturating_mul(3);

    let mut rng = rand::thread_rng();
    let mut seen = HashSet::new();
    let mut pages = Vec::with_capacity(want);
    let mut draws = 0;
    while pages.len() < want && draws < max_draws {
        draws += 1;
        let page = rng.gen_range(1..=max_page);
        if seen.insert(page) {
            pages.push(page);
        }
    }
    pages
}

/// Scan a listing in order, skipping used threads, and claim the first one
/// that validates as live.
async fn claim_first_unused(
    client: &dyn ForumClient,
    ledger: &dyn UsedThreadLedger,
    fid: u64,
    listing: &[ThreadRef],
) -> Result<Option<PickedThread>> {
    for thread in listing {
        if ledger.has_used(fid, thread.tid).await? {
            continue;
        }
        let Some(url) = client.validate_thread(thread.tid, Some(&thread.href)).await else {
            // Dead threads stay unmarked: unavailability can be transient.
            continue;
        };
        if ledger.mark_used(fid, thread.tid, &url).await? {
            return Ok(Some(PickedThread {
                fid,
                tid: thread.tid,
                url,
            }));
        }
        // The uniqueness constraint broke a concurrent claim in the other
        // caller's favor; this pick was not actually novel.
        debug!(fid, tid = thread.tid, "Lost claim race, continuing scan");
    }
    Ok(None)
}
