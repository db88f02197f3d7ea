//! Integration tests for the thread selection engine, using an in-memory
//! ledger and a scripted forum client.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use discuz_bot::client::{ActionOutcome, ForumClient, Profile};
use discuz_bot::extract::ThreadRef;
use discuz_bot::picker::{pick_random_thread, PickedThread, UsedThreadLedger};

/// Scripted forum: `fid -> pages`, each page a list of thread ids. Threads
/// listed in `dead` fail validation.
struct FakeForumClient {
    forums: HashMap<u64, Vec<Vec<u64>>>,
    dead: HashSet<u64>,
}

impl FakeForumClient {
    fn new(forums: Vec<(u64, Vec<Vec<u64>>)>) -> Self {
        Self {
            forums: forums.into_iter().collect(),
            dead: HashSet::new(),
        }
    }

    fn with_dead(mut self, dead: &[u64]) -> Self {
        self.dead = dead.iter().copied().collect();
        self
    }
}

#[async_trait]
impl ForumClient for FakeForumClient {
    async fn login(&self, _username: &str, _password: &str) -> bool {
        true
    }

    async fn check_logged_in(&self) -> bool {
        true
    }

    async fn try_checkin(&self) -> ActionOutcome {
        ActionOutcome::success("OK")
    }

    async fn reply(&self, _tid: u64, _message: &str) -> ActionOutcome {
        ActionOutcome::success("OK")
    }

    async fn fetch_profile(&self) -> Option<Profile> {
        Some(Profile::default())
    }

    async fn forum_max_page(&self, fid: u64) -> u32 {
        self.forums
            .get(&fid)
            .map_or(1, |pages| u32::try_from(pages.len().max(1)).unwrap())
    }

    async fn threads_on_page(&self, fid: u64, page: u32) -> Vec<ThreadRef> {
        self.forums
            .get(&fid)
            .and_then(|pages| pages.get(page as usize - 1))
            .map(|tids| {
                tids.iter()
                    .map(|tid| ThreadRef {
                        tid: *tid,
                        href: format!("/thread-{tid}-1-1.html"),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn validate_thread(&self, tid: u64, href: Option<&str>) -> Option<String> {
        if self.dead.contains(&tid) {
            return None;
        }
        Some(format!(
            "https://forum.test{}",
            href.map_or_else(|| format!("/thread-{tid}-1-1.html"), str::to_string)
        ))
    }

    fn absolute_url(&self, path: &str) -> String {
        format!("https://forum.test{path}")
    }
}

/// In-memory ledger with the same claim semantics as the sqlite one.
#[derive(Default)]
struct MemLedger {
    used: Mutex<HashMap<(u64, u64), String>>,
}

#[async_trait]
impl UsedThreadLedger for MemLedger {
    async fn has_used(&self, fid: u64, tid: u64) -> Result<bool> {
        Ok(self.used.lock().unwrap().contains_key(&(fid, tid)))
    }

    async fn mark_used(&self, fid: u64, tid: u64, url: &str) -> Result<bool> {
        let mut used = self.used.lock().unwrap();
        if used.contains_key(&(fid, tid)) {
            return Ok(false);
        }
        used.insert((fid, tid), url.to_string());
        Ok(true)
    }
}

/// Ledger that refuses every claim, simulating a concurrent selection always
/// winning the mark race.
struct AlwaysClaimedLedger;

#[async_trait]
impl UsedThreadLedger for AlwaysClaimedLedger {
    async fn has_used(&self, _fid: u64, _tid: u64) -> Result<bool> {
        Ok(false)
    }

    async fn mark_used(&self, _fid: u64, _tid: u64, _url: &str) -> Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_empty_forum_set_returns_none() {
    let client = FakeForumClient::new(vec![]);
    let ledger = MemLedger::default();
    let picked = pick_random_thread(&client, &ledger, &[], 5, 2).await.unwrap();
    assert!(picked.is_none());
}

#[tokio::test]
async fn test_forums_without_threads_return_none() {
    let client = FakeForumClient::new(vec![(1, vec![vec![]]), (2, vec![])]);
    let ledger = MemLedger::default();
    let picked = pick_random_thread(&client, &ledger, &[1, 2], 5, 2)
        .await
        .unwrap();
    assert!(picked.is_none());
}

#[tokio::test]
async fn test_pick_drains_candidates_then_exhausts() {
    // Forum 1 holds threads {1, 2}, forum 2 holds {10}.
    let client = FakeForumClient::new(vec![(1, vec![vec![1, 2]]), (2, vec![vec![10]])]);
    let ledger = MemLedger::default();
    let valid: HashSet<(u64, u64)> = [(1, 1), (1, 2), (2, 10)].into_iter().collect();

    let first = pick_random_thread(&client, &ledger, &[1, 2], 5, 2)
        .await
        .unwrap()
        .expect("First pick must succeed");
    assert!(valid.contains(&(first.fid, first.tid)));
    assert_eq!(
        first.url,
        format!("https://forum.test/thread-{}-1-1.html", first.tid)
    );

    let second = pick_random_thread(&client, &ledger, &[1, 2], 5, 2)
        .await
        .unwrap()
        .expect("Second pick must succeed");
    assert!(valid.contains(&(second.fid, second.tid)));
    assert_ne!((second.fid, second.tid), (first.fid, first.tid));

    let third = pick_random_thread(&client, &ledger, &[1, 2], 5, 2)
        .await
        .unwrap()
        .expect("Third pick must succeed");
    let picked: HashSet<(u64, u64)> = [first, second, third]
        .iter()
        .map(|p| (p.fid, p.tid))
        .collect();
    assert_eq!(picked, valid);

    // All candidates are in the ledger now.
    let exhausted = pick_random_thread(&client, &ledger, &[1, 2], 5, 2)
        .await
        .unwrap();
    assert!(exhausted.is_none());
}

#[tokio::test]
async fn test_never_returns_a_thread_twice() {
    let client = FakeForumClient::new(vec![(1, vec![vec![1, 2, 3], vec![4, 5]]), (2, vec![vec![10, 11]])]);
    let ledger = MemLedger::default();

    let mut seen: HashSet<(u64, u64)> = HashSet::new();
    loop {
        match pick_random_thread(&client, &ledger, &[1, 2], 3, 10)
            .await
            .unwrap()
        {
            Some(PickedThread { fid, tid, .. }) => {
                assert!(seen.insert((fid, tid)), "thread ({fid}, {tid}) returned twice");
            }
            None => break,
        }
    }
    assert_eq!(seen.len(), 7);
}

#[tokio::test]
async fn test_already_used_threads_are_skipped() {
    let client = FakeForumClient::new(vec![(1, vec![vec![1, 2]])]);
    let ledger = MemLedger::default();
    ledger.mark_used(1, 1, "seeded").await.unwrap();

    let picked = pick_random_thread(&client, &ledger, &[1], 5, 2)
        .await
        .unwrap()
        .expect("Must pick the remaining thread");
    assert_eq!((picked.fid, picked.tid), (1, 2));
}

#[tokio::test]
async fn test_dead_threads_are_skipped_and_never_marked() {
    let client = FakeForumClient::new(vec![(1, vec![vec![1, 2]])]).with_dead(&[1]);
    let ledger = MemLedger::default();

    let picked = pick_random_thread(&client, &ledger, &[1], 5, 2)
        .await
        .unwrap()
        .expect("The live thread must be picked");
    assert_eq!((picked.fid, picked.tid), (1, 2));

    // The dead thread was not recorded, so it stays eligible for a later
    // call once it comes back to life; with it still dead, we exhaust.
    assert!(!ledger.has_used(1, 1).await.unwrap());
    let next = pick_random_thread(&client, &ledger, &[1], 5, 2).await.unwrap();
    assert!(next.is_none());
    assert!(!ledger.has_used(1, 1).await.unwrap());
}

#[tokio::test]
async fn test_thread_beyond_sampled_pages_is_found_by_fallback() {
    // Five pages; only the last page holds an unused thread. Whatever the
    // sampling phase draws, the ascending fallback must reach page 5.
    let client = FakeForumClient::new(vec![(1, vec![vec![], vec![], vec![], vec![], vec![42]])]);
    let ledger = MemLedger::default();

    let picked = pick_random_thread(&client, &ledger, &[1], 2, 10)
        .await
        .unwrap()
        .expect("Fallback scan must find the thread");
    assert_eq!((picked.fid, picked.tid), (1, 42));
}

#[tokio::test]
async fn test_max_pages_scan_caps_the_range() {
    // The only thread lives on page 5, but scanning is capped at 2 pages.
    let client = FakeForumClient::new(vec![(1, vec![vec![], vec![], vec![], vec![], vec![42]])]);
    let ledger = MemLedger::default();

    let picked = pick_random_thread(&client, &ledger, &[1], 5, 2).await.unwrap();
    assert!(picked.is_none());
}

#[tokio::test]
async fn test_lost_claim_race_yields_none() {
    // Every mark attempt loses to a concurrent claimer: the engine must
    // treat each candidate as taken and exhaust instead of returning one.
    let client = FakeForumClient::new(vec![(1, vec![vec![1, 2]])]);
    let picked = pick_random_thread(&client, &AlwaysClaimedLedger, &[1], 5, 2)
        .await
        .unwrap();
    assert!(picked.is_none());
}

#[tokio::test]
async fn test_picked_url_matches_ledger_record() {
    let client = FakeForumClient::new(vec![(1, vec![vec![7]])]);
    let ledger = MemLedger::default();

    let picked = pick_random_thread(&client, &ledger, &[1], 5, 2)
        .await
        .unwrap()
        .expect("Must pick");
    let stored = ledger
        .used
        .lock()
        .unwrap()
        .get(&(picked.fid, picked.tid))
        .cloned();
    assert_eq!(stored.as_deref(), Some(picked.url.as_str()));
}
