use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rnsq_net::{NsqError, Result};
use rnsq_utils::{parse_addr, Addr};

/// Resolves the nsqd nodes that carry a topic.
#[async_trait]
pub trait Lookup: Send + Sync + 'static {
    async fn lookup(&self, topic: &str) -> Result<BTreeSet<Addr>>;
}

/// Queries nsqlookupd over HTTP.
#[derive(Clone)]
pub struct HttpLookup {
    client: reqwest::Client,
    lookupd: Vec<Addr>,
}

impl HttpLookup {
    pub fn new(lookupd: Vec<Addr>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpLookup { client, lookupd })
    }

    async fn query(&self, lookupd: &str, topic: &str) -> Result<BTreeSet<Addr>> {
        let url = if lookupd.starts_with("http://") || lookupd.starts_with("https://") {
            format!("{}/lookup", lookupd.trim_end_matches('/'))
        } else {
            format!("http://{lookupd}/lookup")
        };
        let resp = self.client.get(&url).query(&[("topic", topic)]).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            // topic not registered yet
            return Ok(BTreeSet::new());
        }
        if !resp.status().is_success() {
            return Err(NsqError::Lookup(format!("{} returned {}", url, resp.status())).into());
        }
        let body = resp.bytes().await?;
        producers(&body)
    }
}

#[async_trait]
impl Lookup for HttpLookup {
    async fn lookup(&self, topic: &str) -> Result<BTreeSet<Addr>> {
        let mut addrs = BTreeSet::new();
        let mut errs = Vec::new();
        for lookupd in &self.lookupd {
            match self.query(lookupd, topic).await {
                Ok(found) => addrs.extend(found),
                Err(e) => {
                    log::warn!("lookup of {:?} on {} failed, {}", topic, lookupd, e);
                    errs.push(e.to_string());
                }
            }
        }
        if !errs.is_empty() && errs.len() == self.lookupd.len() {
            return Err(NsqError::Lookup(errs.join("; ")).into());
        }
        Ok(addrs)
    }
}

#[derive(Deserialize, Debug)]
struct Producer {
    broadcast_address: String,
    tcp_port: u16,
}

#[derive(Deserialize, Debug, Default)]
struct Producers {
    #[serde(default)]
    producers: Vec<Producer>,
}

/// nsqlookupd before 1.0 wraps the result in `data`
#[derive(Deserialize, Debug)]
struct LookupResponse {
    #[serde(default)]
    producers: Option<Vec<Producer>>,
    #[serde(default)]
    data: Option<Producers>,
}

fn producers(body: &[u8]) -> Result<BTreeSet<Addr>> {
    let resp: LookupResponse =
        serde_json::from_slice(body).map_err(|e| NsqError::Lookup(format!("invalid lookup response, {e}")))?;
    let producers = match (resp.producers, resp.data) {
        (Some(producers), _) => producers,
        (None, Some(data)) => data.producers,
        (None, None) => Vec::new(),
    };
    producers.iter().map(|p| parse_addr(&format!("{}:{}", p.broadcast_address, p.tcp_port))).collect()
}

/// Splits a fresh lookup result against the current addresses. Static addresses are
/// never removed.
pub fn reconcile(
    live: &BTreeSet<Addr>,
    current: &BTreeSet<Addr>,
    statics: &BTreeSet<Addr>,
) -> (Vec<Addr>, Vec<Addr>) {
    let added = live.difference(current).cloned().collect();
    let removed = current.difference(live).filter(|a| !statics.contains(*a)).cloned().collect();
    (added, removed)
}

/// Handle of the periodic lookup task of a reader.
#[derive(Debug)]
pub struct PollTimer {
    token: CancellationToken,
    polls: Arc<AtomicUsize>,
    last: Arc<RwLock<BTreeSet<Addr>>>,
    handle: JoinHandle<()>,
}

impl PollTimer {
    /// Polls immediately, then every `interval` until cancelled. Each successful
    /// result is handed to `on_lookup`, polling stops when it returns `false`.
    pub(crate) fn spawn<F>(topic: String, lookup: Arc<dyn Lookup>, interval: Duration, on_lookup: F) -> Self
    where
        F: Fn(BTreeSet<Addr>) -> bool + Send + 'static,
    {
        let token = CancellationToken::new();
        let polls = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(RwLock::new(BTreeSet::new()));
        let handle = {
            let token = token.clone();
            let polls = polls.clone();
            let last = last.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    if token.is_cancelled() {
                        break;
                    }
                    polls.fetch_add(1, Ordering::SeqCst);
                    let res = tokio::select! {
                        _ = token.cancelled() => break,
                        res = lookup.lookup(&topic) => res,
                    };
                    match res {
                        Ok(addrs) => {
                            log::debug!("lookup of {:?} found [{}]", topic, addrs.iter().join(", "));
                            *last.write() = addrs.clone();
                            if token.is_cancelled() || !on_lookup(addrs) {
                                break;
                            }
                        }
                        Err(e) => log::warn!("lookup of {:?} failed, {}", topic, e),
                    }
                }
                log::debug!("lookup of {:?} stopped", topic);
            })
        };
        PollTimer { token, polls, last, handle }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of lookups started so far
    #[inline]
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Addresses returned by the latest successful lookup
    #[inline]
    pub fn last(&self) -> BTreeSet<Addr> {
        self.last.read().clone()
    }

    /// Stops polling, a lookup in progress is abandoned.
    pub fn cancel(&self) {
        self.token.cancel();
        self.handle.abort();
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLookup;

    fn set(addrs: &[&'static str]) -> BTreeSet<Addr> {
        addrs.iter().map(|a| Addr::from_static(a)).collect()
    }

    #[test]
    fn test_producers() {
        let addrs = producers(
            br#"{"channels":["billing"],"producers":[
                {"remote_address":"10.0.0.1:51234","hostname":"nsqd-1","broadcast_address":"nsqd-1","tcp_port":4150,"http_port":4151,"version":"1.3.0"},
                {"broadcast_address":"nsqd-2","tcp_port":4150}
            ]}"#,
        )
        .unwrap();
        assert_eq!(addrs, set(&["nsqd-1:4150", "nsqd-2:4150"]));

        let legacy = producers(
            br#"{"status_code":200,"status_txt":"OK","data":{"producers":[{"broadcast_address":"nsqd-3","tcp_port":4150}]}}"#,
        )
        .unwrap();
        assert_eq!(legacy, set(&["nsqd-3:4150"]));

        assert!(producers(br#"{"channels":[]}"#).unwrap().is_empty());
        assert!(producers(b"not json").is_err());
    }

    #[test]
    fn test_reconcile() {
        let current = set(&["a:4150", "b:4150", "s:4150"]);
        let statics = set(&["s:4150"]);
        let live = set(&["b:4150", "c:4150"]);
        let (added, removed) = reconcile(&live, &current, &statics);
        assert_eq!(added, vec![Addr::from_static("c:4150")]);
        assert_eq!(removed, vec![Addr::from_static("a:4150")]);

        let (added, removed) = reconcile(&current, &current, &statics);
        assert!(added.is_empty() && removed.is_empty());
    }

    #[tokio::test]
    async fn test_poll_until_cancelled() {
        let lookup = MockLookup::new(set(&["a:4150"]));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let timer = PollTimer::spawn("orders".into(), Arc::new(lookup.clone()), Duration::from_millis(20), move |addrs| {
            tx.send(addrs).is_ok()
        });

        assert_eq!(rx.recv().await.unwrap(), set(&["a:4150"]));
        assert_eq!(rx.recv().await.unwrap(), set(&["a:4150"]));
        assert_eq!(timer.last(), set(&["a:4150"]));

        timer.cancel();
        assert!(timer.is_cancelled());
        let calls = lookup.calls();
        assert_eq!(calls, timer.polls());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(lookup.calls(), calls);
    }

    #[tokio::test]
    async fn test_poll_survives_failures() {
        let lookup = MockLookup::new(set(&["a:4150"]));
        lookup.fail(true);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let timer = PollTimer::spawn("orders".into(), Arc::new(lookup.clone()), Duration::from_millis(10), move |addrs| {
            tx.send(addrs).is_ok()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(lookup.calls() >= 2);
        lookup.fail(false);
        assert_eq!(rx.recv().await.unwrap(), set(&["a:4150"]));
        timer.cancel();
    }
}
