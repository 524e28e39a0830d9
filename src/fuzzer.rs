//! The fuzzing engine: a fixed pool of worker tasks draining the dictionary
//! through the shared client, classifying each response against the
//! soft-404 baseline, and streaming events to the controller.
//!
//! Pause is cooperative: a gate between requests. No request is interrupted
//! mid-flight.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};
use url::Url;

use crate::analyzer::standardize_body;
use crate::client::HttpClient;
use crate::dictionary::Dictionary;
use crate::errors::RequestError;
use crate::options::Options;
use crate::response::Response;
use crate::utils::{clean_path, lstrip_once};

static LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:href|src|action)\s*=\s*["']?([^"'\s>]+)"#).unwrap());

/// What a worker sends back for every completed or failed request. Events
/// from one worker arrive in request order; there is no cross-worker order.
#[derive(Debug)]
pub enum FuzzEvent {
    Match(Response),
    NotFound(Response),
    Error(RequestError, String),
}

/// Gate the workers pass between requests. `close()` parks them at the next
/// checkpoint, `open()` releases them.
struct Gate {
    open: AtomicBool,
    notify: Notify,
    waiting: AtomicUsize,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            notify: Notify::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn open(&self) {
        self.open.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    async fn wait_open(&self) {
        if self.open.load(Ordering::Acquire) {
            return;
        }
        self.waiting.fetch_add(1, Ordering::AcqRel);
        loop {
            if self.open.load(Ordering::Acquire) {
                break;
            }
            let notified = self.notify.notified();
            if self.open.load(Ordering::Acquire) {
                break;
            }
            notified.await;
        }
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Status plus the digest of the standardized body of a known-nonexistent
/// probe. Responses matching a baseline are soft 404s.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Baseline {
    status: u16,
    digest: [u8; 32],
}

impl Baseline {
    fn from_response(response: &Response) -> Self {
        Self {
            status: response.status,
            digest: body_digest(response),
        }
    }
}

fn body_digest(response: &Response) -> [u8; 32] {
    let standardized = standardize_body(response.url.as_bytes(), &response.body);
    let mut hasher = Sha256::new();
    hasher.update(&standardized);
    hasher.finalize().into()
}

struct WorkerCtx {
    client: Arc<HttpClient>,
    dictionary: Arc<Dictionary>,
    base_path: String,
    delay: f64,
    crawl: bool,
    gate: Arc<Gate>,
    stop: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    baselines: Vec<Baseline>,
    crawl_queue: Mutex<VecDeque<String>>,
    crawled: Mutex<HashSet<String>>,
}

/// One scan pass over a single base directory.
pub struct Fuzzer {
    client: Arc<HttpClient>,
    dictionary: Arc<Dictionary>,
    base_path: String,
    threads: usize,
    delay: f64,
    crawl: bool,
    exclude_response: Option<String>,
    tx: Option<Sender<FuzzEvent>>,
    gate: Arc<Gate>,
    stop: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    handles: Vec<JoinHandle<()>>,
}

impl Fuzzer {
    pub fn new(
        client: Arc<HttpClient>,
        dictionary: Arc<Dictionary>,
        base_path: String,
        options: &Options,
        tx: Sender<FuzzEvent>,
    ) -> Self {
        Self {
            client,
            dictionary,
            base_path,
            threads: options.threads,
            delay: options.delay,
            crawl: options.crawl,
            exclude_response: options.exclude_response.clone(),
            tx: Some(tx),
            gate: Arc::new(Gate::new()),
            stop: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            handles: Vec::new(),
        }
    }

    /// Probes the baselines, then launches the worker pool. The event
    /// channel closes once every worker has drained the dictionary.
    pub async fn start(&mut self) {
        let Some(tx) = self.tx.take() else { return };

        let baselines = self.capture_baselines().await;

        self.active.store(self.threads, Ordering::Release);
        let ctx = Arc::new(WorkerCtx {
            client: Arc::clone(&self.client),
            dictionary: Arc::clone(&self.dictionary),
            base_path: self.base_path.clone(),
            delay: self.delay,
            crawl: self.crawl,
            gate: Arc::clone(&self.gate),
            stop: Arc::clone(&self.stop),
            active: Arc::clone(&self.active),
            baselines,
            crawl_queue: Mutex::new(VecDeque::new()),
            crawled: Mutex::new(HashSet::new()),
        });

        for _ in 0..self.threads {
            let ctx = Arc::clone(&ctx);
            let tx = tx.clone();
            self.handles.push(tokio::spawn(worker(ctx, tx)));
        }
    }

    /// Requests a known-nonexistent path (and the `--exclude-response`
    /// path, when configured) to learn what not-found looks like here.
    async fn capture_baselines(&self) -> Vec<Baseline> {
        let mut baselines = Vec::new();

        let probe = {
            let token: String = rand::rng()
                .sample_iter(&Alphanumeric)
                .take(12)
                .map(char::from)
                .collect();
            format!("{}{}", self.base_path, token)
        };
        if let Ok(response) = self.client.request(&probe, None).await {
            baselines.push(Baseline::from_response(&response));
        }

        if let Some(path) = &self.exclude_response {
            let full = format!("{}{}", self.base_path, lstrip_once(path, "/"));
            if let Ok(response) = self.client.request(&full, None).await {
                let baseline = Baseline::from_response(&response);
                if !baselines.contains(&baseline) {
                    baselines.push(baseline);
                }
            }
        }

        baselines
    }

    /// Parks every worker at the gate once its current request finishes.
    pub fn pause(&self) {
        self.gate.close();
    }

    pub fn resume(&self) {
        self.gate.open();
    }

    /// Lets workers run to their next checkpoint and exit.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.gate.open();
    }

    /// True once every worker has finished.
    pub fn is_stopped(&self) -> bool {
        self.active.load(Ordering::Acquire) == 0
    }

    /// Every still-running worker is parked at the gate or already done.
    pub fn quiesced(&self) -> bool {
        self.gate.waiting.load(Ordering::Acquire) >= self.active.load(Ordering::Acquire)
    }

    /// Awaits worker termination when tearing a pass down.
    pub async fn join(&mut self) {
        futures::future::join_all(self.handles.drain(..)).await;
    }

    /// Polls for completion for up to `timeout` seconds; true iff the
    /// dictionary is drained and all workers finished.
    pub async fn wait(&self, timeout: f64) -> bool {
        let deadline = Instant::now() + Duration::from_secs_f64(timeout);
        loop {
            if self.is_stopped() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(25)).await;
        }
    }
}

fn next_path(ctx: &WorkerCtx) -> Option<String> {
    if let Some(path) = ctx.crawl_queue.lock().expect("poisoned lock").pop_front() {
        return Some(path);
    }
    ctx.dictionary.next()
}

fn is_not_found(ctx: &WorkerCtx, response: &Response) -> bool {
    if response.status == 404 {
        return true;
    }
    if ctx.baselines.is_empty() {
        return false;
    }
    let digest = body_digest(response);
    ctx.baselines
        .iter()
        .any(|b| b.status == response.status && b.digest == digest)
}

/// Pulls same-scope links out of a matched response body and queues the new
/// ones for this pass.
fn crawl_links(ctx: &WorkerCtx, response: &Response) {
    let Ok(base) = Url::parse(&response.url) else {
        return;
    };
    let scope_prefix = format!("/{}", ctx.base_path);
    let content = response.content();

    for capture in LINK_REGEX.captures_iter(&content) {
        let Some(link) = capture.get(1) else { continue };
        let Ok(resolved) = base.join(link.as_str()) else {
            continue;
        };
        if resolved.scheme() != base.scheme()
            || resolved.host_str() != base.host_str()
            || resolved.port_or_known_default() != base.port_or_known_default()
        {
            continue;
        }

        let path = clean_path(resolved.path());
        let Some(relative) = path.strip_prefix(scope_prefix.as_str()) else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }

        let mut crawled = ctx.crawled.lock().expect("poisoned lock");
        if crawled.insert(relative.to_string()) {
            ctx.crawl_queue
                .lock()
                .expect("poisoned lock")
                .push_back(relative.to_string());
        }
    }
}

async fn worker(ctx: Arc<WorkerCtx>, tx: Sender<FuzzEvent>) {
    loop {
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }
        ctx.gate.wait_open().await;
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }

        let Some(path) = next_path(&ctx) else { break };
        let full_path = format!("{}{}", ctx.base_path, path);

        let event = match ctx.client.request(&full_path, None).await {
            Ok(response) => {
                if is_not_found(&ctx, &response) {
                    FuzzEvent::NotFound(response)
                } else {
                    if ctx.crawl {
                        crawl_links(&ctx, &response);
                    }
                    FuzzEvent::Match(response)
                }
            }
            Err(err) => FuzzEvent::Error(err, full_path),
        };

        if tx.send(event).await.is_err() {
            break;
        }

        if ctx.delay > 0.0 {
            sleep(Duration::from_secs_f64(ctx.delay)).await;
        }
    }

    ctx.active.fetch_sub(1, Ordering::AcqRel);
}
