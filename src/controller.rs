//! Per-target orchestration: URL normalization, the recursion queue,
//! response filtering, error budgets, interactive pause, session
//! save/restore, and the final analysis hand-off.

use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use regex::Regex;
use tokio::sync::mpsc::{self, Receiver};
use tokio::time::{Duration, Instant, sleep};
use url::Url;

use crate::analyzer::Analyzer;
use crate::auth::Auth;
use crate::client::HttpClient;
use crate::dictionary::{Dictionary, EXTENSION_RECOGNITION_REGEX, get_blacklists};
use crate::errors::ScanError;
use crate::fuzzer::{FuzzEvent, Fuzzer};
use crate::options::{Options, db_directory};
use crate::output::Output;
use crate::report::{ReportWriter, create_report, prepare_output_file};
use crate::response::Response;
use crate::session::{SESSION_VERSION, Session};
use crate::utils::{clean_path, human_size, lstrip_once, parse_path};

/// A target is skipped once this many requests fail back to back.
pub const MAX_CONSECUTIVE_REQUEST_ERRORS: usize = 250;
const PAUSING_WAIT_TIMEOUT: Duration = Duration::from_secs(7);
const DEFAULT_SESSION_FILE: &str = "dirsift.session";
const UNKNOWN_SCHEME: &str = "unknown";

enum PauseAction {
    Continue,
    NextDirectory,
}

pub struct Controller {
    pub(crate) options: Options,
    pub(crate) output: Output,
    pub(crate) client: Arc<HttpClient>,
    pub(crate) dictionary: Arc<Dictionary>,
    pub(crate) blacklists: std::collections::HashMap<u16, Dictionary>,
    pub(crate) targets: VecDeque<String>,
    pub(crate) directories: VecDeque<String>,
    pub(crate) passed_urls: HashSet<String>,
    pub(crate) results: Vec<Response>,
    pub(crate) responses: Vec<Response>,
    pub(crate) report: Option<Box<dyn ReportWriter>>,
    pub(crate) url: String,
    pub(crate) base_path: String,
    pub(crate) current_job: usize,
    pub(crate) errors: usize,
    pub(crate) consecutive_errors: usize,
    pub(crate) start_time: Instant,
    old_session: bool,
    exclude_regex: Option<Regex>,
    exclude_redirect_regex: Option<Regex>,
}

impl Controller {
    pub fn new(options: Options, output: Output) -> Result<Self, ScanError> {
        let session = match &options.session_file {
            Some(path) if path.is_file() => Some(Session::load(path)?),
            _ => None,
        };

        match session {
            Some(session) => Self::from_session(session, options, output),
            None => Self::fresh(options, output),
        }
    }

    fn fresh(options: Options, output: Output) -> Result<Self, ScanError> {
        let dictionary = Arc::new(Dictionary::generate(
            &options.wordlists,
            &options.wordlist_policy,
        )?);
        let targets: VecDeque<String> = options.urls.iter().cloned().collect();
        Self::build(options, output, dictionary, targets, false)
    }

    fn from_session(session: Session, cli_options: Options, output: Output) -> Result<Self, ScanError> {
        let mut options = session.options;
        // The session path on the command line wins so quitting again saves
        // to the same place.
        options.session_file = cli_options.session_file;

        let dictionary = Arc::new(Dictionary::generate(
            &options.wordlists,
            &options.wordlist_policy,
        )?);
        dictionary.set_index(session.dictionary_index);

        output.restore_buffer(&session.last_output);
        let mut controller = Self::build(options, output, dictionary, session.targets, true)?;
        controller.directories = session.directories;
        controller.passed_urls = session.passed_urls;
        controller.results = session.results;
        controller.responses = session.responses;
        controller.current_job = session.current_job;
        controller.errors = session.errors;
        Ok(controller)
    }

    fn build(
        options: Options,
        output: Output,
        dictionary: Arc<Dictionary>,
        targets: VecDeque<String>,
        old_session: bool,
    ) -> Result<Self, ScanError> {
        let random_agents = if options.random_agent {
            let path = db_directory().join("user-agents.txt");
            let content = std::fs::read_to_string(&path).map_err(|e| {
                ScanError::Config(format!("Couldn't read {}: {e}", path.display()))
            })?;
            Some(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        } else {
            None
        };

        let client = Arc::new(HttpClient::new(&options, random_agents)?);
        if let Some(credential) = &options.proxy_auth {
            client.set_proxy_auth(credential);
        }

        let exclude_regex = match &options.exclude_regex {
            Some(pattern) => Some(
                Regex::new(pattern)
                    .map_err(|_| ScanError::Config(format!("Invalid regex: {pattern}")))?,
            ),
            None => None,
        };
        let exclude_redirect_regex = options
            .exclude_redirect
            .as_deref()
            .and_then(|pattern| Regex::new(pattern).ok());

        let report = match prepare_output_file(&options)? {
            Some(path) => {
                output.output_file(&path.display().to_string());
                Some(create_report(&options.format, path))
            }
            None => None,
        };

        let blacklists = get_blacklists(&options.wordlist_policy.extensions, &db_directory());

        output.config(
            &options.wordlist_policy.extensions.join(", "),
            &options.wordlist_policy.prefixes.join(", "),
            &options.wordlist_policy.suffixes.join(", "),
            options.threads,
            dictionary.len(),
            &options.http_method,
        );
        if let Some(log) = &options.log {
            output.log_file(&log.display().to_string());
        }

        Ok(Self {
            options,
            output,
            client,
            dictionary,
            blacklists,
            targets,
            directories: VecDeque::new(),
            passed_urls: HashSet::new(),
            results: Vec::new(),
            responses: Vec::new(),
            report,
            url: String::new(),
            base_path: String::new(),
            current_job: 0,
            errors: 0,
            consecutive_errors: 0,
            start_time: Instant::now(),
            old_session,
            exclude_regex,
            exclude_redirect_regex,
        })
    }

    pub async fn run(&mut self) -> Result<(), ScanError> {
        while let Some(target) = self.targets.front().cloned() {
            match self.scan_target(&target).await {
                Ok(()) => {}
                Err(ScanError::Quit(msg)) => return Err(ScanError::Quit(msg)),
                Err(err) => {
                    self.directories.clear();
                    self.dictionary.reset();
                    self.output.error(&err.to_string());
                }
            }
            self.targets.pop_front();
        }
        self.output.end_directory();

        self.output
            .warning("\nScan Task Completed, Starting Deep Analysis ...");

        let features_path = self
            .report
            .as_ref()
            .map(|r| r.path().parent().unwrap_or(std::path::Path::new(".")).join("features.csv"));
        let mut analyzer = Analyzer::new(&self.output, self.report.as_mut(), features_path);
        analyzer.analyze(&self.responses)?;

        self.output.warning("\nTask Completed");

        if let Some(session_file) = &self.options.session_file {
            if session_file.is_file() && std::fs::remove_file(session_file).is_err() {
                self.output.error(
                    "Failed to delete old session file, remove it to free some space",
                );
            }
        }

        Ok(())
    }

    async fn scan_target(&mut self, target: &str) -> Result<(), ScanError> {
        self.set_target(target).await?;

        if self.directories.is_empty() {
            for subdir in self.options.subdirs.clone() {
                let path = format!("{}{}", self.base_path, subdir);
                self.add_directory(&path);
            }
        }

        if !self.old_session {
            self.output.target(&self.url);
        }

        while let Some(directory) = self.directories.front().cloned() {
            self.current_job += 1;

            if !self.old_session {
                self.output.warning(&format!(
                    "\n[{}] Starting: {}",
                    Local::now().format("%H:%M:%S"),
                    directory
                ));
            }
            self.output.begin_directory(self.dictionary.len());

            let (tx, rx) = mpsc::channel(1024);
            let mut fuzzer = Fuzzer::new(
                Arc::clone(&self.client),
                Arc::clone(&self.dictionary),
                directory,
                &self.options,
                tx,
            );
            fuzzer.start().await;

            let outcome = self.process(&fuzzer, rx).await;
            fuzzer.join().await;

            self.output.end_directory();
            self.dictionary.reset();
            self.directories.pop_front();
            self.old_session = false;

            outcome?;
        }

        Ok(())
    }

    /// Drives one directory pass: consumes fuzzer events, enforces the
    /// per-target deadline, and converts CTRL+C into the pause menu.
    async fn process(
        &mut self,
        fuzzer: &Fuzzer,
        mut rx: Receiver<FuzzEvent>,
    ) -> Result<(), ScanError> {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        if let Err(err) = self.handle_event(event).await {
                            fuzzer.stop();
                            return Err(err);
                        }
                    }
                    None => return Ok(()),
                },
                _ = sleep(Duration::from_millis(250)) => {
                    if self.is_timed_out() {
                        fuzzer.stop();
                        return Err(ScanError::SkipTarget(
                            "Runtime exceeded the maximum set by the user".into(),
                        ));
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    match self.handle_pause(fuzzer).await {
                        Ok(PauseAction::Continue) => {}
                        Ok(PauseAction::NextDirectory) => fuzzer.stop(),
                        Err(err) => {
                            fuzzer.stop();
                            return Err(err);
                        }
                    }
                },
            }
        }
    }

    async fn handle_event(&mut self, event: FuzzEvent) -> Result<(), ScanError> {
        match event {
            FuzzEvent::NotFound(response) => {
                self.responses.push(response);
                self.consecutive_errors = 0;
                self.update_progress();
            }
            FuzzEvent::Match(response) => {
                self.responses.push(response.clone());
                self.consecutive_errors = 0;
                self.match_response(response).await?;
                self.update_progress();
            }
            FuzzEvent::Error(err, path) => {
                tracing::error!("{path}: {err}");
                if self.options.exit_on_error {
                    return Err(ScanError::Quit("Canceled due to an error".into()));
                }
                self.errors += 1;
                self.consecutive_errors += 1;
                if self.consecutive_errors > MAX_CONSECUTIVE_REQUEST_ERRORS {
                    return Err(ScanError::SkipTarget("Too many request errors".into()));
                }
            }
        }
        Ok(())
    }

    async fn match_response(&mut self, response: Response) -> Result<(), ScanError> {
        if self.options.skip_on_status.contains(&response.status) {
            return Err(ScanError::SkipTarget(format!(
                "Skipped the target due to {} status code",
                response.status
            )));
        }

        if !self.is_valid(&response) {
            return Ok(());
        }

        self.output.status_report(&response, self.options.full_url);

        if self.options.in_recursion_status(response.status)
            && (self.options.recursive
                || self.options.deep_recursive
                || self.options.force_recursive)
        {
            let added = if !response.redirect.is_empty() {
                let new_path = parse_path(&response.redirect);
                self.recur_for_redirect(&response.path, clean_path(&new_path))
            } else if !response.history.is_empty() {
                let old_path = parse_path(&response.history[0]);
                self.recur_for_redirect(clean_path(&old_path), &response.path)
            } else {
                self.recur(&response.path)
            };
            self.output.new_directories(&added);
        }

        if let Some(replay_proxy) = self.options.replay_proxy.clone() {
            // Replay through the replay proxy; its outcome is not reported.
            let _ = self
                .client
                .request(&response.path, Some(replay_proxy.as_str()))
                .await;
        }

        self.results.push(response);
        if let Some(report) = &mut self.report {
            if let Err(err) = report.save(&self.results) {
                self.output
                    .error(&format!("Couldn't save the report: {err}"));
            }
        }

        Ok(())
    }

    fn update_progress(&self) {
        let jobs = self.options.subdirs.len() * self.targets.len().saturating_sub(1)
            + self.directories.len();
        self.output.progress(
            self.dictionary.index(),
            self.current_job,
            self.current_job.max(jobs),
            self.client.rate(),
            self.errors,
        );
    }

    /// Response filter chain; a response failing any filter is dropped
    /// silently.
    pub(crate) fn is_valid(&self, response: &Response) -> bool {
        let options = &self.options;

        if options.exclude_status_codes.contains(&response.status) {
            return false;
        }
        if !options.include_status_codes.is_empty()
            && !options.include_status_codes.contains(&response.status)
        {
            return false;
        }
        if let Some(blacklist) = self.blacklists.get(&response.status) {
            if blacklist
                .iter()
                .any(|suffix| response.path.ends_with(lstrip_once(suffix, "/")))
            {
                return false;
            }
        }
        if options
            .exclude_sizes
            .contains(&human_size(response.length))
        {
            return false;
        }
        if response.length < options.min_response_size {
            return false;
        }
        if options.max_response_size > 0 && response.length > options.max_response_size {
            return false;
        }

        let content = response.content();
        if options
            .exclude_texts
            .iter()
            .any(|text| content.contains(text.as_str()))
        {
            return false;
        }
        if let Some(regex) = &self.exclude_regex {
            if regex.is_match(&content) {
                return false;
            }
        }
        if let Some(pattern) = &options.exclude_redirect {
            if !response.redirect.is_empty() {
                if response.redirect.contains(pattern.as_str()) {
                    return false;
                }
                if let Some(regex) = &self.exclude_redirect_regex {
                    if regex.is_match(&response.redirect) {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Adds a directory to the recursion queue, enforcing the depth cap,
    /// the visited set and the subdirectory exclusions.
    pub(crate) fn add_directory(&mut self, path: &str) {
        if self
            .options
            .exclude_subdirs
            .iter()
            .any(|dir| path.contains(&format!("/{dir}")))
        {
            return;
        }

        let url = format!("{}{}", self.url, path);
        let depth = path
            .matches('/')
            .count()
            .saturating_sub(self.base_path.matches('/').count());
        if self.options.recursion_depth > 0 && depth > self.options.recursion_depth {
            return;
        }
        if self.passed_urls.contains(&url) {
            return;
        }

        self.directories.push_back(path.to_string());
        self.passed_urls.insert(url);
    }

    /// Schedules descent for a matched path; returns what was newly queued.
    pub(crate) fn recur(&mut self, path: &str) -> Vec<String> {
        let before = self.directories.len();
        let mut path = clean_path(path).to_string();

        if self.options.force_recursive && !path.ends_with('/') {
            path.push('/');
        }

        if self.options.deep_recursive {
            let positions: Vec<usize> = path.match_indices('/').map(|(i, _)| i).collect();
            for pos in positions {
                let prefix = path[..=pos].to_string();
                self.add_directory(&prefix);
            }
        } else if self.options.recursive
            && path.ends_with('/')
            && !EXTENSION_RECOGNITION_REGEX.is_match(path.strip_suffix('/').unwrap_or(&path))
        {
            let path = path.clone();
            self.add_directory(&path);
        }

        self.directories.iter().skip(before).cloned().collect()
    }

    /// Redirect-driven descent: `X` redirecting to `X/` descends into `X/`.
    pub(crate) fn recur_for_redirect(&mut self, path: &str, redirect_path: &str) -> Vec<String> {
        if redirect_path == format!("{path}/") {
            self.recur(redirect_path)
        } else {
            Vec::new()
        }
    }

    fn is_timed_out(&self) -> bool {
        self.options.maxtime > 0
            && self.start_time.elapsed() > Duration::from_secs(self.options.maxtime)
    }

    /// Normalizes the target URL, probing for the scheme when unknown, and
    /// points the client at it.
    pub(crate) async fn set_target(&mut self, target: &str) -> Result<(), ScanError> {
        let mut target = target.to_string();
        if !target.contains("://") {
            target = format!(
                "{}://{}",
                self.options.scheme.as_deref().unwrap_or(UNKNOWN_SCHEME),
                target
            );
        }
        if !target.ends_with('/') {
            target.push('/');
        }

        let parsed = Url::parse(&target)
            .map_err(|_| ScanError::InvalidUrl(format!("Invalid URL: {target}")))?;
        let scheme = parsed.scheme().to_string();
        if !["http", "https", UNKNOWN_SCHEME].contains(&scheme.as_str()) {
            return Err(ScanError::InvalidUrl(format!(
                "Unsupported URI scheme: {scheme}"
            )));
        }

        self.base_path = lstrip_once(parsed.path(), "/").to_string();

        if !parsed.username().is_empty() {
            let credential = match parsed.password() {
                Some(password) => format!("{}:{password}", parsed.username()),
                None => parsed.username().to_string(),
            };
            self.client.set_auth(Auth::new("basic", &credential)?);
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ScanError::InvalidUrl(format!("Invalid URL: {target}")))?
            .to_string();
        let explicit_port = parsed.port();

        let (scheme, port): (String, u16) = if scheme == UNKNOWN_SCHEME {
            match explicit_port {
                Some(port) => (detect_scheme(&host, port).await.to_string(), port),
                None => {
                    let detected = detect_scheme(&host, 443).await;
                    let port = if detected == "https" { 443 } else { 80 };
                    (detected.to_string(), port)
                }
            }
        } else {
            let default = if scheme == "https" { 443 } else { 80 };
            (scheme, explicit_port.unwrap_or(default))
        };

        let default_port = if scheme == "https" { 443 } else { 80 };
        self.url = if port == default_port {
            format!("{scheme}://{host}/")
        } else {
            format!("{scheme}://{host}:{port}/")
        };

        if let Some(ip) = &self.options.ip {
            if let Ok(addr) = ip.parse::<IpAddr>() {
                self.client.pin_dns(&host, SocketAddr::new(addr, port));
            }
        }

        self.client.set_url(&self.url);
        self.start_time = Instant::now();
        Ok(())
    }

    /// The CTRL+C menu. Quitting offers to snapshot the session first.
    async fn handle_pause(&mut self, fuzzer: &Fuzzer) -> Result<PauseAction, ScanError> {
        self.output
            .warning("CTRL+C detected: Pausing threads, please wait...");
        fuzzer.pause();

        let deadline = Instant::now() + PAUSING_WAIT_TIMEOUT;
        while !fuzzer.is_stopped() && !fuzzer.quiesced() && Instant::now() < deadline {
            sleep(Duration::from_millis(200)).await;
        }

        loop {
            let mut menu = String::from("[q]uit / [c]ontinue");
            if self.directories.len() > 1 {
                menu.push_str(" / [n]ext");
            }
            if self.targets.len() > 1 {
                menu.push_str(" / [s]kip target");
            }
            self.output.in_line(&format!("{menu}: "));

            let choice = tokio::select! {
                line = read_line() => line?,
                _ = tokio::signal::ctrl_c() => return Err(ScanError::Quit("Canceled by the user".into())),
            };

            match choice.trim().to_lowercase().as_str() {
                "q" => {
                    self.output.in_line("[s]ave / [q]uit without saving: ");
                    let choice = read_line().await?;
                    match choice.trim().to_lowercase().as_str() {
                        "s" => {
                            let default = self
                                .options
                                .session_file
                                .clone()
                                .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));
                            self.output
                                .in_line(&format!("Save to file [{}]: ", default.display()));
                            let entered = read_line().await?;
                            let entered = entered.trim();
                            let path = if entered.is_empty() {
                                default
                            } else {
                                PathBuf::from(entered)
                            };
                            self.export_session(&path)?;
                            return Err(ScanError::Quit(format!(
                                "Session saved to: {}",
                                path.display()
                            )));
                        }
                        "q" => return Err(ScanError::Quit("Canceled by the user".into())),
                        _ => {}
                    }
                }
                "c" => {
                    fuzzer.resume();
                    return Ok(PauseAction::Continue);
                }
                "n" if self.directories.len() > 1 => return Ok(PauseAction::NextDirectory),
                "s" if self.targets.len() > 1 => {
                    return Err(ScanError::SkipTarget("Target skipped by the user".into()));
                }
                _ => {}
            }
        }
    }

    /// Snapshots the resumable state. The in-progress job is rolled back by
    /// one so resuming restarts the interrupted directory.
    pub(crate) fn export_session(&self, path: &std::path::Path) -> Result<(), ScanError> {
        let session = Session {
            version: SESSION_VERSION,
            targets: self.targets.clone(),
            directories: self.directories.clone(),
            passed_urls: self.passed_urls.clone(),
            dictionary_index: self.dictionary.index(),
            current_job: self.current_job.saturating_sub(1),
            errors: self.errors,
            options: self.options.clone(),
            results: self.results.clone(),
            responses: self.responses.clone(),
            last_output: self.output.last_output(),
        };
        session.save(path)
    }
}

/// Guesses http vs https by attempting a TLS-backed request on the port.
async fn detect_scheme(host: &str, port: u16) -> &'static str {
    let Ok(probe) = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .build()
    else {
        return "http";
    };
    if probe
        .get(format!("https://{host}:{port}/"))
        .send()
        .await
        .is_ok()
    {
        "https"
    } else {
        "http"
    }
}

async fn read_line() -> Result<String, ScanError> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(|e| ScanError::Config(e.to_string()))?
    .map_err(ScanError::Io)
}
