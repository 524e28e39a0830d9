//! Resolved scan configuration, shared read-only across every task and
//! persisted inside session files.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::args::Args;
use crate::dictionary::{Casing, WordlistPolicy};
use crate::errors::ScanError;
use crate::utils::{lstrip_once, parse_raw_request, parse_status_codes};

pub const REPORT_FORMATS: &[&str] = &["plain", "simple", "json", "xml", "md", "csv", "html"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    pub urls: Vec<String>,
    pub http_method: String,
    pub headers: Vec<(String, String)>,
    pub data: Option<String>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub auth: Option<String>,
    pub auth_type: Option<String>,
    pub proxies: Vec<String>,
    pub proxy_auth: Option<String>,
    pub replay_proxy: Option<String>,
    pub random_agent: bool,
    pub wordlists: Vec<PathBuf>,
    pub wordlist_policy: WordlistPolicy,
    pub threads: usize,
    pub recursive: bool,
    pub deep_recursive: bool,
    pub force_recursive: bool,
    pub recursion_depth: usize,
    /// Empty set means every status code triggers recursion.
    pub recursion_status_codes: HashSet<u16>,
    pub subdirs: Vec<String>,
    pub exclude_subdirs: Vec<String>,
    /// Empty set means every status code is included.
    pub include_status_codes: HashSet<u16>,
    pub exclude_status_codes: HashSet<u16>,
    pub exclude_sizes: Vec<String>,
    pub exclude_texts: Vec<String>,
    pub exclude_regex: Option<String>,
    pub exclude_redirect: Option<String>,
    pub exclude_response: Option<String>,
    pub min_response_size: u64,
    pub max_response_size: u64,
    pub skip_on_status: HashSet<u16>,
    pub delay: f64,
    pub max_rate: usize,
    pub max_retries: usize,
    pub timeout: f64,
    pub maxtime: u64,
    pub follow_redirects: bool,
    pub crawl: bool,
    pub scheme: Option<String>,
    pub ip: Option<String>,
    pub exit_on_error: bool,
    pub output: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub format: String,
    pub log: Option<PathBuf>,
    pub session_file: Option<PathBuf>,
    pub full_url: bool,
    pub no_color: bool,
    pub quiet: bool,
}

impl Options {
    pub fn resolve(args: Args) -> Result<Self, ScanError> {
        let mut urls = args.urls;
        if let Some(url_file) = &args.url_file {
            let content = fs::read_to_string(url_file).map_err(|e| {
                ScanError::Config(format!("Couldn't read URL list {}: {e}", url_file.display()))
            })?;
            urls.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string),
            );
        }

        let mut http_method = args.http_method;
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut data = args.data;

        if let Some(raw_file) = &args.raw {
            let content = fs::read_to_string(raw_file).map_err(|e| {
                ScanError::InvalidRawRequest(format!("{}: {e}", raw_file.display()))
            })?;
            let raw = parse_raw_request(&content)?;
            urls = vec![raw.url];
            http_method = raw.method;
            headers = raw.headers;
            data = raw.data.or(data);
        } else {
            for header in &args.headers {
                let (key, value) = header.split_once(':').ok_or_else(|| {
                    ScanError::Config(format!("Invalid header: {header}"))
                })?;
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
            if let Some(cookie) = &args.cookie {
                headers.push(("Cookie".to_string(), cookie.clone()));
            }
            if let Some(agent) = &args.user_agent {
                headers.push(("User-Agent".to_string(), agent.clone()));
            }
        }

        let resuming = args
            .session_file
            .as_ref()
            .is_some_and(|p| p.is_file());

        if urls.is_empty() && !resuming {
            return Err(ScanError::Config("No targets specified".into()));
        }
        if args.wordlists.is_empty() && !resuming {
            return Err(ScanError::Config("No wordlists specified".into()));
        }

        if let Some(scheme) = &args.scheme {
            if !["http", "https"].contains(&scheme.as_str()) {
                return Err(ScanError::Config(format!("Invalid scheme: {scheme}")));
            }
        }
        if !REPORT_FORMATS.contains(&args.format.as_str()) {
            return Err(ScanError::Config(format!(
                "Unsupported report format: {} (choose from {})",
                args.format,
                REPORT_FORMATS.join(", ")
            )));
        }
        if args.auth.is_some() != args.auth_type.is_some() {
            return Err(ScanError::Config(
                "--auth and --auth-type must be given together".into(),
            ));
        }
        if let Some(ip) = &args.ip {
            ip.parse::<std::net::IpAddr>()
                .map_err(|_| ScanError::Config(format!("Invalid IP address: {ip}")))?;
        }

        let casing = if args.lowercase {
            Casing::Lowercase
        } else if args.uppercase {
            Casing::Uppercase
        } else if args.capitalization {
            Casing::Capitalize
        } else {
            Casing::None
        };

        let wordlist_policy = WordlistPolicy {
            extensions: args.extensions,
            exclude_extensions: args.exclude_extensions,
            prefixes: args.prefixes,
            suffixes: args.suffixes,
            casing,
            force_extensions: args.force_extensions,
            overwrite_extensions: args.overwrite_extensions,
            remove_extensions: args.remove_extensions,
        };

        // Subdirs are base-path relative: no leading slash, trailing slash.
        let mut subdirs: Vec<String> = args
            .subdirs
            .iter()
            .map(|s| {
                let s = lstrip_once(s.trim(), "/");
                if s.is_empty() || s.ends_with('/') {
                    s.to_string()
                } else {
                    format!("{s}/")
                }
            })
            .collect();
        if subdirs.is_empty() {
            subdirs.push(String::new());
        }

        let parse_opt_codes = |value: &Option<String>| -> Result<HashSet<u16>, ScanError> {
            match value {
                Some(v) => parse_status_codes(v),
                None => Ok(HashSet::new()),
            }
        };

        Ok(Self {
            urls,
            http_method,
            headers,
            data,
            cert_file: args.cert_file,
            key_file: args.key_file,
            auth: args.auth,
            auth_type: args.auth_type,
            proxies: args.proxies,
            proxy_auth: args.proxy_auth,
            replay_proxy: args.replay_proxy,
            random_agent: args.random_agent,
            wordlists: args.wordlists,
            wordlist_policy,
            threads: args.threads.max(1),
            recursive: args.recursive,
            deep_recursive: args.deep_recursive,
            force_recursive: args.force_recursive,
            recursion_depth: args.recursion_depth,
            recursion_status_codes: parse_opt_codes(&args.recursion_status)?,
            subdirs,
            exclude_subdirs: args.exclude_subdirs,
            include_status_codes: parse_opt_codes(&args.include_status)?,
            exclude_status_codes: parse_opt_codes(&args.exclude_status)?,
            exclude_sizes: args
                .exclude_sizes
                .iter()
                .map(|s| s.trim().to_uppercase())
                .collect(),
            exclude_texts: args.exclude_texts,
            exclude_regex: args.exclude_regex,
            exclude_redirect: args.exclude_redirect,
            exclude_response: args.exclude_response,
            min_response_size: args.min_response_size,
            max_response_size: args.max_response_size,
            skip_on_status: parse_opt_codes(&args.skip_on_status)?,
            delay: args.delay,
            max_rate: args.max_rate,
            max_retries: args.max_retries,
            timeout: args.timeout,
            maxtime: args.maxtime,
            follow_redirects: args.follow_redirects,
            crawl: args.crawl,
            scheme: args.scheme,
            ip: args.ip,
            exit_on_error: args.exit_on_error,
            output: args.output,
            output_path: args.output_path,
            format: args.format,
            log: args.log,
            session_file: args.session_file,
            full_url: args.full_url,
            no_color: args.no_color,
            quiet: args.quiet,
        })
    }

    /// Whether recursion may descend on this status code.
    pub fn in_recursion_status(&self, status: u16) -> bool {
        self.recursion_status_codes.is_empty() || self.recursion_status_codes.contains(&status)
    }
}

/// Locates the `db/` directory holding blacklists and user agents: next to
/// the executable, falling back to the working directory.
pub fn db_directory() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("db");
            if candidate.is_dir() {
                return candidate;
            }
        }
    }
    PathBuf::from("db")
}
