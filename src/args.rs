//! Command-line arguments. `clap` derives the parser; resolution and
//! validation happen in `options`.

use std::path::PathBuf;

use clap::Parser;

/// A web path scanner that separates real assets from soft-404 noise by
/// clustering response features after the scan.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Target URLs.
    pub urls: Vec<String>,

    /// File containing target URLs, one per line.
    #[arg(short = 'l', long)]
    pub url_file: Option<PathBuf>,

    /// File containing a raw HTTP request to use as the scan template.
    #[arg(long)]
    pub raw: Option<PathBuf>,

    /// HTTP method to use.
    #[arg(short = 'X', long, default_value = "GET")]
    pub http_method: String,

    /// Extra header in "Key: Value" form, repeatable.
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Cookie header value.
    #[arg(short = 'b', long)]
    pub cookie: Option<String>,

    /// User-Agent header value.
    #[arg(short = 'a', long)]
    pub user_agent: Option<String>,

    /// Pick a random User-Agent from db/user-agents.txt for each request.
    #[arg(long)]
    pub random_agent: bool,

    /// Request body data.
    #[arg(long)]
    pub data: Option<String>,

    /// Client certificate file (PEM).
    #[arg(long)]
    pub cert_file: Option<PathBuf>,

    /// Private key for the client certificate (PEM).
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Authentication credential (user:password, or a token).
    #[arg(long)]
    pub auth: Option<String>,

    /// Authentication type: basic, digest, bearer, ntlm, jwt, oauth2.
    #[arg(long)]
    pub auth_type: Option<String>,

    /// Proxy URL, repeatable; requests rotate through the pool.
    #[arg(long = "proxy")]
    pub proxies: Vec<String>,

    /// Proxy authentication credential.
    #[arg(long)]
    pub proxy_auth: Option<String>,

    /// Proxy to replay matched requests through.
    #[arg(long)]
    pub replay_proxy: Option<String>,

    /// Wordlist files, comma-separated or repeated.
    #[arg(short = 'w', long = "wordlists", value_delimiter = ',')]
    pub wordlists: Vec<PathBuf>,

    /// Extensions for %EXT% substitution and the extension flags.
    #[arg(short = 'e', long, value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Prefixes prepended to every entry.
    #[arg(long, value_delimiter = ',')]
    pub prefixes: Vec<String>,

    /// Suffixes appended to every entry.
    #[arg(long, value_delimiter = ',')]
    pub suffixes: Vec<String>,

    /// Drop wordlist entries carrying these extensions.
    #[arg(long, value_delimiter = ',')]
    pub exclude_extensions: Vec<String>,

    /// Append extensions to extensionless entries.
    #[arg(short = 'f', long)]
    pub force_extensions: bool,

    /// Replace unknown extensions with the configured ones.
    #[arg(long)]
    pub overwrite_extensions: bool,

    /// Truncate every entry at its first dot.
    #[arg(long)]
    pub remove_extensions: bool,

    /// Lowercase every entry.
    #[arg(long)]
    pub lowercase: bool,

    /// Uppercase every entry.
    #[arg(long)]
    pub uppercase: bool,

    /// Capitalize every entry.
    #[arg(long)]
    pub capitalization: bool,

    /// Number of concurrent worker tasks.
    #[arg(short = 't', long, default_value_t = 25)]
    pub threads: usize,

    /// Descend into found directories.
    #[arg(short = 'r', long)]
    pub recursive: bool,

    /// Descend into every prefix of found paths.
    #[arg(long)]
    pub deep_recursive: bool,

    /// Treat every found path as a directory to descend into.
    #[arg(long)]
    pub force_recursive: bool,

    /// Maximum recursion depth (0 = unlimited).
    #[arg(short = 'R', long, default_value_t = 0)]
    pub recursion_depth: usize,

    /// Status codes that trigger recursion (e.g. "200,301-399"; default all).
    #[arg(long)]
    pub recursion_status: Option<String>,

    /// Subdirectories to scan under every target (e.g. "admin/,api/").
    #[arg(long, value_delimiter = ',')]
    pub subdirs: Vec<String>,

    /// Subdirectories never descended into.
    #[arg(long, value_delimiter = ',')]
    pub exclude_subdirs: Vec<String>,

    /// Keep only these status codes (e.g. "200-299,401").
    #[arg(short = 'i', long)]
    pub include_status: Option<String>,

    /// Drop these status codes.
    #[arg(short = 'x', long)]
    pub exclude_status: Option<String>,

    /// Drop responses by human-readable size (e.g. "123B,4KB").
    #[arg(long, value_delimiter = ',')]
    pub exclude_sizes: Vec<String>,

    /// Drop responses containing any of these texts.
    #[arg(long, value_delimiter = ',')]
    pub exclude_texts: Vec<String>,

    /// Drop responses whose body matches this regex.
    #[arg(long)]
    pub exclude_regex: Option<String>,

    /// Drop responses redirecting to a target containing or matching this.
    #[arg(long)]
    pub exclude_redirect: Option<String>,

    /// Path whose response acts as an extra not-found baseline.
    #[arg(long)]
    pub exclude_response: Option<String>,

    /// Minimum response size in bytes.
    #[arg(long, default_value_t = 0)]
    pub min_response_size: u64,

    /// Maximum response size in bytes (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_response_size: u64,

    /// Skip the whole target when one of these status codes shows up.
    #[arg(long)]
    pub skip_on_status: Option<String>,

    /// Delay in seconds between requests of a single worker.
    #[arg(long, default_value_t = 0.0)]
    pub delay: f64,

    /// Maximum requests per second across all workers (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_rate: usize,

    /// Retries per failed request.
    #[arg(long, default_value_t = 1)]
    pub max_retries: usize,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 7.5)]
    pub timeout: f64,

    /// Maximum runtime per target in seconds (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub maxtime: u64,

    /// Follow redirects.
    #[arg(short = 'F', long)]
    pub follow_redirects: bool,

    /// Feed links found in matched responses back into the scan.
    #[arg(long)]
    pub crawl: bool,

    /// Default scheme for schemeless targets (http or https).
    #[arg(long)]
    pub scheme: Option<String>,

    /// Resolve target hosts to this IP address.
    #[arg(long)]
    pub ip: Option<String>,

    /// Stop the whole scan on the first request error.
    #[arg(long)]
    pub exit_on_error: bool,

    /// Report file path.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Directory for auto-named reports.
    #[arg(long)]
    pub output_path: Option<PathBuf>,

    /// Report format: plain, simple, json, xml, md, csv, html.
    #[arg(long, default_value = "plain")]
    pub format: String,

    /// Write debug logs to this file.
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Session file: resumed from when it exists, written on quit.
    #[arg(long)]
    pub session_file: Option<PathBuf>,

    /// Print full URLs instead of paths.
    #[arg(long)]
    pub full_url: bool,

    /// Disable colored output.
    #[arg(long)]
    pub no_color: bool,

    /// Print results only.
    #[arg(short = 'q', long)]
    pub quiet: bool,
}
