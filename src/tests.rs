//! Tests for the dictionary expansion, rate limiting, request pipeline,
//! fuzzing engine, controller policies, analysis and reporting.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::analyzer::{FEATURE_NAMES, FeatureRow, get_features, preprocess, standardize_body};
use crate::auth::{self, Auth};
use crate::client::HttpClient;
use crate::cluster::{NOISE, dbscan, identify_not_found, silhouette_score};
use crate::controller::Controller;
use crate::dictionary::{Casing, Dictionary, WordlistPolicy};
use crate::errors::ScanError;
use crate::fuzzer::{FuzzEvent, Fuzzer};
use crate::options::Options;
use crate::output::Output;
use crate::ratelimit::RateLimiter;
use crate::report::{ReportWriter, create_report};
use crate::response::Response;
use crate::session::{SESSION_VERSION, Session};
use crate::utils::*;

// Helper: a fully populated Options with everything off.
fn test_options() -> Options {
    Options {
        urls: vec!["http://example.com/".to_string()],
        http_method: "GET".to_string(),
        headers: Vec::new(),
        data: None,
        cert_file: None,
        key_file: None,
        auth: None,
        auth_type: None,
        proxies: Vec::new(),
        proxy_auth: None,
        replay_proxy: None,
        random_agent: false,
        wordlists: Vec::new(),
        wordlist_policy: WordlistPolicy::default(),
        threads: 2,
        recursive: false,
        deep_recursive: false,
        force_recursive: false,
        recursion_depth: 0,
        recursion_status_codes: HashSet::new(),
        subdirs: vec![String::new()],
        exclude_subdirs: Vec::new(),
        include_status_codes: HashSet::new(),
        exclude_status_codes: HashSet::new(),
        exclude_sizes: Vec::new(),
        exclude_texts: Vec::new(),
        exclude_regex: None,
        exclude_redirect: None,
        exclude_response: None,
        min_response_size: 0,
        max_response_size: 0,
        skip_on_status: HashSet::new(),
        delay: 0.0,
        max_rate: 0,
        max_retries: 0,
        timeout: 5.0,
        maxtime: 0,
        follow_redirects: false,
        crawl: false,
        scheme: None,
        ip: None,
        exit_on_error: false,
        output: None,
        output_path: None,
        format: "plain".to_string(),
        log: None,
        session_file: None,
        full_url: false,
        no_color: true,
        quiet: true,
    }
}

// Helper: a controller over a throwaway one-word dictionary.
fn test_controller(mut options: Options) -> Controller {
    let wordlist = std::env::temp_dir().join(format!(
        "dirsift_test_wordlist_{}.txt",
        std::process::id()
    ));
    std::fs::write(&wordlist, "admin\n").unwrap();
    options.wordlists = vec![wordlist];
    Controller::new(options, Output::new(true, true)).unwrap()
}

fn make_response(path: &str, status: u16, body: &[u8], content_type: &str) -> Response {
    Response {
        url: format!("http://example.com/{path}"),
        path: path.to_string(),
        status,
        body: body.to_vec(),
        length: body.len() as u64,
        content_type: content_type.to_string(),
        redirect: String::new(),
        history: Vec::new(),
    }
}

fn generate(lines: &[&str], policy: &WordlistPolicy) -> Vec<String> {
    let dictionary = Dictionary::from_lines(lines.iter().map(|l| l.to_string()), policy);
    dictionary.iter().cloned().collect()
}

// DICTIONARY TESTS

#[test]
fn test_dictionary_ext_tag_expansion() {
    let policy = WordlistPolicy {
        extensions: vec!["php".into(), "html".into()],
        ..WordlistPolicy::default()
    };
    let entries = generate(&["admin", "index.%EXT%", "api/"], &policy);
    assert_eq!(entries, vec!["admin", "index.php", "index.html", "api/"]);
}

#[test]
fn test_dictionary_ext_tag_is_case_insensitive() {
    let policy = WordlistPolicy {
        extensions: vec!["php".into()],
        ..WordlistPolicy::default()
    };
    let entries = generate(&["backup.%ext%"], &policy);
    assert_eq!(entries, vec!["backup.php"]);
}

#[test]
fn test_dictionary_force_extensions() {
    let policy = WordlistPolicy {
        extensions: vec!["php".into()],
        force_extensions: true,
        ..WordlistPolicy::default()
    };
    let entries = generate(&["test"], &policy);
    assert_eq!(entries, vec!["test", "test/", "test.php"]);
}

#[test]
fn test_dictionary_force_extensions_keeps_directories_unchanged() {
    let policy = WordlistPolicy {
        extensions: vec!["php".into()],
        force_extensions: true,
        ..WordlistPolicy::default()
    };
    let entries = generate(&["uploads/"], &policy);
    assert_eq!(entries, vec!["uploads/"]);
}

#[test]
fn test_dictionary_overwrite_extensions() {
    let policy = WordlistPolicy {
        extensions: vec!["php".into(), "html".into()],
        overwrite_extensions: true,
        ..WordlistPolicy::default()
    };
    let entries = generate(&["a.bak"], &policy);
    assert_eq!(entries, vec!["a.bak", "a.php", "a.html"]);
}

#[test]
fn test_dictionary_overwrite_skips_kept_and_query_paths() {
    let policy = WordlistPolicy {
        extensions: vec!["php".into()],
        overwrite_extensions: true,
        ..WordlistPolicy::default()
    };
    // .json is in the keep list; the query path is left alone entirely.
    assert_eq!(generate(&["data.json"], &policy), vec!["data.json"]);
    assert_eq!(generate(&["exploit.cgi?x=1"], &policy), vec!["exploit.cgi?x=1"]);
}

#[test]
fn test_dictionary_skips_comments_and_dedupes() {
    let policy = WordlistPolicy::default();
    let entries = generate(&["# comment", "", "admin", "admin", "/admin", "login"], &policy);
    assert_eq!(entries, vec!["admin", "login"]);
}

#[test]
fn test_dictionary_exclude_and_remove_extensions() {
    let exclude = WordlistPolicy {
        exclude_extensions: vec!["log".into()],
        ..WordlistPolicy::default()
    };
    assert_eq!(generate(&["debug.log", "app.php"], &exclude), vec!["app.php"]);

    let remove = WordlistPolicy {
        remove_extensions: true,
        ..WordlistPolicy::default()
    };
    assert_eq!(generate(&["app.php.bak"], &remove), vec!["app"]);
}

#[test]
fn test_dictionary_prefix_suffix_expansion() {
    let policy = WordlistPolicy {
        prefixes: vec![".".into()],
        suffixes: vec!["~".into()],
        ..WordlistPolicy::default()
    };
    let entries = generate(&["admin", ".hidden", "dir/"], &policy);
    // Prefixed variants for entries not already starting with the prefix,
    // suffixed variants for entries not ending with / or the suffix.
    assert_eq!(entries, vec![".admin", "admin~", ".hidden~", ".dir/"]);
}

#[test]
fn test_dictionary_casing() {
    let policy = WordlistPolicy {
        casing: Casing::Capitalize,
        ..WordlistPolicy::default()
    };
    assert_eq!(generate(&["aDmIn"], &policy), vec!["Admin"]);

    let policy = WordlistPolicy {
        casing: Casing::Uppercase,
        ..WordlistPolicy::default()
    };
    assert_eq!(generate(&["admin"], &policy), vec!["ADMIN"]);
}

#[test]
fn test_dictionary_reset_is_idempotent() {
    let policy = WordlistPolicy::default();
    let dictionary = Dictionary::from_lines(
        ["a", "b", "c"].iter().map(|l| l.to_string()),
        &policy,
    );

    let mut first = Vec::new();
    while let Some(entry) = dictionary.next() {
        first.push(entry);
    }
    dictionary.reset();
    let mut second = Vec::new();
    while let Some(entry) = dictionary.next() {
        second.push(entry);
    }
    assert_eq!(first, second);
    assert_eq!(first, vec!["a", "b", "c"]);
}

#[test]
fn test_dictionary_concurrent_iteration_yields_each_entry_once() {
    use std::thread;

    let policy = WordlistPolicy::default();
    let lines: Vec<String> = (0..500).map(|i| format!("path{i}")).collect();
    let dictionary = Arc::new(Dictionary::from_lines(lines.into_iter(), &policy));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let dictionary = Arc::clone(&dictionary);
        handles.push(thread::spawn(move || {
            let mut taken = Vec::new();
            while let Some(entry) = dictionary.next() {
                taken.push(entry);
            }
            taken
        }));
    }

    let mut all: Vec<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(all.len(), 500);
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 500);
}

#[test]
fn test_dictionary_generate_from_file() {
    let path = std::env::temp_dir().join(format!("dirsift_wordlist_{}.txt", std::process::id()));
    std::fs::write(&path, "admin\nlogin\n\n# skip\n").unwrap();

    let dictionary = Dictionary::generate(&[path.clone()], &WordlistPolicy::default()).unwrap();
    assert_eq!(dictionary.len(), 2);
    assert!(dictionary.contains("admin"));
    assert!(dictionary.contains("login"));

    std::fs::remove_file(path).unwrap();
}

// RATE LIMITER TESTS

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_caps_requests_per_second() {
    let limiter = RateLimiter::new(2);
    let start = tokio::time::Instant::now();

    limiter.throttle().await;
    limiter.throttle().await;
    assert!(start.elapsed() < Duration::from_millis(50));

    // The third dispatch has to wait for the window to roll over.
    limiter.throttle().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "got {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(1500), "got {elapsed:?}");
    assert_eq!(limiter.rate(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_disabled_at_zero() {
    let limiter = RateLimiter::new(0);
    let start = tokio::time::Instant::now();
    for _ in 0..50 {
        limiter.throttle().await;
    }
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(limiter.rate(), 50);
}

// UTILS TESTS

#[test]
fn test_safequote_preserves_encoded_sequences_and_slashes() {
    assert_eq!(safequote("%2e%2e//a"), "%2e%2e//a");
    assert_eq!(safequote("a b"), "a%20b");
    assert_eq!(safequote("a<b>c"), "a%3Cb%3Ec");
    assert_eq!(safequote("path?q=1&x=[2]"), "path?q=1&x=[2]");
}

#[test]
fn test_human_size() {
    assert_eq!(human_size(0), "0B");
    assert_eq!(human_size(123), "123B");
    assert_eq!(human_size(4096), "4KB");
    assert_eq!(human_size(1536), "2KB");
    assert_eq!(human_size(3 * 1024 * 1024), "3MB");
}

#[test]
fn test_clean_path_and_parse_path() {
    assert_eq!(clean_path("a/b?x=1"), "a/b");
    assert_eq!(clean_path("a/b#frag"), "a/b");
    assert_eq!(parse_path("http://host/app/admin/"), "app/admin/");
    assert_eq!(parse_path("/app/admin"), "app/admin");
}

#[test]
fn test_parse_status_codes_with_ranges() {
    let codes = parse_status_codes("200,500-502").unwrap();
    assert_eq!(codes, HashSet::from([200, 500, 501, 502]));
    assert!(parse_status_codes("abc").is_err());
}

#[test]
fn test_parse_raw_request() {
    let raw = "GET /app/ HTTP/1.1\nHost: example.com\nX-Token: abc\n\nbody here\n";
    let parsed = parse_raw_request(raw).unwrap();
    assert_eq!(parsed.method, "GET");
    assert_eq!(parsed.url, "example.com/app/");
    assert!(parsed.headers.contains(&("X-Token".into(), "abc".into())));
    assert_eq!(parsed.data.as_deref(), Some("body here"));

    assert!(parse_raw_request("").is_err());
    assert!(parse_raw_request("GET /x HTTP/1.1\nNoColonHere\n").is_err());
}

// AUTH TESTS

#[test]
fn test_digest_authorization_rfc_vector() {
    let challenge = "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
                     nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", \
                     opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"";
    let header = auth::digest_authorization(
        challenge,
        "GET",
        "/dir/index.html",
        "Mufasa",
        "Circle Of Life",
        "0a4f113b",
        1,
    )
    .unwrap();

    assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""));
    assert!(header.contains("qop=auth"));
    assert!(header.contains("nc=00000001"));
    assert!(header.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
}

#[test]
fn test_ntowf_v2_vector() {
    // MS-NLMP 4.2.4.1.1: User / Domain / Password.
    let hash = auth::ntowf_v2("User", "Password", "Domain");
    assert_eq!(
        hash,
        [
            0x0c, 0x86, 0x8a, 0x40, 0x3b, 0xfd, 0x7a, 0x93, 0xa3, 0x00, 0x1e, 0xf2, 0x2e, 0xf0,
            0x2e, 0x3f
        ]
    );
}

#[test]
fn test_ntlm_negotiate_and_challenge_roundtrip() {
    let negotiate = auth::ntlm_negotiate();
    assert_eq!(&negotiate[..8], b"NTLMSSP\0");
    assert_eq!(negotiate[8], 1);

    // Synthetic type 2 message: challenge at 24, target info at 48.
    let mut type2 = Vec::new();
    type2.extend(b"NTLMSSP\0");
    type2.extend(2u32.to_le_bytes());
    type2.extend([0u8; 8]); // target name
    type2.extend(0x0008_8207u32.to_le_bytes());
    type2.extend([0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]); // challenge
    type2.extend([0u8; 8]); // context
    let target_info = [0x02u8, 0x00, 0x04, 0x00, 0x41, 0x00, 0x42, 0x00];
    type2.extend((target_info.len() as u16).to_le_bytes());
    type2.extend((target_info.len() as u16).to_le_bytes());
    type2.extend(48u32.to_le_bytes());
    type2.extend(target_info);

    let challenge = auth::parse_ntlm_challenge(&type2).unwrap();
    assert_eq!(
        challenge.server_challenge,
        [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]
    );
    assert_eq!(challenge.target_info, target_info);

    let client_nonce = [0xaau8; 8];
    let type3 = auth::ntlm_authenticate(
        &challenge,
        "Domain",
        "User",
        "Password",
        "WORKSTATION",
        &client_nonce,
        0,
    );
    assert_eq!(&type3[..8], b"NTLMSSP\0");
    assert_eq!(type3[8], 3);
    // NT response security buffer: length at 20, offset at 24.
    let nt_len = u16::from_le_bytes([type3[20], type3[21]]) as usize;
    let nt_off = u32::from_le_bytes([type3[24], type3[25], type3[26], type3[27]]) as usize;
    assert!(nt_len > 16);
    assert_eq!(nt_off + nt_len, type3.len());
}

#[test]
fn test_auth_parsing() {
    match Auth::new("ntlm", "CORP\\alice:secret").unwrap() {
        Auth::Ntlm {
            domain,
            username,
            password,
        } => {
            assert_eq!(domain, "CORP");
            assert_eq!(username, "alice");
            assert_eq!(password, "secret");
        }
        other => panic!("unexpected auth: {other:?}"),
    }

    match Auth::new("jwt", "tok123").unwrap() {
        Auth::Bearer { token } => assert_eq!(token, "tok123"),
        other => panic!("unexpected auth: {other:?}"),
    }

    assert!(Auth::new("kerberos", "x").is_err());
}

// CLUSTER TESTS

#[test]
fn test_dbscan_separates_blobs_and_noise() {
    let mut data = Vec::new();
    for i in 0..6 {
        data.push(vec![i as f64 * 0.01]);
    }
    for i in 0..6 {
        data.push(vec![10.0 + i as f64 * 0.01]);
    }
    data.push(vec![50.0]);

    let labels = dbscan(&data, 0.5, 5);
    assert_eq!(labels[0], 0);
    assert!(labels[..6].iter().all(|&l| l == 0));
    assert!(labels[6..12].iter().all(|&l| l == 1));
    assert_eq!(labels[12], NOISE);
}

#[test]
fn test_silhouette_score_for_separated_blobs() {
    let data = vec![
        vec![0.0],
        vec![0.1],
        vec![0.2],
        vec![10.0],
        vec![10.1],
        vec![10.2],
    ];
    let labels = vec![0, 0, 0, 1, 1, 1];
    let score = silhouette_score(&data, &labels);
    assert!(score > 0.9);
    assert!(score <= 1.0);
}

#[test]
fn test_identify_not_found_minority_budget() {
    // 60 rows in one dense cluster, 3 outliers.
    let mut data = Vec::new();
    for _ in 0..60 {
        data.push(vec![0.0, 0.0]);
    }
    data.push(vec![30.0, 0.0]);
    data.push(vec![0.0, 30.0]);
    data.push(vec![30.0, 30.0]);

    let (labels, results, report) = identify_not_found(&data);
    assert_eq!(labels.len(), 63);

    let success_ratio: f64 = report
        .label_description
        .values()
        .filter(|stats| stats.success)
        .map(|stats| stats.ratio)
        .sum();
    assert!(success_ratio <= 0.10 + f64::EPSILON, "got {success_ratio}");

    // The outliers are the existing assets, the majority is not.
    assert!(results[60] && results[61] && results[62]);
    assert!(!results[0]);
}

#[test]
fn test_identify_not_found_single_cluster_scores_one() {
    let data = vec![vec![1.0, 2.0]; 8];
    let (_labels, _results, report) = identify_not_found(&data);
    assert_eq!(report.best_clusters, 1);
    assert_eq!(report.best_score, 1.0);
}

// ANALYZER TESTS

#[test]
fn test_standardize_body_collapses_digits_and_whitespace() {
    let standardized = standardize_body(b"", b"  abc 123 def 456  ");
    assert_eq!(standardized, b"abc0def0");
}

#[test]
fn test_standardize_body_removes_request_url_and_path() {
    let url = b"http://example.com/app/missing";
    let body = b"<p>The page http://example.com/app/missing (/app/missing) was not found</p>";
    let standardized = standardize_body(url, body);
    let text = String::from_utf8(standardized).unwrap();
    assert!(!text.contains("missing"));
    assert!(text.contains("Thepage"));
}

#[test]
fn test_get_features_counts_tokens() {
    let body = b"<a>;;(){}[]</a>";
    let features = get_features(b"", 404, body.len(), body);
    assert_eq!(features.len(), FEATURE_NAMES.len());
    assert_eq!(features[0], 404.0);
    assert_eq!(features[1], body.len() as f64);

    let index_of = |name: &str| FEATURE_NAMES.iter().position(|n| *n == name).unwrap();
    assert_eq!(features[index_of("c:;")], 2.0);
    assert_eq!(features[index_of("c:(")], 1.0);
    assert_eq!(features[index_of("c:)")], 1.0);
    assert_eq!(features[index_of("c:</")], 1.0);
    assert_eq!(features[index_of("c:<")], 2.0);
    assert_eq!(features[index_of("c:[")], 1.0);
}

#[test]
fn test_preprocess_dimensions_and_densities() {
    let rows = vec![
        FeatureRow {
            features: get_features(b"", 200, 10, b"<<<<<abcde"),
            url: "http://example.com/a".into(),
            content_type: "text/html".into(),
        },
        FeatureRow {
            features: get_features(b"", 404, 4, b"{}[]"),
            url: "http://example.com/b".into(),
            content_type: "application/json".into(),
        },
    ];
    let matrix = preprocess(&rows);

    // 24 density columns + 2 status dummies + change + length + 2 type dummies
    assert_eq!(matrix.len(), 2);
    assert_eq!(matrix[0].len(), 24 + 2 + 1 + 1 + 2);
    assert!(matrix.iter().flatten().all(|v| v.is_finite()));

    // Density of '{' in the second row: one occurrence over 4 bytes.
    let brace_column = FEATURE_NAMES.iter().position(|n| *n == "c:{").unwrap() - 3;
    assert_eq!(matrix[1][brace_column], 0.25);
}

#[test]
fn test_preprocess_zero_length_body_yields_zero_densities() {
    let rows = vec![
        FeatureRow {
            features: get_features(b"", 200, 0, b""),
            url: "http://example.com/a".into(),
            content_type: "text/html".into(),
        };
        2
    ];
    let matrix = preprocess(&rows);
    assert!(matrix.iter().flatten().all(|v| *v == 0.0 || *v == 1.0));
}

#[test]
fn test_analysis_scenario_majority_soft_404() {
    // 97 identical soft-404 pages, two unique API replies, one crash.
    let mut responses = Vec::new();
    let soft = b"<html><head><title>Site</title></head><body>Page not found, sorry!</body></html>";
    for i in 0..97 {
        responses.push(make_response(&format!("p{i}"), 200, soft, "text/html"));
    }
    responses.push(make_response(
        "api/users",
        200,
        br#"{"users": [{"id": 1, "name": "admin"}, {"id": 2, "name": "guest"}]}"#,
        "application/json",
    ));
    responses.push(make_response(
        "api/orders",
        200,
        br#"[{"order": 991, "total": 12.5}]"#,
        "application/json",
    ));
    responses.push(make_response(
        "cgi/crash",
        500,
        b"<html><body><h1>Internal Server Error</h1><pre>stack trace 42</pre></body></html>",
        "text/html",
    ));

    let rows: Vec<FeatureRow> = responses.iter().map(FeatureRow::from_response).collect();
    let matrix = preprocess(&rows);
    let (_labels, results, report) = identify_not_found(&matrix);

    assert!(report.best_clusters >= 2);

    let existed: Vec<&Response> = results
        .iter()
        .zip(&responses)
        .filter(|(success, r)| {
            **success && ((200..300).contains(&r.status) || r.status >= 500)
        })
        .map(|(_, r)| r)
        .collect();
    assert_eq!(existed.len(), 3);
    assert!(existed.iter().any(|r| r.path == "api/users"));
    assert!(existed.iter().any(|r| r.path == "cgi/crash"));
}

#[test]
fn test_analysis_single_response_is_one_cluster() {
    let responses = vec![make_response("only", 200, b"<html>unique 1</html>", "text/html")];
    let rows: Vec<FeatureRow> = responses.iter().map(FeatureRow::from_response).collect();
    let matrix = preprocess(&rows);
    let (_labels, _results, report) = identify_not_found(&matrix);
    assert_eq!(report.best_clusters, 1);
    assert_eq!(report.best_score, 1.0);
}

// CONTROLLER TESTS

#[tokio::test]
async fn test_is_valid_filters() {
    let mut options = test_options();
    options.exclude_status_codes = HashSet::from([404]);
    options.include_status_codes = HashSet::from([200, 404, 301]);
    options.min_response_size = 5;
    options.max_response_size = 5000;
    options.exclude_texts = vec!["Access denied".to_string()];
    options.exclude_regex = Some("trace id: [0-9]+".to_string());
    options.exclude_sizes = vec!["2KB".to_string()];
    let controller = test_controller(options);

    assert!(controller.is_valid(&make_response("ok", 200, b"hello world", "text/plain")));
    // Excluded status.
    assert!(!controller.is_valid(&make_response("gone", 404, b"hello world", "text/plain")));
    // Not in the include list.
    assert!(!controller.is_valid(&make_response("teapot", 418, b"hello world", "text/plain")));
    // Too small / too big.
    assert!(!controller.is_valid(&make_response("tiny", 200, b"hi", "text/plain")));
    assert!(!controller.is_valid(&make_response("big", 200, &[b'a'; 6000], "text/plain")));
    // Excluded human size (1536B rounds to 2KB).
    assert!(!controller.is_valid(&make_response("sized", 200, &[b'a'; 1536], "text/plain")));
    // Body text and regex filters.
    assert!(!controller.is_valid(&make_response("deny", 200, b"Access denied here", "text/html")));
    assert!(!controller.is_valid(&make_response(
        "trace",
        200,
        b"failure trace id: 9817",
        "text/html"
    )));
}

#[tokio::test]
async fn test_is_valid_exclude_redirect() {
    let mut options = test_options();
    options.exclude_redirect = Some("/login".to_string());
    let controller = test_controller(options);

    let mut redirected = make_response("admin", 301, b"", "text/html");
    redirected.redirect = "http://example.com/login?next=admin".to_string();
    assert!(!controller.is_valid(&redirected));

    let mut other = make_response("admin", 301, b"", "text/html");
    other.redirect = "http://example.com/admin/".to_string();
    assert!(controller.is_valid(&other));
}

#[tokio::test]
async fn test_add_directory_depth_cap_and_dedup() {
    let mut options = test_options();
    options.recursion_depth = 1;
    let mut controller = test_controller(options);
    controller.set_target("http://example.com/app/").await.unwrap();

    controller.add_directory("app/admin/");
    assert_eq!(controller.directories.len(), 1);
    // Duplicate URL.
    controller.add_directory("app/admin/");
    assert_eq!(controller.directories.len(), 1);
    // One level too deep.
    controller.add_directory("app/admin/deep/");
    assert_eq!(controller.directories.len(), 1);
}

#[tokio::test]
async fn test_add_directory_exclude_subdirs() {
    let mut options = test_options();
    options.exclude_subdirs = vec!["static".to_string()];
    let mut controller = test_controller(options);
    controller.set_target("http://example.com/").await.unwrap();

    controller.add_directory("app/static/");
    assert!(controller.directories.is_empty());
    controller.add_directory("app/data/");
    assert_eq!(controller.directories.len(), 1);
}

#[tokio::test]
async fn test_recur_recursive_skips_extensions() {
    let mut options = test_options();
    options.recursive = true;
    let mut controller = test_controller(options);
    controller.set_target("http://example.com/app/").await.unwrap();

    let added = controller.recur("app/admin/");
    assert_eq!(added, vec!["app/admin/"]);

    // A path with a recognizable extension is not a directory.
    let added = controller.recur("app/admin.php/");
    assert!(added.is_empty());
    // Non-directories are ignored without force_recursive.
    let added = controller.recur("app/readme");
    assert!(added.is_empty());
}

#[tokio::test]
async fn test_recur_deep_recursive_queues_all_prefixes() {
    let mut options = test_options();
    options.deep_recursive = true;
    let mut controller = test_controller(options);
    controller.set_target("http://example.com/").await.unwrap();

    let added = controller.recur("a/b/c/");
    assert_eq!(added, vec!["a/", "a/b/", "a/b/c/"]);
}

#[tokio::test]
async fn test_recur_for_redirect_trailing_slash_only() {
    let mut options = test_options();
    options.recursive = true;
    let mut controller = test_controller(options);
    controller.set_target("http://example.com/app/").await.unwrap();

    let added = controller.recur_for_redirect("app/admin", "app/admin/");
    assert_eq!(added, vec!["app/admin/"]);

    let added = controller.recur_for_redirect("app/admin", "app/elsewhere/");
    assert!(added.is_empty());
}

#[tokio::test]
async fn test_set_target_rejects_bad_urls() {
    let mut controller = test_controller(test_options());

    let err = controller.set_target("ftp://example.com/").await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidUrl(_)));

    let err = controller
        .set_target("http://example.com:99999/")
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::InvalidUrl(_)));
}

#[tokio::test]
async fn test_set_target_normalizes_port_and_base_path() {
    let mut controller = test_controller(test_options());

    controller.set_target("http://example.com/app").await.unwrap();
    assert_eq!(controller.url, "http://example.com/");
    assert_eq!(controller.base_path, "app/");

    controller
        .set_target("http://example.com:8080/")
        .await
        .unwrap();
    assert_eq!(controller.url, "http://example.com:8080/");
}

// SESSION TESTS

#[tokio::test]
async fn test_session_round_trip() {
    let session_path = std::env::temp_dir().join(format!(
        "dirsift_session_{}.json",
        std::process::id()
    ));

    let mut controller = test_controller(test_options());
    controller.set_target("http://example.com/").await.unwrap();
    controller.add_directory("admin/");
    controller.add_directory("api/");
    controller.targets.push_back("http://second.example.com/".to_string());
    controller.current_job = 3;
    controller.errors = 7;
    controller.responses.push(make_response("admin/", 200, b"x", "text/html"));

    controller.export_session(&session_path).unwrap();

    let session = Session::load(&session_path).unwrap();
    assert_eq!(session.version, SESSION_VERSION);
    assert_eq!(session.targets, controller.targets);
    assert_eq!(session.directories, controller.directories);
    assert_eq!(session.errors, 7);
    // The in-flight job is rolled back by one.
    assert_eq!(session.current_job, 2);
    assert_eq!(session.responses.len(), 1);

    // A fresh controller resumed from the snapshot picks up the same state.
    let mut resume_options = test_options();
    resume_options.session_file = Some(session_path.clone());
    let resumed = Controller::new(resume_options, Output::new(true, true)).unwrap();
    assert_eq!(resumed.targets, controller.targets);
    assert_eq!(resumed.directories, controller.directories);
    assert_eq!(resumed.current_job, 2);
    assert_eq!(resumed.errors, 7);

    std::fs::remove_file(session_path).unwrap();
}

#[test]
fn test_session_rejects_garbage_and_old_versions() {
    let path = std::env::temp_dir().join(format!(
        "dirsift_bad_session_{}.json",
        std::process::id()
    ));

    std::fs::write(&path, "not json at all").unwrap();
    assert!(matches!(Session::load(&path), Err(ScanError::Session(_))));

    let mut session_json = serde_json::json!({
        "version": SESSION_VERSION + 1,
    });
    // Fill the remaining fields from a real snapshot so only the version is wrong.
    let options = test_options();
    session_json["targets"] = serde_json::json!([]);
    session_json["directories"] = serde_json::json!([]);
    session_json["passed_urls"] = serde_json::json!([]);
    session_json["dictionary_index"] = serde_json::json!(0);
    session_json["current_job"] = serde_json::json!(0);
    session_json["errors"] = serde_json::json!(0);
    session_json["options"] = serde_json::to_value(&options).unwrap();
    session_json["results"] = serde_json::json!([]);
    session_json["responses"] = serde_json::json!([]);
    session_json["last_output"] = serde_json::json!("");
    std::fs::write(&path, session_json.to_string()).unwrap();
    assert!(matches!(Session::load(&path), Err(ScanError::Session(_))));

    std::fs::remove_file(path).unwrap();
}

// REPORT TESTS

#[test]
fn test_plain_report_generate() {
    let report = create_report("plain", PathBuf::from("/tmp/dirsift_report.txt"));
    let mut response = make_response("admin/", 301, b"redirecting", "text/html");
    response.redirect = "http://example.com/admin/index.html".to_string();

    let content = report.generate(&[response]);
    assert!(content.contains("301"));
    assert!(content.contains("http://example.com/admin/"));
    assert!(content.contains("->  http://example.com/admin/index.html"));
}

#[test]
fn test_json_report_generate() {
    let report = create_report("json", PathBuf::from("/tmp/dirsift_report.json"));
    let content = report.generate(&[make_response("api", 200, b"data", "application/json")]);
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(parsed["results"][0]["status"], 200);
    assert_eq!(parsed["results"][0]["url"], "http://example.com/api");
    assert_eq!(parsed["results"][0]["content-type"], "application/json");
}

#[test]
fn test_csv_report_escapes_fields() {
    let report = create_report("csv", PathBuf::from("/tmp/dirsift_report.csv"));
    let mut response = make_response("weird", 200, b"x", "text/html");
    response.url = "http://example.com/a,b".to_string();
    let content = report.generate(&[response]);
    assert!(content.starts_with("URL,Status,Size,Content-Type,Redirect\n"));
    assert!(content.contains("\"http://example.com/a,b\""));
}

#[test]
fn test_xml_report_escapes_markup() {
    let report = create_report("xml", PathBuf::from("/tmp/dirsift_report.xml"));
    let mut response = make_response("x", 200, b"x", "text/html");
    response.url = "http://example.com/?a=<b>&c=d".to_string();
    let content = report.generate(&[response]);
    assert!(content.contains("&lt;b&gt;"));
    assert!(content.contains("&amp;c=d"));
    assert!(!content.contains("<b>&c"));
}

#[test]
fn test_report_save_and_information_append() {
    let path = std::env::temp_dir().join(format!("dirsift_report_{}.txt", std::process::id()));
    let mut report = create_report("plain", path.clone());

    report
        .save(&[make_response("admin", 200, b"hello", "text/html")])
        .unwrap();
    report.save_information("\nextra information\n").unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("http://example.com/admin"));
    assert!(content.ends_with("extra information\n"));

    std::fs::remove_file(path).unwrap();
}

// CLIENT + FUZZER INTEGRATION TESTS

const SOFT_404_BODY: &str = "<html><head><title>Site</title></head>\
                             <body><h1>Oops</h1><p>We could not find that page.</p></body></html>";

async fn spawn_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                loop {
                    let Ok(n) = socket.read(&mut buf[read..]).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    read += n;
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&buf[..read]);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let bare = path.split(['?', '#']).next().unwrap_or("/");

                let (status, content_type, body) = match bare {
                    "/hello" => ("200 OK", "text/plain", "hello world".to_string()),
                    "/admin" => (
                        "200 OK",
                        "text/html",
                        "<html><body><a href=\"/admin/panel\">panel</a>Admin area</body></html>"
                            .to_string(),
                    ),
                    "/admin/panel" => (
                        "200 OK",
                        "application/json",
                        "{\"panel\": true}".to_string(),
                    ),
                    "/old" => ("301 Moved Permanently", "text/html", String::new()),
                    "/new" => ("200 OK", "text/plain", "you made it".to_string()),
                    "/missing" => ("404 Not Found", "text/html", "not here".to_string()),
                    p if p.starts_with("/echo") => ("200 OK", "text/plain", p.to_string()),
                    _ => ("200 OK", "text/html", SOFT_404_BODY.to_string()),
                };

                let location = if bare == "/old" {
                    "Location: /new\r\n"
                } else {
                    ""
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\n{location}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

fn test_client(addr: SocketAddr, options: &Options) -> Arc<HttpClient> {
    let client = Arc::new(HttpClient::new(options, None).unwrap());
    client.set_url(&format!("http://{addr}/"));
    client
}

#[tokio::test]
async fn test_client_request_basics() {
    let addr = spawn_test_server().await;
    let client = test_client(addr, &test_options());

    let response = client.request("hello", None).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.path, "hello");
    assert_eq!(response.content(), "hello world");
    assert_eq!(response.content_type, "text/plain");
    assert_eq!(response.length, 11);

    let response = client.request("missing", None).await.unwrap();
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_client_reports_redirect_as_metadata() {
    let addr = spawn_test_server().await;
    let client = test_client(addr, &test_options());

    let response = client.request("old", None).await.unwrap();
    assert_eq!(response.status, 301);
    assert_eq!(response.redirect, "/new");
    assert!(response.history.is_empty());
}

#[tokio::test]
async fn test_client_follows_redirects_with_history() {
    let addr = spawn_test_server().await;
    let mut options = test_options();
    options.follow_redirects = true;
    let client = test_client(addr, &options);

    let response = client.request("old", None).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content(), "you made it");
    assert!(response.url.ends_with("/new"));
    assert_eq!(response.history.len(), 1);
    assert!(response.history[0].ends_with("/old"));
}

#[tokio::test]
async fn test_client_preserves_literal_path() {
    let addr = spawn_test_server().await;
    let client = test_client(addr, &test_options());

    let response = client.request("echo//double%2fslash", None).await.unwrap();
    assert_eq!(response.content(), "/echo//double%2fslash");
}

#[tokio::test]
async fn test_client_connect_error_classification() {
    // A port nothing listens on.
    let mut options = test_options();
    options.timeout = 2.0;
    let client = Arc::new(HttpClient::new(&options, None).unwrap());
    client.set_url("http://127.0.0.1:9/");

    let err = client.request("x", None).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot connect to: 127.0.0.1:9");
}

#[tokio::test]
async fn test_fuzzer_classifies_soft_404_against_baseline() {
    let addr = spawn_test_server().await;
    let options = test_options();
    let client = test_client(addr, &options);
    let dictionary = Arc::new(Dictionary::from_lines(
        ["admin", "foo", "bar"].iter().map(|l| l.to_string()),
        &WordlistPolicy::default(),
    ));

    let (tx, mut rx) = mpsc::channel(64);
    let mut fuzzer = Fuzzer::new(client, dictionary, String::new(), &options, tx);
    fuzzer.start().await;

    let mut matches = Vec::new();
    let mut not_found = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            FuzzEvent::Match(response) => matches.push(response),
            FuzzEvent::NotFound(response) => not_found.push(response),
            FuzzEvent::Error(err, path) => panic!("unexpected error for {path}: {err}"),
        }
    }

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "admin");
    assert_eq!(not_found.len(), 2);
    assert!(fuzzer.wait(2.0).await);
    assert!(fuzzer.is_stopped());
}

#[tokio::test]
async fn test_fuzzer_empty_dictionary_drains_immediately() {
    let addr = spawn_test_server().await;
    let options = test_options();
    let client = test_client(addr, &options);
    let dictionary = Arc::new(Dictionary::from_lines(
        std::iter::empty(),
        &WordlistPolicy::default(),
    ));

    let (tx, mut rx) = mpsc::channel(16);
    let mut fuzzer = Fuzzer::new(client, dictionary, String::new(), &options, tx);
    fuzzer.start().await;

    assert!(rx.recv().await.is_none());
    assert!(fuzzer.wait(2.0).await);
}

#[tokio::test]
async fn test_fuzzer_crawl_feeds_links_back() {
    let addr = spawn_test_server().await;
    let mut options = test_options();
    options.crawl = true;
    options.threads = 1;
    let client = test_client(addr, &options);
    let dictionary = Arc::new(Dictionary::from_lines(
        ["admin"].iter().map(|l| l.to_string()),
        &WordlistPolicy::default(),
    ));

    let (tx, mut rx) = mpsc::channel(64);
    let mut fuzzer = Fuzzer::new(client, dictionary, String::new(), &options, tx);
    fuzzer.start().await;

    let mut matched_paths = Vec::new();
    while let Some(event) = rx.recv().await {
        if let FuzzEvent::Match(response) = event {
            matched_paths.push(response.path);
        }
    }

    assert!(matched_paths.contains(&"admin".to_string()));
    assert!(matched_paths.contains(&"admin/panel".to_string()));
}

#[tokio::test]
async fn test_fuzzer_pause_and_resume() {
    let addr = spawn_test_server().await;
    let mut options = test_options();
    options.threads = 1;
    let client = test_client(addr, &options);
    let lines: Vec<String> = (0..50).map(|i| format!("word{i}")).collect();
    let dictionary = Arc::new(Dictionary::from_lines(
        lines.into_iter(),
        &WordlistPolicy::default(),
    ));

    let (tx, mut rx) = mpsc::channel(256);
    let mut fuzzer = Fuzzer::new(client, dictionary.clone(), String::new(), &options, tx);
    fuzzer.start().await;

    // Let a few requests through, then park the workers.
    let mut received = 0;
    while received < 3 {
        if rx.recv().await.is_some() {
            received += 1;
        }
    }
    fuzzer.pause();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let index_while_paused = dictionary.index();
    tokio::time::sleep(Duration::from_millis(300)).await;
    // At most one in-flight request finished after the gate closed.
    assert!(dictionary.index() <= index_while_paused + 1);
    assert!(!fuzzer.is_stopped());

    fuzzer.resume();
    while rx.recv().await.is_some() {}
    assert!(fuzzer.wait(2.0).await);
}
