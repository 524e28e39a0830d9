//! Post-scan analysis: turns every collected response into a numeric
//! feature row, preprocesses the matrix, clusters it, and reports the
//! minority clusters as existing assets.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use url::Url;

use crate::cluster::{self, ClusterReport};
use crate::errors::ScanError;
use crate::output::Output;
use crate::report::ReportWriter;
use crate::response::Response;

/// Column names of the raw feature matrix, in extraction order.
pub const FEATURE_NAMES: [&str; 27] = [
    "status_code",
    "body_length",
    "standard_body_length",
    "c:<",
    "c:>",
    "c:/",
    "c:</",
    "c:/>",
    "c:=/",
    "c:.",
    "c:'",
    "c:[",
    "c:]",
    "c:|",
    "c:&",
    "c:+",
    "c:-",
    "c:*",
    "c:{",
    "c:}",
    "c::",
    "c:\"",
    "c:,",
    "c:=",
    "c:(",
    "c:)",
    "c:;",
];

const COUNTED_TOKENS: [&[u8]; 24] = [
    b"<", b">", b"/", b"</", b"/>", b"=/", b".", b"'", b"[", b"]", b"|", b"&", b"+", b"-", b"*",
    b"{", b"}", b":", b"\"", b",", b"=", b"(", b")", b";",
];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s").unwrap());
static MULTI_SLASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"//+").unwrap());
static DIGIT_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());

/// One response's raw features plus the labels used for one-hot encoding.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub features: Vec<f64>,
    pub url: String,
    pub content_type: String,
}

impl FeatureRow {
    pub fn from_response(response: &Response) -> Self {
        Self {
            features: get_features(
                response.url.as_bytes(),
                response.status,
                response.body.len(),
                &response.body,
            ),
            url: response.url.clone(),
            content_type: response.content_type.clone(),
        }
    }
}

fn remove_subslice(haystack: &[u8], needle: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if haystack[i..].starts_with(needle) {
            count += 1;
            i += needle.len();
        } else {
            i += 1;
        }
    }
    count
}

/// Normalizes a body for comparison: echoes of the request URL and its path
/// are removed, whitespace is stripped, and digit runs collapse to `0`, so
/// templated not-found pages become byte-identical.
pub fn standardize_body(request_url: &[u8], body: &[u8]) -> Vec<u8> {
    let url = request_url.trim_ascii();
    let body = body.trim_ascii();
    if body.is_empty() {
        return Vec::new();
    }

    let mut body = body.to_vec();
    if !url.is_empty() {
        body = remove_subslice(&body, url);
        if let Ok(url_str) = std::str::from_utf8(url) {
            if let Ok(parsed) = Url::parse(url_str) {
                let path = parsed.path().as_bytes().to_vec();
                if path.len() > 1 {
                    body = remove_subslice(&body, &path);
                }
                let collapsed = MULTI_SLASH.replace_all(&path, &b"/"[..]).into_owned();
                if collapsed != path {
                    body = remove_subslice(&body, &collapsed);
                }
            }
        }
    }

    let body = WHITESPACE.replace_all(&body, &b""[..]).into_owned();
    DIGIT_RUNS.replace_all(&body, &b"0"[..]).into_owned()
}

/// Raw feature vector: status, body length, standardized length, and the
/// token counts over the standardized body (one per [`FEATURE_NAMES`]
/// column).
pub fn get_features(request_url: &[u8], status: u16, body_length: usize, body: &[u8]) -> Vec<f64> {
    let standard = standardize_body(request_url, body);
    let mut features = Vec::with_capacity(FEATURE_NAMES.len());
    features.push(f64::from(status));
    features.push(body_length as f64);
    features.push(standard.len() as f64);
    for token in COUNTED_TOKENS {
        features.push(count_occurrences(&standard, token) as f64);
    }
    features
}

fn zscore(values: &[f64]) -> Vec<f64> {
    let n = values.len() as f64;
    if n < 2.0 {
        return vec![0.0; values.len()];
    }
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std == 0.0 || !std.is_finite() {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

/// Builds the clustering matrix from raw rows: token counts become density
/// ratios, status and content-type become one-hot columns, the length
/// columns become Z-scores.
pub fn preprocess(rows: &[FeatureRow]) -> Vec<Vec<f64>> {
    let mut matrix: Vec<Vec<f64>> = rows
        .iter()
        .map(|row| {
            let std_len = row.features[2];
            (3..FEATURE_NAMES.len())
                .map(|i| {
                    if std_len > 0.0 {
                        row.features[i] / std_len
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    let statuses: BTreeSet<u16> = rows.iter().map(|r| r.features[0] as u16).collect();
    for (vector, row) in matrix.iter_mut().zip(rows) {
        let own = row.features[0] as u16;
        for &code in &statuses {
            vector.push(if code == own { 1.0 } else { 0.0 });
        }
    }

    let changes: Vec<f64> = rows.iter().map(|r| r.features[1] - r.features[2]).collect();
    for (vector, value) in matrix.iter_mut().zip(zscore(&changes)) {
        vector.push(value);
    }

    let lengths: Vec<f64> = rows.iter().map(|r| r.features[2]).collect();
    for (vector, value) in matrix.iter_mut().zip(zscore(&lengths)) {
        vector.push(value);
    }

    let content_types: BTreeSet<&str> = rows.iter().map(|r| r.content_type.as_str()).collect();
    for (vector, row) in matrix.iter_mut().zip(rows) {
        for &ct in &content_types {
            vector.push(if ct == row.content_type { 1.0 } else { 0.0 });
        }
    }

    for vector in &mut matrix {
        for value in vector.iter_mut() {
            if !value.is_finite() {
                *value = 0.0;
            }
        }
    }

    matrix
}

/// Statuses worth reporting among the minority-cluster responses: success
/// codes and server errors. Plain redirects and client errors are noise.
fn is_interesting_status(status: u16) -> bool {
    (200..300).contains(&status) || status >= 500
}

/// Outcome of the post-scan analysis.
pub struct AnalysisOutcome {
    pub cluster: ClusterReport,
    pub existed: Vec<Response>,
}

/// Drives the analysis over all collected responses and reports the result.
pub struct Analyzer<'a> {
    output: &'a Output,
    report: Option<&'a mut Box<dyn ReportWriter>>,
    /// When set, the raw feature matrix is dumped as CSV next to the report.
    features_path: Option<PathBuf>,
}

impl<'a> Analyzer<'a> {
    pub fn new(
        output: &'a Output,
        report: Option<&'a mut Box<dyn ReportWriter>>,
        features_path: Option<PathBuf>,
    ) -> Self {
        Self {
            output,
            report,
            features_path,
        }
    }

    pub fn analyze(&mut self, responses: &[Response]) -> Result<AnalysisOutcome, ScanError> {
        self.output.warning("\nbuild features ...");
        let rows: Vec<FeatureRow> = responses.iter().map(FeatureRow::from_response).collect();

        if let Some(path) = &self.features_path {
            save_features(&rows, path)?;
            self.output
                .warning(&format!("\nsave original features to {}", path.display()));
        }

        let matrix = preprocess(&rows);

        self.output.warning("\nanalysis features ...");
        let (_labels, results, cluster) = cluster::identify_not_found(&matrix);

        let cluster_json =
            serde_json::to_string_pretty(&cluster).map_err(|e| ScanError::Config(e.to_string()))?;
        self.output.warning("\nCluster analysis information:");
        self.output.warning(&format!("\n{cluster_json}"));

        let existed: Vec<Response> = results
            .iter()
            .zip(responses)
            .filter(|(success, response)| **success && is_interesting_status(response.status))
            .map(|(_, response)| response.clone())
            .collect();

        self.output.warning(&format!(
            "\nfound {} existed assets from {} results:",
            existed.len(),
            responses.len()
        ));
        for response in &existed {
            self.output.status_report(response, true);
        }

        if let Some(report) = self.report.as_deref_mut() {
            let mut information = String::from("\nCluster analysis information:\n");
            information.push_str(&cluster_json);
            information.push('\n');
            information.push_str(&format!(
                "\nfound {} existed assets from {} results:\n",
                existed.len(),
                responses.len()
            ));
            information.push_str(&report.generate(&existed));
            report.save_information(&information)?;
        }

        Ok(AnalysisOutcome { cluster, existed })
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Debug artifact: raw features plus url/content-type labels, one response
/// per line.
fn save_features(rows: &[FeatureRow], path: &PathBuf) -> Result<(), ScanError> {
    let mut content = FEATURE_NAMES.join(",");
    content.push_str(",url,content_type,exists\n");
    for row in rows {
        let values: Vec<String> = row.features.iter().map(|v| format!("{v}")).collect();
        content.push_str(&values.join(","));
        content.push(',');
        content.push_str(&csv_field(&row.url));
        content.push(',');
        content.push_str(&csv_field(&row.content_type));
        content.push_str(",0\n");
    }
    fs::write(path, content)?;
    Ok(())
}
