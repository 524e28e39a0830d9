//! Report writers. One trait, one implementation per format; the scan
//! saves incrementally after every match so partial output survives a
//! crash.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use url::Url;

use crate::errors::ScanError;
use crate::options::Options;
use crate::response::Response;
use crate::utils::{get_valid_filename, human_size};

/// Write port shared by every format: render the accumulated results,
/// persist them, and append free-form information at the end of the run.
pub trait ReportWriter: Send {
    fn path(&self) -> &Path;

    fn generate(&self, results: &[Response]) -> String;

    fn save(&mut self, results: &[Response]) -> io::Result<()> {
        fs::write(self.path(), self.generate(results))
    }

    fn save_information(&mut self, text: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())?;
        file.write_all(text.as_bytes())
    }
}

/// Picks the writer for a format name. Formats are validated at option
/// resolution, so an unknown name simply falls back to plain text.
pub fn create_report(format: &str, path: PathBuf) -> Box<dyn ReportWriter> {
    match format {
        "simple" => Box::new(SimpleReport { path }),
        "json" => Box::new(JsonReport { path }),
        "xml" => Box::new(XmlReport { path }),
        "md" => Box::new(MarkdownReport { path }),
        "csv" => Box::new(CsvReport { path }),
        "html" => Box::new(HtmlReport { path }),
        _ => Box::new(PlainTextReport { path }),
    }
}

/// Resolves where the report goes: an explicit `-o` path, or an auto-named
/// file under `--output-path`. Creates the directories and fails fast when
/// they are not writable.
pub fn prepare_output_file(options: &Options) -> Result<Option<PathBuf>, ScanError> {
    let extension = match options.format.as_str() {
        "plain" | "simple" => "txt".to_string(),
        other => other.to_string(),
    };

    if let Some(output) = &options.output {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ScanError::Config(format!(
                        "Couldn't create the report folder at {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        return Ok(Some(output.clone()));
    }

    let Some(base) = &options.output_path else {
        return Ok(None);
    };

    let timestamp = Local::now().format("%y-%m-%d_%H-%M-%S");
    let (directory, filename) = if options.urls.len() > 1 {
        (
            base.join(format!("BATCH-{timestamp}")),
            format!("BATCH.{extension}"),
        )
    } else {
        let target = options.urls.first().map(String::as_str).unwrap_or("scan");
        let parsed = Url::parse(target)
            .or_else(|_| Url::parse(&format!("http://{target}")))
            .ok();
        let (scheme, host, path) = match &parsed {
            Some(url) => (
                url.scheme().to_string(),
                url.host_str().unwrap_or("unknown").to_string(),
                url.path().to_string(),
            ),
            None => ("http".to_string(), "unknown".to_string(), String::new()),
        };
        (
            base.join(get_valid_filename(&format!("{scheme}_{host}"))),
            format!(
                "{}_{timestamp}.{extension}",
                get_valid_filename(&format!("{path}_"))
            ),
        )
    };

    fs::create_dir_all(&directory).map_err(|e| {
        ScanError::Config(format!(
            "Couldn't create the report folder at {}: {e}",
            directory.display()
        ))
    })?;
    Ok(Some(directory.join(filename)))
}

pub struct PlainTextReport {
    path: PathBuf,
}

impl ReportWriter for PlainTextReport {
    fn path(&self) -> &Path {
        &self.path
    }

    fn generate(&self, results: &[Response]) -> String {
        let mut content = String::new();
        for response in results {
            content.push_str(&format!(
                "{}  {:>7}  {}",
                response.status,
                human_size(response.length),
                response.url
            ));
            if !response.redirect.is_empty() {
                content.push_str(&format!("  ->  {}", response.redirect));
            }
            content.push('\n');
        }
        content
    }
}

pub struct SimpleReport {
    path: PathBuf,
}

impl ReportWriter for SimpleReport {
    fn path(&self) -> &Path {
        &self.path
    }

    fn generate(&self, results: &[Response]) -> String {
        results
            .iter()
            .map(|r| format!("{}\n", r.url))
            .collect()
    }
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    url: &'a str,
    status: u16,
    #[serde(rename = "content-length")]
    content_length: u64,
    #[serde(rename = "content-type")]
    content_type: &'a str,
    redirect: &'a str,
}

#[derive(Serialize)]
struct JsonReportBody<'a> {
    time: String,
    results: Vec<JsonEntry<'a>>,
}

pub struct JsonReport {
    path: PathBuf,
}

impl ReportWriter for JsonReport {
    fn path(&self) -> &Path {
        &self.path
    }

    fn generate(&self, results: &[Response]) -> String {
        let body = JsonReportBody {
            time: Local::now().to_rfc3339(),
            results: results
                .iter()
                .map(|r| JsonEntry {
                    url: &r.url,
                    status: r.status,
                    content_length: r.length,
                    content_type: &r.content_type,
                    redirect: &r.redirect,
                })
                .collect(),
        };
        serde_json::to_string_pretty(&body).unwrap_or_default()
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub struct XmlReport {
    path: PathBuf,
}

impl ReportWriter for XmlReport {
    fn path(&self) -> &Path {
        &self.path
    }

    fn generate(&self, results: &[Response]) -> String {
        let mut content =
            String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<scan_results>\n");
        for response in results {
            content.push_str(&format!(
                "  <result>\n    <url>{}</url>\n    <status>{}</status>\n    <content_length>{}</content_length>\n    <content_type>{}</content_type>\n    <redirect>{}</redirect>\n  </result>\n",
                xml_escape(&response.url),
                response.status,
                response.length,
                xml_escape(&response.content_type),
                xml_escape(&response.redirect),
            ));
        }
        content.push_str("</scan_results>\n");
        content
    }
}

pub struct MarkdownReport {
    path: PathBuf,
}

impl ReportWriter for MarkdownReport {
    fn path(&self) -> &Path {
        &self.path
    }

    fn generate(&self, results: &[Response]) -> String {
        let mut content = String::from("| URL | Status | Size | Content Type | Redirect |\n");
        content.push_str("| --- | --- | --- | --- | --- |\n");
        for response in results {
            content.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                response.url,
                response.status,
                human_size(response.length),
                response.content_type,
                response.redirect,
            ));
        }
        content
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub struct CsvReport {
    path: PathBuf,
}

impl ReportWriter for CsvReport {
    fn path(&self) -> &Path {
        &self.path
    }

    fn generate(&self, results: &[Response]) -> String {
        let mut content = String::from("URL,Status,Size,Content-Type,Redirect\n");
        for response in results {
            content.push_str(&format!(
                "{},{},{},{},{}\n",
                csv_escape(&response.url),
                response.status,
                response.length,
                csv_escape(&response.content_type),
                csv_escape(&response.redirect),
            ));
        }
        content
    }
}

fn html_escape(value: &str) -> String {
    xml_escape(value)
}

pub struct HtmlReport {
    path: PathBuf,
}

impl ReportWriter for HtmlReport {
    fn path(&self) -> &Path {
        &self.path
    }

    fn generate(&self, results: &[Response]) -> String {
        let mut content = String::from(
            "<!DOCTYPE html>\n<html>\n<head><title>Scan report</title></head>\n<body>\n<table>\n<tr><th>URL</th><th>Status</th><th>Size</th><th>Content Type</th><th>Redirect</th></tr>\n",
        );
        for response in results {
            content.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                html_escape(&response.url),
                response.status,
                human_size(response.length),
                html_escape(&response.content_type),
                html_escape(&response.redirect),
            ));
        }
        content.push_str("</table>\n</body>\n</html>\n");
        content
    }
}
