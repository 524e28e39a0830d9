//! Terminal output: colorized status lines, the per-directory progress bar,
//! and the capture buffer that session files preserve.

use std::io::Write;
use std::sync::Mutex;

use chrono::Local;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::response::Response;
use crate::utils::human_size;

pub struct Output {
    quiet: bool,
    buffer: Mutex<String>,
    progress: Mutex<Option<ProgressBar>>,
}

impl Output {
    pub fn new(no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self {
            quiet,
            buffer: Mutex::new(String::new()),
            progress: Mutex::new(None),
        }
    }

    fn println(&self, line: &str) {
        match &*self.progress.lock().expect("poisoned lock") {
            Some(pb) => pb.suspend(|| println!("{line}")),
            None => println!("{line}"),
        }
    }

    /// Startup banner with the effective scan parameters.
    pub fn config(
        &self,
        extensions: &str,
        prefixes: &str,
        suffixes: &str,
        threads: usize,
        wordlist_size: usize,
        method: &str,
    ) {
        if self.quiet {
            return;
        }
        let mut line = format!(
            "{} {} | {} {} | {} {}",
            "Extensions:".bold(),
            if extensions.is_empty() { "-" } else { extensions },
            "Threads:".bold(),
            threads,
            "Wordlist size:".bold(),
            wordlist_size,
        );
        line.push_str(&format!(" | {} {}", "Method:".bold(), method));
        if !prefixes.is_empty() {
            line.push_str(&format!(" | {} {}", "Prefixes:".bold(), prefixes));
        }
        if !suffixes.is_empty() {
            line.push_str(&format!(" | {} {}", "Suffixes:".bold(), suffixes));
        }
        self.println(&line);
    }

    pub fn target(&self, url: &str) {
        if self.quiet {
            return;
        }
        self.println(&format!("\n{} {}", "Target:".bold(), url.cyan().bold()));
    }

    pub fn warning(&self, msg: &str) {
        if self.quiet {
            return;
        }
        self.println(&msg.yellow().to_string());
        self.record(msg);
    }

    pub fn error(&self, msg: &str) {
        match &*self.progress.lock().expect("poisoned lock") {
            Some(pb) => pb.suspend(|| eprintln!("{}", msg.red())),
            None => eprintln!("{}", msg.red()),
        }
    }

    /// Prompt fragment without a trailing newline.
    pub fn in_line(&self, msg: &str) {
        print!("{msg}");
        let _ = std::io::stdout().flush();
    }

    pub fn log_file(&self, path: &str) {
        if !self.quiet {
            self.println(&format!("{} {path}", "Log file:".bold()));
        }
    }

    pub fn output_file(&self, path: &str) {
        if !self.quiet {
            self.println(&format!("{} {path}", "Report:".bold()));
        }
    }

    /// One matched response. `full_url` switches between the absolute URL
    /// and the host-relative path.
    pub fn status_report(&self, response: &Response, full_url: bool) {
        let shown = if full_url {
            response.url.clone()
        } else {
            format!("/{}", response.path)
        };
        let size = human_size(response.length);
        let plain = if response.redirect.is_empty() {
            format!(
                "[{}] {} - {:>6} - {}",
                Local::now().format("%H:%M:%S"),
                response.status,
                size,
                shown
            )
        } else {
            format!(
                "[{}] {} - {:>6} - {}  ->  {}",
                Local::now().format("%H:%M:%S"),
                response.status,
                size,
                shown,
                response.redirect
            )
        };
        self.record(&plain);

        let status = response.status.to_string();
        let status = match response.status {
            200..=299 => status.green(),
            301 | 302 | 303 | 307 | 308 => status.cyan(),
            401 | 429 => status.yellow(),
            403 => status.blue(),
            500..=599 => status.red(),
            _ => status.normal(),
        };
        let line = if response.redirect.is_empty() {
            format!(
                "[{}] {} - {:>6} - {}",
                Local::now().format("%H:%M:%S"),
                status,
                size,
                shown
            )
        } else {
            format!(
                "[{}] {} - {:>6} - {}  ->  {}",
                Local::now().format("%H:%M:%S"),
                status,
                size,
                shown,
                response.redirect.yellow()
            )
        };
        self.println(&line);
    }

    pub fn new_directories(&self, directories: &[String]) {
        if self.quiet || directories.is_empty() {
            return;
        }
        self.println(&format!(
            "{} {}",
            "Added to the queue:".bold(),
            directories.join(", ").cyan()
        ));
    }

    /// Starts the progress bar for one directory pass.
    pub fn begin_directory(&self, total: usize) {
        if self.quiet {
            return;
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("valid progress template")
                .progress_chars("#>-"),
        );
        *self.progress.lock().expect("poisoned lock") = Some(pb);
    }

    /// Refreshes the progress line.
    pub fn progress(&self, index: usize, job: usize, jobs: usize, rate: usize, errors: usize) {
        if let Some(pb) = &*self.progress.lock().expect("poisoned lock") {
            pb.set_position(index as u64);
            pb.set_message(format!("job:{job}/{jobs} rate:{rate}/s errors:{errors}"));
        }
    }

    pub fn end_directory(&self) {
        if let Some(pb) = self.progress.lock().expect("poisoned lock").take() {
            pb.finish_and_clear();
        }
    }

    fn record(&self, line: &str) {
        let mut buffer = self.buffer.lock().expect("poisoned lock");
        buffer.push_str(line);
        buffer.push('\n');
    }

    /// Everything printed so far, for the session snapshot.
    pub fn last_output(&self) -> String {
        self.buffer.lock().expect("poisoned lock").clone()
    }

    /// Seeds the buffer when resuming a session.
    pub fn restore_buffer(&self, content: &str) {
        *self.buffer.lock().expect("poisoned lock") = content.to_string();
    }
}
