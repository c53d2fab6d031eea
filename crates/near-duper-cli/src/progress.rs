use indicatif::{ProgressBar, ProgressStyle};
use near_duper_core::{ProgressReporter, SearchType};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Signature phase: bar over the input files
/// - Link phase: bar over the distinct groups
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn start_bar(&self, label: &str, total: usize) {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} ({{eta}} remaining)",
            label
        );
        let style = ProgressStyle::with_template(&template)
            .map(|s| s.progress_chars("━╸─").tick_chars(TICKS))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));

        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn update(&self, position: usize, total: usize) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                if pb.length() != Some(total as u64) {
                    pb.set_length(total as u64);
                }
                pb.set_position(position as u64);
            }
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_search_start(&self, search: SearchType, total_files: usize) {
        let label = match search {
            SearchType::ExactHash => "Hashing",
            _ => "Signatures",
        };
        self.start_bar(label, total_files);
    }

    fn on_signature_progress(&self, processed: usize, total: usize) {
        self.update(processed, total);
    }

    fn on_signature_complete(&self, groups: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Signatures complete: {} groups in {:.2}s",
            groups, duration_secs
        );
    }

    fn on_link_start(&self, groups: usize) {
        self.start_bar("Linking", groups);
    }

    fn on_link_progress(&self, linked: usize, total: usize) {
        self.update(linked, total);
    }

    fn on_consolidate_complete(&self, clusters: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Linking complete: {} clusters in {:.2}s",
            clusters, duration_secs
        );
    }

    fn on_file_error(&self, path: &Path, reason: &str) {
        tracing::debug!("Skipped {}: {}", path.display(), reason);
    }
}
