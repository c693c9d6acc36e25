/*!
 * CLI progress renderer for interactive terminal display
 *
 * Subscribes to progress events and renders one indicatif bar per location,
 * with transfer rate and ETA.
 */

use conduit::transform::{ProgressEvent, ProgressSubscriber};
use conduit::Stats;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::thread;

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str = "{msg}\n{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec})";

/// CLI progress renderer
pub struct CliProgressRenderer {
    subscriber: ProgressSubscriber,
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    verbose: bool,
}

impl CliProgressRenderer {
    /// Create a new CLI progress renderer
    pub fn new(subscriber: ProgressSubscriber, verbose: bool) -> Self {
        Self {
            subscriber,
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
            bars: HashMap::new(),
            verbose,
        }
    }

    /// Run until every publisher is dropped
    pub fn run(mut self) {
        while let Some(event) = self.subscriber.recv() {
            self.handle_event(event);
        }
        for (_, bar) in self.bars.drain() {
            bar.abandon();
        }
    }

    /// Spawn the renderer in a background thread
    pub fn spawn(self) -> thread::JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn handle_event(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started {
                location,
                direction,
                stats,
            } => {
                let bar = self.multi.add(new_bar(&stats));
                bar.set_message(format!("{} {}", direction, location));
                self.bars.insert(location, bar);
            }

            ProgressEvent::Progress { location, stats } => {
                if let Some(bar) = self.bars.get(&location) {
                    if let Some(total) = stats.total {
                        bar.set_length(total);
                    }
                    bar.set_position(stats.processed);
                }
            }

            ProgressEvent::Finished { location, stats } => {
                if let Some(bar) = self.bars.remove(&location) {
                    bar.set_position(stats.processed);
                    bar.finish_with_message(finished_message(&location, &stats, self.verbose));
                }
            }

            ProgressEvent::Failed {
                location,
                error,
                stats,
            } => {
                if let Some(bar) = self.bars.remove(&location) {
                    bar.abandon_with_message(format!(
                        "✗ Failed: {} after {} - {}",
                        location,
                        format_bytes(stats.processed),
                        error
                    ));
                }
            }
        }
    }
}

fn new_bar(stats: &Stats) -> ProgressBar {
    let (bar, template) = match stats.total {
        Some(total) => (ProgressBar::new(total), BAR_TEMPLATE),
        None => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
    };
    match ProgressStyle::default_bar().template(template) {
        Ok(style) => bar.set_style(style.progress_chars("#>-")),
        Err(e) => tracing::debug!(error = %e, "Invalid progress template"),
    }
    bar
}

fn finished_message(location: &str, stats: &Stats, verbose: bool) -> String {
    let mut message = format!("✓ Complete: {} ({})", location, format_bytes(stats.processed));
    if verbose {
        if let Some(rate) = stats.bytes_per_second() {
            message.push_str(&format!(" at {}/s", format_bytes(rate as u64)));
        }
    }
    message
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
