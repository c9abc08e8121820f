use std::sync::Arc;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use sluice_engine::{ProgressEvent, ProgressFn};

/// Segment progress bar fed by the writer's progress callback.
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(bar_style());
        Self { bar }
    }

    pub fn callback(&self) -> ProgressFn {
        let bar = self.bar.clone();
        Arc::new(move |event: ProgressEvent| {
            if bar.length() != Some(event.total) {
                bar.set_length(event.total);
            }
            bar.set_position(event.completed);
            bar.set_message(HumanBytes(event.bytes_written).to_string());
        })
    }

    pub fn finish(&self, success: bool) {
        if success {
            self.bar.finish_with_message("done");
        } else {
            self.bar.abandon();
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({eta}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_tracks_completed_segments() {
        let reporter = ProgressReporter::new(true);
        let callback = reporter.callback();
        callback(ProgressEvent {
            index: 3,
            completed: 3,
            total: 10,
            bytes_written: 2048,
        });
        assert_eq!(reporter.bar.length(), Some(10));
        assert_eq!(reporter.bar.position(), 3);
        reporter.finish(true);
        assert!(reporter.bar.is_finished());
    }
}
