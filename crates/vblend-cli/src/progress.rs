//! Terminal progress for blends.

use indicatif::{ProgressBar, ProgressStyle};
use vblend_merge::{BlendEvent, BlendObserver, TracingObserver};

/// Shows a progress bar over blended layers and logs everything else.
pub struct ProgressObserver {
    bar: ProgressBar,
    log: TracingObserver,
}

impl ProgressObserver {
    /// Create an observer with a hidden bar; it appears once layers start.
    pub fn new() -> anyhow::Result<Self> {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) | {msg}")?
                .progress_chars("#>-"),
        );
        Ok(Self {
            bar,
            log: TracingObserver::default(),
        })
    }
}

impl BlendObserver for ProgressObserver {
    fn on_event(&self, event: &BlendEvent) {
        match event {
            BlendEvent::LayerBlended { name, total, .. } => {
                if self.bar.is_hidden() {
                    self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                }
                self.bar.set_length(*total as u64);
                self.bar.set_message(name.clone());
                self.bar.inc(1);
            }
            BlendEvent::Saved { .. } | BlendEvent::Failed { .. } => {
                self.bar.finish_and_clear();
                self.log.on_event(event);
            }
            _ => self.bar.suspend(|| self.log.on_event(event)),
        }
    }
}
