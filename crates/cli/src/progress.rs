//! Progress rendering: maps engine progress events onto indicatif bars.
//!
//! The engine emits [`ProgressEvent`]s through the sink port; this module
//! owns the bars. One `MultiProgress` aggregates all concurrent downloads.

use std::collections::HashMap;
use std::sync::Mutex;

use b_lib::install::{ProgressEvent, ProgressSink};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

pub struct IndicatifSink {
  multi: MultiProgress,
  bars: Mutex<HashMap<String, ProgressBar>>,
  quiet: bool,
}

impl IndicatifSink {
  pub fn new(quiet: bool) -> Self {
    IndicatifSink {
      multi: MultiProgress::new(),
      bars: Mutex::new(HashMap::new()),
      quiet,
    }
  }

  fn style() -> ProgressStyle {
    ProgressStyle::with_template("{msg:<24} {bar:30.cyan/blue} {bytes}/{total_bytes}")
      .unwrap_or_else(|_| ProgressStyle::default_bar())
  }
}

impl ProgressSink for IndicatifSink {
  fn event(&self, event: ProgressEvent) {
    if self.quiet {
      return;
    }
    let mut bars = self.bars.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    match event {
      ProgressEvent::Started { name } => {
        let bar = self.multi.add(ProgressBar::no_length());
        bar.set_style(Self::style());
        bar.set_message(name.clone());
        bars.insert(name, bar);
      }
      ProgressEvent::Downloading { name, received, total } => {
        if let Some(bar) = bars.get(&name) {
          if let Some(total) = total {
            bar.set_length(total);
          }
          bar.set_position(received);
        }
      }
      ProgressEvent::Finished { name, message, ok } => {
        if let Some(bar) = bars.remove(&name) {
          let glyph = if ok { "✓" } else { "✗" };
          bar.finish_with_message(format!("{} {} {}", glyph, name, message));
        }
      }
    }
  }
}
