use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{error, warn};

/// Width the status line is squeezed into.
pub(crate) const STATUS_WIDTH: usize = 50;

/// A builder that helps in making a new [ProgressStyle] for use.
pub(crate) struct ProgressStyleBuilder {
    progress_style: ProgressStyle,
}

impl ProgressStyleBuilder {
    /// Sets the template of the progress style, falling back to a plain bar
    /// when the template does not parse.
    pub(crate) fn template(mut self, msg_template: &str) -> Self {
        match self.progress_style.clone().template(msg_template) {
            Ok(style) => self.progress_style = style,
            Err(err) => {
                warn!("Template error with '{}': {}. Using fallback template.", msg_template, err);
                match self.progress_style.clone().template("{bar:40} {pos}/{len} {msg}") {
                    Ok(style) => self.progress_style = style,
                    Err(e) => {
                        error!("Fallback template also failed: {}. Using default bar.", e);
                        self.progress_style = ProgressStyle::default_bar();
                    }
                }
            }
        }
        self
    }

    pub(crate) fn progress_chars(mut self, chars: &str) -> Self {
        self.progress_style = self.progress_style.progress_chars(chars);
        self
    }

    pub(crate) fn build(self) -> ProgressStyle {
        self.progress_style
    }
}

impl Default for ProgressStyleBuilder {
    fn default() -> Self {
        Self {
            progress_style: ProgressStyle::default_bar(),
        }
    }
}

/// A builder that helps in initializing and configuring a new [ProgressBar] for use.
pub(crate) struct ProgressBarBuilder {
    progress_bar: ProgressBar,
}

impl ProgressBarBuilder {
    /// Starts with an empty bar; the length grows as media is discovered.
    pub(crate) fn new() -> Self {
        Self {
            progress_bar: ProgressBar::new(0),
        }
    }

    pub(crate) fn style(self, progress_style: ProgressStyle) -> Self {
        self.progress_bar.set_style(progress_style);
        self
    }

    pub(crate) fn draw_target(self, target: ProgressDrawTarget) -> Self {
        self.progress_bar.set_draw_target(target);
        self
    }

    pub(crate) fn steady_tick(self, duration: Duration) -> Self {
        self.progress_bar.enable_steady_tick(duration);
        self
    }

    pub(crate) fn build(self) -> ProgressBar {
        self.progress_bar
    }
}

/// The bar used while a run is in progress: done out of discovered, the
/// percentage, then the status line.
pub(crate) fn run_progress_bar() -> ProgressBar {
    let style = ProgressStyleBuilder::default()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        .progress_chars("=>-")
        .build();

    ProgressBarBuilder::new()
        .style(style)
        .draw_target(ProgressDrawTarget::stderr())
        .steady_tick(Duration::from_millis(100))
        .build()
}

/// Shortens `text` to `max_len` characters by cutting out its middle.
pub(crate) fn ellipsize_middle(text: &str, max_len: usize) -> String {
    let limit = max_len.max(10);
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return text.to_string();
    }

    let keep = limit - 1;
    let left = keep.div_ceil(2);
    let right = keep / 2;
    let mut shortened: String = chars[..left].iter().collect();
    shortened.push('…');
    shortened.extend(&chars[chars.len() - right..]);
    shortened
}
