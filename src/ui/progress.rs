use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui::icons::{CHECK, CROSS};

/// Spinner for one long-running step (build, migrations, startup).
///
/// Draws nothing when stderr is not a terminal, so scripted runs only see
/// the final status line.
pub struct StepProgress {
    bar: ProgressBar,
    label: String,
}

impl StepProgress {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        let bar = ProgressBar::new_spinner();
        if let Ok(spinner) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            bar.set_style(spinner);
        }
        bar.set_message(label.clone());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar, label }
    }

    pub fn finish_ok(self, detail: impl AsRef<str>) {
        self.bar.finish_and_clear();
        let detail = detail.as_ref();
        if detail.is_empty() {
            println!("{}{}", CHECK, self.label);
        } else {
            println!("{}{} {}", CHECK, self.label, style(detail).dim());
        }
    }

    pub fn finish_err(self, detail: impl AsRef<str>) {
        self.bar.finish_and_clear();
        eprintln!("{}{} {}", CROSS, self.label, style(detail.as_ref()).red());
    }
}
