use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use dlbridge_core::view::{ErrorBanner, Notice, ViewState};
use dlbridge_core::ScreenRenderer;

/// Renders the screen as a single indicatif spinner line.
///
/// Notices and banners are printed above the spinner so they stay visible.
pub struct TerminalRenderer {
    bar: ProgressBar,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        match ProgressStyle::with_template("{spinner:.cyan} {wide_msg}") {
            Ok(style) => bar.set_style(style),
            Err(e) => log::debug!("[cli] spinner template rejected: {}", e),
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("waiting for permission");
        Self { bar }
    }

    pub fn println(&self, line: impl AsRef<str>) {
        self.bar.println(line);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// One status line: title, progress, ETA and speed, skipping empty fields.
fn status_line(view: &ViewState) -> String {
    let title = if view.title_text.is_empty() {
        "(untitled)"
    } else {
        view.title_text.as_str()
    };
    let parts: [&str; 4] = [title, &view.progress_text, &view.eta_text, &view.throughput_text];
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<&str>>()
        .join(" | ")
}

impl ScreenRenderer for TerminalRenderer {
    fn render(&self, view: &ViewState) {
        self.bar.set_message(status_line(view));
    }

    fn show_notice(&self, notice: Notice) {
        self.bar.println(format!("! {}", notice));
    }

    fn show_banner(&self, banner: &ErrorBanner) {
        self.bar
            .println(format!("{}  [{}: r]", banner.text(), ErrorBanner::ACTION_LABEL));
    }

    fn dismiss_banner(&self) {
        self.bar.println("retrying...");
    }
}
