//! Operator-facing startup stages for the binaries.
//!
//! On a TTY each stage shows a spinner that turns into a check mark with the
//! elapsed time; elsewhere stages are plain `==>` lines on stderr so logs stay
//! grep-able.

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: Option<&str>) -> Result<Self> {
        match flag {
            None | Some("auto") => Ok(UiMode::Auto),
            Some("plain") => Ok(UiMode::Plain),
            Some("pretty") => Ok(UiMode::Pretty),
            Some(other) => bail!("unknown ui mode '{}' (expected auto, plain or pretty)", other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Result<Self> {
        Ok(Self::new(UiMode::parse(ui_flag)?, is_tty, disable_pretty))
    }

    fn pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// One-off status line outside any stage.
    pub fn note(&self, message: &str) {
        if self.pretty() {
            eprintln!("  {}", message);
        } else {
            eprintln!("--- {}", message);
        }
    }
}

pub struct StageGuard {
    name: String,
    detail: Option<String>,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            detail: None,
            start: Instant::now(),
            spinner,
        }
    }

    /// Attach a short result shown when the stage completes.
    pub fn detail(&mut self, detail: impl Into<String>) {
        self.detail = Some(detail.into());
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let message = match &self.detail {
            Some(detail) => format!("✔ {}: {} ({})", self.name, detail, elapsed),
            None => format!("✔ {} ({})", self.name, elapsed),
        };
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ui_flags() {
        assert_eq!(UiMode::parse(None).unwrap(), UiMode::Auto);
        assert_eq!(UiMode::parse(Some("plain")).unwrap(), UiMode::Plain);
        assert_eq!(UiMode::parse(Some("pretty")).unwrap(), UiMode::Pretty);
        assert!(UiMode::parse(Some("fancy")).is_err());
    }

    #[test]
    fn pretty_needs_a_tty() {
        assert!(!Ui::new(UiMode::Pretty, false, false).pretty());
        assert!(Ui::new(UiMode::Auto, true, false).pretty());
        assert!(!Ui::new(UiMode::Auto, true, true).pretty());
        assert!(!Ui::new(UiMode::Plain, true, false).pretty());
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
