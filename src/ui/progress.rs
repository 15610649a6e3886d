//! Terminal progress for deletion runs.
//!
//! `RunUI` consumes `PassEvent`s. In `Full` mode a header bar tracks the
//! loop budget and an item bar tracks the current pass; `Json` mode prints
//! one event per line for scripting.

use crate::engine::{ItemStatus, PassEvent, PassReport, RunOutcome};
use crate::ui::icons::{CHECK, CROSS, LOOP, SEARCH, SKIP, SPARKLE, WARN};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Output mode for the run UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    #[default]
    Full,
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Full,
        })
    }
}

pub struct RunUI {
    mode: UiMode,
    multi: MultiProgress,
    loop_bar: ProgressBar,
    item_bar: ProgressBar,
    verbose: bool,
    term: Term,
    failures: AtomicU64,
}

impl RunUI {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let loop_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let loop_bar = multi.add(ProgressBar::new(0));
        loop_bar.set_style(loop_style);
        loop_bar.set_prefix(" Loops");

        let item_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} {spinner} [{bar:30.green/white}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string");
        let item_bar = multi.add(ProgressBar::new(0));
        item_bar.set_style(item_style);
        item_bar.set_prefix(" Items");

        if mode == UiMode::Json {
            loop_bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
            item_bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        }

        Self {
            mode,
            multi,
            loop_bar,
            item_bar,
            verbose,
            term: Term::stdout(),
            failures: AtomicU64::new(0),
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn handle_event(&self, event: &PassEvent) {
        match self.mode {
            UiMode::Json => {
                if let Ok(json) = serde_json::to_string(event) {
                    let _ = writeln!(&self.term, "{}", json);
                }
            }
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_full(&self, event: &PassEvent) {
        match event {
            PassEvent::PassStarted {
                target,
                loop_index,
                loop_budget,
                ..
            } => {
                self.loop_bar.set_length(u64::from(*loop_budget));
                self.loop_bar.set_position(u64::from(loop_index.saturating_sub(1)));
                self.loop_bar.set_message(format!(
                    "{}{} loop {}/{}",
                    LOOP,
                    style(target).yellow(),
                    style(loop_index).cyan(),
                    loop_budget
                ));
                self.item_bar.reset();
                self.item_bar.set_length(0);
                self.item_bar.set_message(format!("{}discovering...", SEARCH));
            }
            PassEvent::Discovered { candidates } => {
                self.item_bar.set_length(*candidates as u64);
                self.item_bar
                    .set_message(format!("{} candidate(s)", style(candidates).cyan()));
            }
            PassEvent::ItemCompleted { result } => {
                self.item_bar.inc(1);
                let id = result
                    .id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "?".to_string());
                match result.status {
                    ItemStatus::Failure => {
                        self.failures.fetch_add(1, Ordering::SeqCst);
                        self.print_line(format!(
                            "    {}{} {} {}",
                            CROSS,
                            style(&result.category).red(),
                            id,
                            style(result.detail.as_deref().unwrap_or("failed")).dim()
                        ));
                    }
                    ItemStatus::Skipped if self.verbose => {
                        self.print_line(format!(
                            "    {}{} {} {}",
                            SKIP,
                            style(&result.category).dim(),
                            id,
                            style(result.detail.as_deref().unwrap_or("")).dim()
                        ));
                    }
                    ItemStatus::Success if self.verbose => {
                        self.print_line(format!("    {}{} {}", CHECK, result.category, id));
                    }
                    _ => {}
                }
            }
            PassEvent::PassCompleted { report } => {
                self.loop_bar.set_position(u64::from(report.loop_index));
                self.print_line(format!(
                    "  Loop {}: {} deleted, {} failed, {} skipped",
                    style(report.loop_index).cyan(),
                    style(report.succeeded).green(),
                    style(report.failed).red(),
                    style(report.skipped).dim()
                ));
            }
        }
    }

    /// Failures seen across all passes so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Clear the bars and print the final line of a run.
    pub fn finish(&self, report: Option<&PassReport>) {
        self.item_bar.finish_and_clear();
        self.loop_bar.finish_and_clear();
        if self.mode == UiMode::Json {
            return;
        }

        match report.and_then(|r| r.outcome.map(|o| (r, o))) {
            Some((report, outcome)) => {
                let label = match outcome {
                    RunOutcome::Clean => style(outcome.label()).green().bold(),
                    RunOutcome::MaxLoops => style(outcome.label()).yellow().bold(),
                    RunOutcome::Done => style(outcome.label()).cyan().bold(),
                };
                let icon = if report.totals.failed == 0 { SPARKLE } else { WARN };
                let _ = writeln!(
                    &self.term,
                    "\n{}{}  {} deleted, {} failed across {} loop(s)",
                    icon, label, report.totals.deleted, report.totals.failed, report.loop_index
                );
            }
            None => {
                let _ = writeln!(
                    &self.term,
                    "\n{}{}",
                    WARN,
                    style("Run did not finish; see `reaper status`").yellow()
                );
            }
        }
    }
}
