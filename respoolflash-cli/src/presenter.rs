//! Terminal presentation of orchestrator events.

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, trace};
use respoolflash::events::READY_LABEL;
use respoolflash::{DriverHelp, Event, EventSink, Outcome, ProgressState};

use crate::use_fancy_output;

/// Renders events on stderr: a progress bar for progress, styled lines for
/// outcomes, and the driver help block when it is offered.
pub struct ConsolePresenter {
    pb: ProgressBar,
    quiet: bool,
    last_label: String,
}

impl ConsolePresenter {
    /// Presenter honouring `--quiet` and the terminal capabilities.
    pub fn new(quiet: bool) -> Self {
        let pb = if quiet || !use_fancy_output() {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(100);
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb.set_draw_target(ProgressDrawTarget::stderr());
            pb
        };
        Self {
            pb,
            quiet,
            last_label: String::new(),
        }
    }

    fn progress(&mut self, state: &ProgressState) {
        self.pb.set_position(u64::from(state.percent));
        if state.label == self.last_label {
            return;
        }
        self.last_label.clone_from(&state.label);
        self.pb.set_message(state.label.clone());

        // hidden bar: fall back to one line per phase
        if self.pb.is_hidden() && !self.quiet && !state.is_error && state.label != READY_LABEL {
            eprintln!("{} {}", style("•").dim(), state.label);
        }
    }

    fn finished(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Success => {
                self.pb.finish_and_clear();
                if !self.quiet {
                    eprintln!("{} {}", style("✓").green().bold(), self.last_label);
                }
            },
            Outcome::Failure { label, detail } => {
                self.pb.abandon();
                eprintln!("{} {}", style("✗").red().bold(), style(label).red());
                eprintln!("  {}", style(detail).dim());
            },
        }
    }
}

impl EventSink for ConsolePresenter {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Progress(state) => self.progress(&state),
            Event::Connected {
                chip_family,
                variant,
            } => {
                self.pb.suspend(|| {
                    if !self.quiet {
                        eprintln!(
                            "{} Found {} on a {}",
                            style("🔌").cyan(),
                            style(&chip_family).bold(),
                            variant.label()
                        );
                    }
                });
            },
            Event::Finished(outcome) => self.finished(&outcome),
            Event::DriverHelp(help) => self.pb.suspend(|| print_driver_help(&help)),
            Event::State(state) => debug!("State: {state}"),
            Event::Controls(controls) => trace!("Controls: {controls:?}"),
            Event::FirmwareVersion(version) => debug!("Latest firmware: {version}"),
        }
    }
}

/// Render the driver help block.
pub fn format_driver_help(help: &DriverHelp) -> String {
    let mut out = format!("{}\n\n{}\n\n", style(help.title).yellow().bold(), help.body);
    out.push_str("Port names look like:\n");
    for port in help.example_ports {
        out.push_str(&format!("  {} {}\n", style("•").dim(), style(port).cyan()));
    }
    out.push_str("\nUSB-UART drivers:\n");
    for link in help.driver_links {
        out.push_str(&format!("  {} {}: {}\n", style("•").dim(), link.name, link.url));
    }
    out.push('\n');
    out.push_str(help.hint);
    out
}

fn print_driver_help(help: &DriverHelp) {
    eprintln!("\n{}\n", format_driver_help(help));
}

#[cfg(test)]
mod tests {
    use super::*;
    use respoolflash::{BoardVariant, Controls, driver_help};

    #[test]
    fn test_driver_help_lists_links_and_ports() {
        console::set_colors_enabled(false);
        let text = format_driver_help(&driver_help());
        assert!(text.starts_with("ESP32 not detected?"));
        assert!(text.contains("/dev/ttyUSB0"));
        assert!(text.contains("COM3"));
        assert!(text.contains("https://www.silabs.com/"));
        assert!(text.contains("CH340"));
        assert!(text.ends_with(driver_help().hint));
    }

    #[test]
    fn test_quiet_presenter_tracks_labels() {
        let mut presenter = ConsolePresenter::new(true);
        presenter.emit(Event::Controls(Controls::BUSY));
        presenter.emit(Event::Progress(ProgressState::new(0, "Flashing firmware...")));
        presenter.emit(Event::Progress(ProgressState::new(42, "Flashing firmware...")));
        assert_eq!(presenter.last_label, "Flashing firmware...");
        assert_eq!(presenter.pb.position(), 42);

        presenter.emit(Event::Connected {
            chip_family: "ESP32-S3".into(),
            variant: BoardVariant::ControlBoardV4,
        });
        presenter.emit(Event::Finished(Outcome::Success));
        assert!(presenter.pb.is_finished());
    }
}
