use std::time::SystemTime;

use log::Level;
use nu_ansi_term::ansi::RESET;
use nu_ansi_term::{Color, Style};

/// Colourised, human-facing sink for the `log` crate. Installed by binaries; library code only
/// ever goes through `log::*` macros or the typed event tap, never this type directly.
pub struct Logger;

impl log::Log for Logger {
	fn enabled(&self, _: &log::Metadata) -> bool {
		true
	}

	fn log(&self, record: &log::Record) {
		let time = humantime::format_rfc3339_nanos(SystemTime::now());

		let dim = Style::new().dimmed().prefix();

		eprintln!(
			"{dim}{time}{RESET} {}{:5}{RESET} {}{}{RESET}{dim}:{RESET} {}",
			match record.level() {
				Level::Trace => Color::Purple,
				Level::Debug => Color::Blue,
				Level::Info => Color::Green,
				Level::Warn => Color::Yellow,
				Level::Error => Color::Red,
			}
			.bold()
			.prefix(),
			record.level(),
			Style::new().bold().prefix(),
			record.target(),
			record.args()
		);
	}

	fn flush(&self) {}
}

/// Install the [`Logger`] as the global `log` sink at `level`. Safe to call more than once; later
/// calls are no-ops.
pub fn init(level: log::LevelFilter) {
	static LOGGER: Logger = Logger;

	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(level);
	}
}
