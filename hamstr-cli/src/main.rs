//! A minimal command-line driver for `hamstr-link`: opens one session against a remote station,
//! issues a single pull request, prints the result, and closes the session cleanly. It does not
//! speak NOSTR, HTTP, or touch any storage — wiring this up to an actual relay and a Lightning
//! wallet is the job of whatever NOSTR-side process links against this crate for real.

use std::process::ExitCode;
use std::str::FromStr;

use log::{error, info};

use hamstr_link::{Callsign, Config, Link};
use runtime::ShutdownFlag;

struct Args {
	local: Callsign,
	remote: Callsign,
	request_kind: String,
	params: Vec<u8>,
}

fn parse_args() -> Result<Args, String> {
	let mut args = std::env::args().skip(1);

	let local = args.next().ok_or("missing <local-callsign>")?;
	let remote = args.next().ok_or("missing <remote-callsign>")?;
	let request_kind = args.next().ok_or("missing <request-kind>")?;
	let params = args.next().unwrap_or_default().into_bytes();

	let local = Callsign::from_str(&local).map_err(|e| format!("bad local callsign: {e}"))?;
	let remote = Callsign::from_str(&remote).map_err(|e| format!("bad remote callsign: {e}"))?;

	Ok(Args { local, remote, request_kind, params })
}

fn run(args: Args, shutdown: &ShutdownFlag) -> Result<(), String> {
	let config = Config::new(args.local, args.remote);

	let mut link = Link::connect(config).map_err(|e| format!("failed to open transport: {e}"))?;
	let _subscription = link.subscribe_logs(|event: &hamstr_link::Event| info!("{}", event.ascii()));

	if shutdown.requested() {
		return Err("shutdown requested before session could open".to_owned());
	}

	let mut handle = link.open_session(&args.remote).map_err(|e| format!("CONNECT failed: {e}"))?;

	let result = link.request_payload(&mut handle, &args.request_kind, &args.params);

	if let Err(e) = link.close_session(handle) {
		error!("error while closing session: {e}");
	}

	let payload = result.map_err(|e| format!("request_payload failed: {e}"))?;
	println!("{}", String::from_utf8_lossy(&payload));
	Ok(())
}

fn main() -> ExitCode {
	runtime::logger::init(log::LevelFilter::Info);
	let shutdown = ShutdownFlag::install();

	let args = match parse_args() {
		Ok(args) => args,
		Err(e) => {
			eprintln!("usage: hamstr-cli <local-callsign> <remote-callsign> <request-kind> [params]");
			eprintln!("error: {e}");
			return ExitCode::FAILURE;
		}
	};

	match run(args, &shutdown) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{e}");
			ExitCode::FAILURE
		}
	}
}
