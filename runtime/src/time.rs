use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current UNIX time in seconds. Used to stamp events for the logging tap.
pub fn unix() -> u32 {
	let dur = SystemTime::now().duration_since(UNIX_EPOCH).expect("the current time should be after the UNIX epoch");

	// Return the duration in seconds.
	dur.as_secs().try_into().expect("32-bit UNIX time should not overflow")
}
