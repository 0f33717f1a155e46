// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{thread, time::Duration};

use crate::Result;

/// Runs `f` until it succeeds, up to `attempts` times, sleeping
/// `interval` between attempts. Returns the last error when every
/// attempt fails.
pub fn retry<T>(attempts: usize, interval: Duration, mut f: impl FnMut() -> Result<T>) -> Result<T> {
	debug_assert!(attempts > 0);
	let mut last = None;
	for attempt in 0..attempts {
		match f() {
			Ok(value) => return Ok(value),
			Err(err) => last = Some(err),
		}
		if attempt + 1 < attempts {
			thread::sleep(interval);
		}
	}
	Err(last.expect("at least one attempt ran"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Error;

	#[test]
	fn test_succeeds_first_try() {
		let result = retry(3, Duration::ZERO, || Ok(7));
		assert_eq!(result.unwrap(), 7);
	}

	#[test]
	fn test_succeeds_after_failures() {
		let mut calls = 0;
		let result = retry(5, Duration::ZERO, || {
			calls += 1;
			if calls < 3 {
				Err(Error::HandoverFailed("not yet".to_string()))
			} else {
				Ok(calls)
			}
		});
		assert_eq!(result.unwrap(), 3);
	}

	#[test]
	fn test_exhausts_attempts() {
		let mut calls = 0;
		let result: Result<()> = retry(4, Duration::ZERO, || {
			calls += 1;
			Err(Error::HandoverFailed("still failing".to_string()))
		});
		assert!(result.is_err());
		assert_eq!(calls, 4);
	}
}
