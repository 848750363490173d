//! Kubernetes resource quantities as reported by the metrics API.

use std::{iter::Sum, ops::Add, str::FromStr, sync::LazyLock};

use regex::Regex;
use thiserror::Error;

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^(?P<sign>[+-]?)(?P<int>\d*)(?:\.(?P<frac>\d*))?(?P<suffix>[eE][+-]?\d+|[KMGTPE]i|[numkMGTPE])?$")
		.expect("quantity regex is valid")
});

/// Nanos per unit.
const NANO_EXPONENT: u32 = 9;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
	#[error("invalid quantity \"{0}\"")]
	Invalid(String),

	#[error("quantity \"{0}\" is out of range")]
	OutOfRange(String),
}

/// A quantity stored in nano units, rounded up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quantity {
	nanos: i128,
}

impl Quantity {
	/// Value in thousandths, rounded up. CPU is shown this way.
	pub fn milli_value(self) -> i128 {
		ceil_div(self.nanos, 10_i128.pow(NANO_EXPONENT - 3))
	}

	/// Whole value, rounded up. Memory is shown this way.
	pub fn value(self) -> i128 {
		ceil_div(self.nanos, 10_i128.pow(NANO_EXPONENT))
	}
}

fn ceil_div(n: i128, d: i128) -> i128 {
	n.div_euclid(d) + i128::from(n.rem_euclid(d) != 0)
}

impl FromStr for Quantity {
	type Err = QuantityError;

	fn from_str(input: &str) -> Result<Self, Self::Err> {
		let invalid = || QuantityError::Invalid(input.to_string());
		let out_of_range = || QuantityError::OutOfRange(input.to_string());

		let caps = QUANTITY.captures(input).ok_or_else(invalid)?;
		let int = &caps["int"];
		let frac = caps.name("frac").map_or("", |m| m.as_str());
		if int.is_empty() && frac.is_empty() {
			return Err(invalid());
		}

		let (decimal, binary) = match caps.name("suffix").map(|m| m.as_str()) {
			None => (0, 0),
			Some("n") => (-9, 0),
			Some("u") => (-6, 0),
			Some("m") => (-3, 0),
			Some("k") => (3, 0),
			Some("M") => (6, 0),
			Some("G") => (9, 0),
			Some("T") => (12, 0),
			Some("P") => (15, 0),
			Some("E") => (18, 0),
			Some("Ki") => (0, 10),
			Some("Mi") => (0, 20),
			Some("Gi") => (0, 30),
			Some("Ti") => (0, 40),
			Some("Pi") => (0, 50),
			Some("Ei") => (0, 60),
			Some(exponent) => (exponent[1..].parse::<i64>().map_err(|_| invalid())?, 0),
		};

		let digits = format!("{int}{frac}");
		let mut value: i128 = digits.parse().map_err(|_| out_of_range())?;
		if &caps["sign"] == "-" {
			value = -value;
		}
		value = value.checked_mul(1 << binary).ok_or_else(out_of_range)?;

		let exponent = decimal + i64::from(NANO_EXPONENT) - frac.len() as i64;
		let nanos = if exponent >= 0 {
			u32::try_from(exponent)
				.ok()
				.and_then(|e| 10_i128.checked_pow(e))
				.and_then(|scale| value.checked_mul(scale))
				.ok_or_else(out_of_range)?
		} else {
			match u32::try_from(-exponent).ok().and_then(|e| 10_i128.checked_pow(e)) {
				Some(scale) => ceil_div(value, scale),
				// Smaller than a nano.
				None => i128::from(value > 0),
			}
		};
		Ok(Self { nanos })
	}
}

impl Add for Quantity {
	type Output = Self;

	fn add(self, other: Self) -> Self {
		Self {
			nanos: self.nanos.saturating_add(other.nanos),
		}
	}
}

impl Sum for Quantity {
	fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
		iter.fold(Self::default(), Add::add)
	}
}
