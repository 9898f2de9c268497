//! `sqlline_check` runs a query through the `sqlline` console client against a HiveServer2
//! endpoint and turns the time it took into a monitoring plugin result, as understood by Nagios,
//! Icinga and the other Nagios forks/alternatives.
//!
//! A monitoring plugin reports through its first line of standard output, optionally followed by
//! performance data after a `|`, and through its exit code. See
//! https://www.monitoring-plugins.org/doc/guidelines.html#PLUGOUTPUT for the output format and
//! https://www.monitoring-plugins.org/doc/guidelines.html#THRESHOLDFORMAT for the range syntax
//! used by `--warning` and `--critical`.
//!
//! The modules follow one check run from front to back:
//!   - [`config`] turns command-line flags into a validated [`config::CheckConfig`],
//!   - [`kerberos`] makes sure a ticket exists before Kerberos connections,
//!   - [`runner`] launches `sqlline` and captures what it prints,
//!   - [`output`] scrapes the elapsed time (or a fatal driver error) from that output,
//!   - [`check`] ties it together and produces the [`check::Report`].
//!
//! The threshold and perfdata types below are shared by all of them.

#[macro_use]
extern crate lazy_static;

use std::fmt;
use std::num::ParseFloatError;
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;

pub mod check;
pub mod config;
pub mod kerberos;
pub mod logging;
pub mod output;
pub mod runner;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("value cannot be parsed as float")]
    InvalidFloat,
    #[error("invalid range '{0}'")]
    InvalidRange(String),
    #[error("invalid min '{0}'")]
    InvalidMin(String),
    #[error("invalid max '{0}'")]
    InvalidMax(String),
}

impl From<ParseFloatError> for ParseError {
    fn from(_: ParseFloatError) -> Self {
        Self::InvalidFloat
    }
}

/// Every metric this plugin emits is a duration in seconds.
pub const UNIT: &str = "s";

/// The `f64` is wrapped in a struct because infinity for `Min` is represented by omission.
#[derive(PartialEq, PartialOrd, Debug, Clone, Copy)]
pub struct Min(pub f64);

impl FromStr for Min {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Min(f64::NEG_INFINITY)),
            _ => match f64::from_str(s) {
                Err(_) => Err(ParseError::InvalidMin(s.to_string())),
                Ok(parsed_float) => Ok(Min(parsed_float)),
            },
        }
    }
}

impl fmt::Display for Min {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == f64::NEG_INFINITY {
            Ok(())
        } else {
            f64::fmt(&self.0, f)
        }
    }
}

/// The `f64` is wrapped in a struct because infinity for `Max` is represented by omission.
#[derive(PartialEq, PartialOrd, Debug, Clone, Copy)]
pub struct Max(pub f64);

impl FromStr for Max {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Max(f64::INFINITY)),
            _ => match f64::from_str(s) {
                Err(_) => Err(ParseError::InvalidMax(s.to_string())),
                Ok(parsed_float) => Ok(Max(parsed_float)),
            },
        }
    }
}

impl fmt::Display for Max {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == f64::INFINITY {
            Ok(())
        } else {
            f64::fmt(&self.0, f)
        }
    }
}

/// As per the monitoring-plugins.org documentation, threshold ranges include the endpoints.
///
/// `lower_bound` ≤ `upper_bound`.
///
/// Negative infinity is written as `~` and positive infinity by omission, so `~:10` is everything
/// up to and including 10, `10:` is everything from 10 upwards, and a bare `10` means `0:10`.
/// A leading `@` flips the meaning: the value must then stay _outside_ of the bounds.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct Range {
    lower_bound: f64,
    upper_bound: f64,
    stay_inside_of_bounds: bool,
}

#[derive(Debug, Clone)]
pub struct RangeInvalid(String);

impl Range {
    pub fn new(lower_bound: f64, upper_bound: f64, stay_inside_of_bounds: bool) -> Result<Self, RangeInvalid> {
        if lower_bound > upper_bound {
            return Err(RangeInvalid(format!(
                "range lower bound ({}) should not exceed upper bound ({})",
                lower_bound, upper_bound
            )));
        }
        Ok(Range { lower_bound, upper_bound, stay_inside_of_bounds })
    }

    /// Is the supplied value either…
    ///   ⓐ inside of the range boundaries (in the case `stay_inside_of_bounds = true`), or
    ///   ⓑ outside of the range boundaries (in case `stay_inside_of_bounds = false`).
    pub fn is_value_ok(&self, val: f64) -> bool {
        let inside = self.lower_bound <= val && val <= self.upper_bound;
        inside == self.stay_inside_of_bounds
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.stay_inside_of_bounds {
            write!(f, "@")?;
        }

        if self.lower_bound != 0.0 {
            if self.lower_bound == f64::NEG_INFINITY {
                write!(f, "~")?;
            } else {
                write!(f, "{}", self.lower_bound)?;
            }
            write!(f, ":")?;
        }

        if self.upper_bound != f64::INFINITY {
            write!(f, "{}", self.upper_bound)?;
        }
        Ok(())
    }
}

impl FromStr for Range {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"(?x)
                ^
                (?P<stay_outside_of_bounds_indicator>@)?
                (?:(?P<lower_bound>~|-?[0-9]+(?:\.[0-9]+)?):)?
                (?P<upper_bound>-?[0-9]+(?:\.[0-9]+)?)?
                $
            ").unwrap();
        }

        let caps = match RE.captures(s.trim()) {
            Some(re_captures) => re_captures,
            None => return Err(ParseError::InvalidRange(s.to_string())),
        };

        let stay_inside_of_bounds = caps.name("stay_outside_of_bounds_indicator").is_none();

        let lower_bound = match caps.name("lower_bound") {
            None => 0.0, // When the lower boundary is omitted, it stands for 0.0.
            Some(re_match) => match re_match.as_str() {
                "~" => f64::NEG_INFINITY,
                re_match_str => f64::from_str(re_match_str)?,
            },
        };
        let upper_bound = match caps.name("upper_bound") {
            None => f64::INFINITY, // When the upper boundary is omitted, it stands for ∞.
            Some(re_match) => f64::from_str(re_match.as_str())?,
        };
        Range::new(lower_bound, upper_bound, stay_inside_of_bounds)
            .map_err(|RangeInvalid(msg)| ParseError::InvalidRange(msg))
    }
}

/// `Datum` – the single piece of performance data this plugin reports, together with the
/// thresholds it is judged against.
#[derive(PartialEq, Debug, Clone)]
pub struct Datum {
    pub label: String,
    pub value: f64,
    pub min: Min,
    pub max: Max,
    pub warn: Option<Range>,
    pub crit: Option<Range>,
}

impl Datum {
    pub fn is_ok(&self) -> bool {
        !self.is_warn() && !self.is_crit()
    }

    pub fn is_warn(&self) -> bool {
        match &self.warn {
            None => false,
            Some(warn) => !warn.is_value_ok(self.value),
        }
    }

    pub fn is_crit(&self) -> bool {
        match &self.crit {
            None => false,
            Some(crit) => !crit.is_value_ok(self.value),
        }
    }

    fn value_in_range(&self, warn_or_crit: &str, range: &Range) -> String {
        if range.stay_inside_of_bounds && self.value > range.upper_bound {
            format!(
                "{label} = {val}{unit} > {max}{unit} [{t}-max]",
                label = self.label, val = self.value, unit = UNIT, max = range.upper_bound, t = warn_or_crit
            )
        } else if range.stay_inside_of_bounds && self.value < range.lower_bound {
            format!(
                "{label} = {val}{unit} < {min}{unit} [{t}-min]",
                label = self.label, val = self.value, unit = UNIT, min = range.lower_bound, t = warn_or_crit
            )
        } else if !range.stay_inside_of_bounds {
            format!(
                "{low}{unit} [{t}-low] ≤ {label} = {val}{unit} ≤ {high}{unit} [{t}-high]",
                label = self.label, val = self.value, unit = UNIT, low = range.lower_bound,
                high = range.upper_bound, t = warn_or_crit
            )
        } else {
            format!("{}={}{}", self.label, self.value, UNIT)
        }
    }

    /// A one-line, human readable account of the value, naming the violated bound if any.
    pub fn simple_status(&self) -> String {
        match (&self.crit, &self.warn) {
            (Some(crit), _) if self.is_crit() => self.value_in_range("crit", crit),
            (_, Some(warn)) if self.is_warn() => self.value_in_range("warn", warn),
            _ => format!("{}={}{}", self.label, self.value, UNIT),
        }
    }
}

/// The perfdatum label will always be quoted, because that saves the headache of figuring out
/// whether it _needs_ to be quoted. Also, all the field separators are always present.
impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'={}{};", &self.label, &self.value, UNIT)?;
        if let Some(warn) = &self.warn {
            write!(f, "{}", warn)?;
        }
        write!(f, ";")?;
        if let Some(crit) = &self.crit {
            write!(f, "{}", crit)?;
        }
        write!(f, ";{};{}", &self.min, &self.max)
    }
}

pub trait ExitCode: fmt::Display {
    fn exit_code(&self) -> i8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl fmt::Display for ServiceStatus {
    /// It's conventional in the land of Nagios and its branches to write state codes in uppercase.
    /// `fmt()` follows that convention.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uppercase_status = match self {
            ServiceStatus::Ok => "OK",
            ServiceStatus::Warning => "WARNING",
            ServiceStatus::Critical => "CRITICAL",
            ServiceStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", uppercase_status)
    }
}

impl From<&Datum> for ServiceStatus {
    fn from(datum: &Datum) -> Self {
        if datum.is_crit() {
            ServiceStatus::Critical
        } else if datum.is_warn() {
            ServiceStatus::Warning
        } else {
            ServiceStatus::Ok
        }
    }
}

impl ExitCode for ServiceStatus {
    fn exit_code(&self) -> i8 {
        match self {
            ServiceStatus::Ok => 0,
            ServiceStatus::Warning => 1,
            ServiceStatus::Critical => 2,
            ServiceStatus::Unknown => 3,
        }
    }
}
