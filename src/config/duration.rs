// src/config/duration.rs

//! Duration strings used in job files and on the command line.
//!
//! Two forms are accepted:
//! - a number with a unit suffix: `"250ms"`, `"3s"`, `"1m"`, `"2h"`
//! - an ISO-8601 duration: `"PT30S"`, `"PT1H30M"`, `"P1DT2H"`

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

fn iso8601() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^P(?:(?P<d>\d+)D)?(?:T(?:(?P<h>\d+)H)?(?:(?P<m>\d+)M)?(?:(?P<s>\d+(?:\.\d+)?)S)?)?$",
        )
        .unwrap_or_else(|e| unreachable!("static ISO-8601 pattern is valid: {e}"))
    })
}

/// Parse a duration string in either supported form.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    if s.starts_with(['P', 'p']) {
        return parse_iso8601(&s.to_uppercase());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;
    let unit = unit_part.trim().to_lowercase();

    let out_of_range = || format!("duration '{s}' is out of range");
    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(out_of_range),
        "h" => value
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(out_of_range),
        _ => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, h or an ISO-8601 duration"
        )),
    }
}

fn parse_iso8601(s: &str) -> Result<Duration, String> {
    let caps = iso8601()
        .captures(s)
        .ok_or_else(|| format!("invalid ISO-8601 duration '{s}'"))?;

    // "P" and "PT" alone match the pattern but carry no value.
    if ["d", "h", "m", "s"].iter().all(|g| caps.name(g).is_none()) {
        return Err(format!("ISO-8601 duration '{s}' has no components"));
    }

    let whole = |name: &str| -> Result<u64, String> {
        caps.name(name)
            .map(|m| m.as_str().parse::<u64>())
            .transpose()
            .map(|v| v.unwrap_or(0))
            .map_err(|e| format!("invalid ISO-8601 duration '{s}': {e}"))
    };

    let days = whole("d")?;
    let hours = whole("h")?;
    let minutes = whole("m")?;
    let seconds = caps
        .name("s")
        .map(|m| m.as_str().parse::<f64>())
        .transpose()
        .map_err(|e| format!("invalid ISO-8601 duration '{s}': {e}"))?
        .unwrap_or(0.0);

    let out_of_range = || format!("ISO-8601 duration '{s}' is out of range");
    let whole_secs = days
        .checked_mul(86_400)
        .zip(hours.checked_mul(3_600))
        .zip(minutes.checked_mul(60))
        .and_then(|((d, h), m)| d.checked_add(h)?.checked_add(m))
        .ok_or_else(out_of_range)?;
    let fraction = Duration::try_from_secs_f64(seconds).map_err(|_| out_of_range())?;
    Duration::from_secs(whole_secs)
        .checked_add(fraction)
        .ok_or_else(out_of_range)
}
