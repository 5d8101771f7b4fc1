#![forbid(unsafe_code)]

//! Short-form classification from the catalog's ISO-8601 duration string.
//!
//! The rule looks at which unit markers are present, not at the values: a
//! duration is short when it has a seconds component and nothing larger.
//! That makes it an approximation. `PT0M30S` is rejected because it carries a
//! minutes marker, while `PT75S` is accepted even though it runs past a
//! minute. The catalog normalises durations so neither shape shows up in
//! practice.

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Components {
    date: bool,
    hours: Option<u64>,
    minutes: Option<u64>,
    seconds: Option<u64>,
}

/// Returns true when `encoding` denotes a short-form video.
pub fn is_short(encoding: &str) -> bool {
    let Some(parts) = components(encoding) else {
        return false;
    };
    parts.seconds.is_some() && parts.minutes.is_none() && parts.hours.is_none() && !parts.date
}

/// Total length in seconds, for log lines. Durations with a date part are
/// not resolved since month and year lengths vary.
pub fn total_seconds(encoding: &str) -> Option<u64> {
    let parts = components(encoding)?;
    if parts.date {
        return None;
    }
    Some(
        parts.hours.unwrap_or(0) * 3600
            + parts.minutes.unwrap_or(0) * 60
            + parts.seconds.unwrap_or(0),
    )
}

fn components(encoding: &str) -> Option<Components> {
    let body = encoding.trim().strip_prefix('P')?;
    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };

    let mut parts = Components::default();
    for (_, unit) in split_units(date_part)? {
        if !matches!(unit, 'Y' | 'M' | 'W' | 'D') {
            return None;
        }
        parts.date = true;
    }

    if let Some(time) = time_part {
        let units = split_units(time)?;
        if units.is_empty() {
            return None;
        }
        for (value, unit) in units {
            let slot = match unit {
                'H' => &mut parts.hours,
                'M' => &mut parts.minutes,
                'S' => &mut parts.seconds,
                _ => return None,
            };
            if slot.is_some() {
                return None;
            }
            *slot = Some(value);
        }
    }

    if !parts.date && time_part.is_none() {
        return None;
    }
    Some(parts)
}

/// Splits `12H5M` into `[(12, 'H'), (5, 'M')]`. Fractions are truncated.
fn split_units(section: &str) -> Option<Vec<(u64, char)>> {
    let mut units = Vec::new();
    let mut digits = String::new();
    for c in section.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return None;
        }
        let whole = digits.split(['.', ',']).next().unwrap_or("");
        let value = if whole.is_empty() {
            0
        } else {
            whole.parse::<u64>().ok()?
        };
        units.push((value, c));
        digits.clear();
    }
    if !digits.is_empty() {
        return None;
    }
    Some(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_only_is_short() {
        for encoding in ["PT1S", "PT45S", "PT59S", "PT0S", "PT30.5S"] {
            assert!(is_short(encoding), "{encoding} should be short");
        }
    }

    #[test]
    fn any_minutes_marker_is_not_short() {
        for encoding in ["PT1M", "PT2M10S", "PT0M30S", "PT59M59S"] {
            assert!(!is_short(encoding), "{encoding} should not be short");
        }
    }

    #[test]
    fn hours_and_date_parts_are_not_short() {
        for encoding in ["PT1H", "PT1H5S", "P1DT5S", "P0D", "P1W"] {
            assert!(!is_short(encoding), "{encoding} should not be short");
        }
    }

    #[test]
    fn marker_rule_accepts_unnormalised_seconds() {
        assert!(is_short("PT75S"));
    }

    #[test]
    fn malformed_encodings_are_not_short() {
        for encoding in ["", "45S", "PT", "PTS", "PT45", "PT4X", "PT5S5S", "garbage"] {
            assert!(!is_short(encoding), "{encoding:?} should not be short");
        }
    }

    #[test]
    fn total_seconds_adds_components() {
        assert_eq!(total_seconds("PT45S"), Some(45));
        assert_eq!(total_seconds("PT2M10S"), Some(130));
        assert_eq!(total_seconds("PT1H2M3S"), Some(3723));
        assert_eq!(total_seconds("PT1H"), Some(3600));
        assert_eq!(total_seconds("P1DT5S"), None);
        assert_eq!(total_seconds("nope"), None);
    }
}
