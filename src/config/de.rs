//! Serde helpers for durations and file modes.
//!
//! Durations accept an integer number of seconds or a string with an
//! optional unit: `"250ms"`, `"5s"`, `"1m"`, `"1h"`, `"1.5s"`. A bare
//! numeric string is seconds. File modes accept an integer or an octal
//! string such as `"0640"`.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer, de};

static DURATION_RE: OnceLock<Regex> = OnceLock::new();

fn duration_regex() -> &'static Regex {
    DURATION_RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*(ms|s|m|h)?\s*$").expect("valid duration regex")
    })
}

pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let captures = duration_regex()
        .captures(text)
        .ok_or_else(|| format!("invalid duration {:?}", text))?;

    let value: f64 = captures[1]
        .parse()
        .map_err(|_| format!("invalid duration {:?}", text))?;
    let seconds = match captures.get(2).map(|m| m.as_str()) {
        Some("ms") => value / 1000.0,
        Some("m") => value * 60.0,
        Some("h") => value * 3600.0,
        _ => value,
    };

    Duration::try_from_secs_f64(seconds).map_err(|_| format!("duration out of range: {:?}", text))
}

pub fn parse_file_mode(text: &str) -> Result<u32, String> {
    let digits = text.trim();
    let digits = digits
        .strip_prefix("0o")
        .unwrap_or(digits.trim_start_matches('0'));
    if digits.is_empty() {
        return Ok(0);
    }
    let mode = u32::from_str_radix(digits, 8).map_err(|_| format!("invalid file mode {:?}", text))?;
    if mode > 0o7777 {
        return Err(format!("file mode out of range: {:?}", text));
    }
    Ok(mode)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Number(u64),
    Text(String),
}

pub fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match Raw::deserialize(deserializer)? {
        Raw::Number(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(de::Error::custom),
    }
}

pub fn option_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(Raw::Text(text)) => parse_duration(&text).map(Some).map_err(de::Error::custom),
    }
}

pub fn file_mode<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match Raw::deserialize(deserializer)? {
        Raw::Number(mode) if mode <= 0o7777 => Ok(mode as u32),
        Raw::Number(mode) => Err(de::Error::custom(format!("file mode out of range: {}", mode))),
        Raw::Text(text) => parse_file_mode(&text).map_err(de::Error::custom),
    }
}
