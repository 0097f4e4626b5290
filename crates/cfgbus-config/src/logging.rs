use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON lines, one event per line.
    #[default]
    Json,
    /// Human-readable single line output for interactive runs.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::json("json", LogFormat::Json)]
    #[case::compact("compact", LogFormat::Compact)]
    #[case::mixed_case("Compact", LogFormat::Compact)]
    fn parses_log_formats(#[case] input: &str, #[case] expected: LogFormat) {
        let parsed: LogFormat = input.parse().expect("log format should parse");
        assert_eq!(parsed, expected);
    }

    #[test]
    fn rejects_unknown_format() {
        assert!("syslog".parse::<LogFormat>().is_err());
    }
}
