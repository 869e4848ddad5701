//! Firmware Response Parser
//!
//! Classifies inbound lines and extracts values from the whitespace
//! delimited `KEY:value` status format, e.g. `T:200.0 /210.0 B:60.0 /60.0`.
//! Targets are written as a separate `/value` token following the reading
//! they belong to. No fixed-width or fixed-order assumptions are made.

use gcodeservice_core::{FirmwareErrorKind, TemperatureReading};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of a firmware resend request
pub const RESEND_PREFIX: &str = "Resend:";

/// Prefix of a firmware error line
pub const ERROR_PREFIX: &str = "ERROR";

/// Classified inbound line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FirmwareResponse {
    /// `ok`, possibly followed by status tokens
    Ok,
    /// `ERROR:<code>`
    Error {
        /// Raw code
        code: String,
        /// Decoded condition
        kind: FirmwareErrorKind,
    },
    /// `Resend:<n>`
    Resend(u64),
    /// Anything else carrying `KEY:value` tokens
    Status(Vec<StatusToken>),
    /// Free text
    Message(String),
}

impl fmt::Display for FirmwareResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error { code, kind } => write!(f, "error:{} ({})", code, kind),
            Self::Resend(n) => write!(f, "resend:{}", n),
            Self::Status(tokens) => write!(f, "status:{} tokens", tokens.len()),
            Self::Message(msg) => write!(f, "message:{}", msg),
        }
    }
}

/// One `KEY:value` token with its optional `/target`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusToken {
    /// Key before the colon
    pub key: String,
    /// Raw value after the colon
    pub value: String,
    /// Raw target from a following `/value` token
    pub target: Option<String>,
}

impl StatusToken {
    /// Value as a number
    pub fn number(&self) -> Option<f64> {
        self.value.parse().ok()
    }

    /// Target as a number
    pub fn target_number(&self) -> Option<f64> {
        self.target.as_deref().and_then(|t| t.parse().ok())
    }
}

/// Parse an inbound line
pub fn parse(line: &str) -> Option<FirmwareResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line == "ok" {
        return Some(FirmwareResponse::Ok);
    }

    if let Some(code) = parse_error_code(line) {
        let kind = super::error_decoder::decode_error(&code);
        return Some(FirmwareResponse::Error { code, kind });
    }

    if let Some(n) = parse_resend(line) {
        return Some(FirmwareResponse::Resend(n));
    }

    if line.starts_with("ok ") {
        return Some(FirmwareResponse::Ok);
    }

    let tokens = parse_tokens(line);
    if tokens.is_empty() {
        Some(FirmwareResponse::Message(line.to_string()))
    } else {
        Some(FirmwareResponse::Status(tokens))
    }
}

/// Extract the code from an `ERROR:<code>` line
pub fn parse_error_code(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix(ERROR_PREFIX)?;
    let code = rest.trim_start().strip_prefix(':').unwrap_or(rest);
    Some(code.trim().to_string())
}

/// Extract the line number from a `Resend:<n>` line
pub fn parse_resend(line: &str) -> Option<u64> {
    let rest = line.trim().strip_prefix(RESEND_PREFIX)?;
    rest.trim().parse().ok()
}

/// Split a status line into `KEY:value` tokens
///
/// A bare `/value` token is attached as the target of the token before it.
/// Tokens without a colon are ignored.
pub fn parse_tokens(line: &str) -> Vec<StatusToken> {
    let mut tokens: Vec<StatusToken> = Vec::new();

    for word in line.split_whitespace() {
        if let Some(target) = word.strip_prefix('/') {
            if let Some(last) = tokens.last_mut() {
                if last.target.is_none() {
                    last.target = Some(target.to_string());
                }
            }
            continue;
        }

        if let Some((key, value)) = word.split_once(':') {
            if key.is_empty() {
                continue;
            }
            // `T:200/210` written without a space
            let (value, target) = match value.split_once('/') {
                Some((v, t)) => (v, Some(t.to_string())),
                None => (value, None),
            };
            tokens.push(StatusToken {
                key: key.to_string(),
                value: value.to_string(),
                target,
            });
        }
    }

    tokens
}

/// Extract extruder and bed temperatures from a status line
pub fn parse_temperatures(line: &str) -> TemperatureReading {
    temperatures(&parse_tokens(line))
}

/// Extruder and bed temperatures carried by already parsed tokens
pub fn temperatures(tokens: &[StatusToken]) -> TemperatureReading {
    let mut reading = TemperatureReading::default();

    for token in tokens {
        match token.key.as_str() {
            "T" | "T0" if reading.extruder.is_none() => {
                reading.extruder = token.number();
                reading.extruder_target = token.target_number();
            }
            "B" if reading.bed.is_none() => {
                reading.bed = token.number();
                reading.bed_target = token.target_number();
            }
            _ => {}
        }
    }

    reading
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_ok() {
        assert_eq!(parse("ok"), Some(FirmwareResponse::Ok));
        assert_eq!(parse("ok T:200 /200 B:60 /60"), Some(FirmwareResponse::Ok));
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn test_parse_error_line() {
        match parse("ERROR:102") {
            Some(FirmwareResponse::Error { code, kind }) => {
                assert_eq!(code, "102");
                assert_eq!(kind, FirmwareErrorKind::DoorOpen);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse_error_code("ERROR : 105"), Some("105".to_string()));
        assert_eq!(parse_error_code("echo:busy"), None);
    }

    #[test]
    fn test_parse_resend() {
        assert_eq!(parse_resend("Resend:5"), Some(5));
        assert_eq!(parse_resend("Resend: 17"), Some(17));
        assert_eq!(parse_resend("Resend:x"), None);
        assert_eq!(parse("Resend:3"), Some(FirmwareResponse::Resend(3)));
    }

    #[test]
    fn test_parse_tokens_with_targets() {
        let tokens = parse_tokens("T:200.5 /210.0 B:60 /60 @:0 B@:0");
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0].key, "T");
        assert_eq!(tokens[0].number(), Some(200.5));
        assert_eq!(tokens[0].target_number(), Some(210.0));
        assert_eq!(tokens[1].key, "B");
        assert_eq!(tokens[1].target_number(), Some(60.0));
        assert_eq!(tokens[2].target, None);
    }

    #[test]
    fn test_parse_temperatures() {
        let reading = parse_temperatures("T:200 /200 B:60 /60");
        assert_eq!(reading.extruder, Some(200.0));
        assert_eq!(reading.extruder_target, Some(200.0));
        assert_eq!(reading.bed, Some(60.0));
        assert_eq!(reading.bed_target, Some(60.0));

        // M109 wait output
        let reading = parse_temperatures("T:185.3 E:0 W:?");
        assert_eq!(reading.extruder, Some(185.3));
        assert_eq!(reading.extruder_target, None);
        assert_eq!(reading.bed, None);

        let reading = parse_temperatures("B:55.1/60");
        assert_eq!(reading.bed, Some(55.1));
        assert_eq!(reading.bed_target, Some(60.0));
    }

    #[test]
    fn test_status_and_message() {
        assert!(matches!(parse("T:20 /0"), Some(FirmwareResponse::Status(_))));
        assert_eq!(
            parse("start"),
            Some(FirmwareResponse::Message("start".to_string()))
        );
    }

    proptest! {
        #[test]
        fn temperatures_round_trip_any_spacing(
            t in 0u32..400, tt in 0u32..400, b in 0u32..150, bt in 0u32..150,
            gap in " {1,4}",
        ) {
            let line = format!("T:{t}{gap}/{tt}{gap}B:{b}{gap}/{bt}");
            let reading = parse_temperatures(&line);
            prop_assert_eq!(reading.extruder, Some(t as f64));
            prop_assert_eq!(reading.extruder_target, Some(tt as f64));
            prop_assert_eq!(reading.bed, Some(b as f64));
            prop_assert_eq!(reading.bed_target, Some(bt as f64));
        }

        #[test]
        fn tokenizer_never_panics(line in "\\PC{0,80}") {
            let _ = parse_tokens(&line);
            let _ = parse(&line);
        }
    }
}
