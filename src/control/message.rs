//! # Control Messages
//!
//! One control message per newline-terminated line on the pipe:
//!
//! - `<pwm_log_path>,<acc_log_path>` announces a session's two log files
//! - `eof` ends the session

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Sentinel line that ends a session
pub const END_OF_SESSION: &str = "eof";

/// Separator between the two paths of a file pair
pub const PATH_SEPARATOR: char = ',';

/// A parsed control-channel line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// A new session is logging to these files
    FilePair { pwm_path: PathBuf, acc_path: PathBuf },
    /// The current session is over
    EndOfSession,
}

impl FromStr for ControlMessage {
    type Err = ProtocolError;

    /// Parses one control line.
    ///
    /// Leading and trailing whitespace is ignored, both on the line and on
    /// each path of a file pair.
    ///
    /// # Examples
    ///
    /// ```
    /// use telemetry_monitor::control::message::ControlMessage;
    ///
    /// let msg: ControlMessage = "/tmp/pwm.log,/tmp/acc.log\n".parse().unwrap();
    /// assert!(matches!(msg, ControlMessage::FilePair { .. }));
    ///
    /// let msg: ControlMessage = "eof".parse().unwrap();
    /// assert_eq!(msg, ControlMessage::EndOfSession);
    /// ```
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();

        if line == END_OF_SESSION {
            return Ok(Self::EndOfSession);
        }

        if !line.contains(PATH_SEPARATOR) {
            return Err(ProtocolError::Unrecognized(line.to_string()));
        }

        let mut parts = line.split(PATH_SEPARATOR).map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(pwm), Some(acc), None) if !pwm.is_empty() && !acc.is_empty() => Ok(Self::FilePair {
                pwm_path: PathBuf::from(pwm),
                acc_path: PathBuf::from(acc),
            }),
            _ => Err(ProtocolError::MalformedFilePair(line.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_pair() {
        let msg: ControlMessage = "/tmp/pwm.log,/tmp/acc.log".parse().unwrap();
        assert_eq!(
            msg,
            ControlMessage::FilePair {
                pwm_path: PathBuf::from("/tmp/pwm.log"),
                acc_path: PathBuf::from("/tmp/acc.log"),
            }
        );
    }

    #[test]
    fn test_parse_trims_line_and_paths() {
        let msg: ControlMessage = "  logs/pwm.csv , logs/acc.csv \r\n".parse().unwrap();
        assert_eq!(
            msg,
            ControlMessage::FilePair {
                pwm_path: PathBuf::from("logs/pwm.csv"),
                acc_path: PathBuf::from("logs/acc.csv"),
            }
        );
    }

    #[test]
    fn test_parse_end_of_session() {
        assert_eq!("eof".parse::<ControlMessage>().unwrap(), ControlMessage::EndOfSession);
        assert_eq!("eof\n".parse::<ControlMessage>().unwrap(), ControlMessage::EndOfSession);
    }

    #[test]
    fn test_sentinel_is_case_sensitive() {
        assert_eq!(
            "EOF".parse::<ControlMessage>().unwrap_err(),
            ProtocolError::Unrecognized("EOF".to_string())
        );
    }

    #[test]
    fn test_unrecognized_lines() {
        for line in ["", "hello", "/tmp/pwm.log"] {
            assert!(
                matches!(line.parse::<ControlMessage>(), Err(ProtocolError::Unrecognized(_))),
                "{:?} should be unrecognized",
                line
            );
        }
    }

    #[test]
    fn test_malformed_file_pairs() {
        for line in [",", "/tmp/pwm.log,", ",/tmp/acc.log", "a,b,c", " , "] {
            assert!(
                matches!(line.parse::<ControlMessage>(), Err(ProtocolError::MalformedFilePair(_))),
                "{:?} should be a malformed pair",
                line
            );
        }
    }
}
