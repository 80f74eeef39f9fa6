//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Subject grammar, subscription patterns, and wildcard matching."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Subjects are dot-delimited tokens of upper-case letters, digits, `-` and
//! `_`. Subscription patterns additionally accept `*` for exactly one token,
//! and a trailing `>` (one or more tokens) or `+` (zero or more tokens).

use std::fmt;

use r_gmsec_common::{GmsecError, Result};

fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte.is_ascii_digit() || byte == b'-' || byte == b'_'
}

fn token_is_valid(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(is_token_char)
}

/// Whether `subject` is a valid publish subject.
pub fn is_valid_subject(subject: &str) -> bool {
    !subject.is_empty() && subject.split('.').all(token_is_valid)
}

/// Validate a publish subject.
pub fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(GmsecError::InvalidArgument(
            "Subject cannot be NULL, nor an empty string".to_owned(),
        ));
    }
    if !is_valid_subject(subject) {
        return Err(GmsecError::InvalidSubject(format!(
            "Invalid message subject [{subject}]"
        )));
    }
    Ok(())
}

/// Compiled subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectPattern {
    text: String,
    tokens: Vec<String>,
}

impl SubjectPattern {
    /// Parse and validate a subscription pattern.
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(GmsecError::InvalidArgument(
                "Subject cannot be NULL, nor an empty string".to_owned(),
            ));
        }
        let tokens: Vec<String> = pattern.split('.').map(str::to_owned).collect();
        let last = tokens.len() - 1;
        for (index, token) in tokens.iter().enumerate() {
            let valid = match token.as_str() {
                "*" => true,
                ">" | "+" => index == last,
                other => token_is_valid(other),
            };
            if !valid {
                return Err(GmsecError::InvalidSubject(format!(
                    "Subject is invalid [{pattern}]"
                )));
            }
        }
        Ok(Self {
            text: pattern.to_owned(),
            tokens,
        })
    }

    /// Pattern text as supplied.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether a subject matches this pattern.
    pub fn matches(&self, subject: &str) -> bool {
        let subject: Vec<&str> = subject.split('.').collect();
        let mut index = 0;
        for pattern in &self.tokens {
            match pattern.as_str() {
                ">" => return index < subject.len(),
                "+" => return true,
                "*" => {
                    if index >= subject.len() {
                        return false;
                    }
                }
                literal => {
                    if subject.get(index) != Some(&literal) {
                        return false;
                    }
                }
            }
            index += 1;
        }
        index == subject.len()
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_gmsec_common::ErrorCode;

    #[test]
    fn subjects_reject_lowercase_and_symbols() {
        assert!(validate_subject("GMSEC.MISSION.SAT_1.MSG.HB").is_ok());
        let err = validate_subject("Subject.Cannot.Contain.Lowercase.Letters").expect_err("lowercase");
        assert!(err.to_string().contains("Invalid message subject"));
        assert!(validate_subject("HELLO%WORLD").is_err());
        assert!(validate_subject("GMSEC..FOO").is_err());
        assert!(validate_subject("GMSEC.*").is_err());
        assert_eq!(validate_subject("").expect_err("empty").code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn patterns_validate_wildcard_placement() {
        assert!(SubjectPattern::parse("GMSEC.*.FOO.>").is_ok());
        assert!(SubjectPattern::parse("GMSEC.FOO.+").is_ok());
        assert!(SubjectPattern::parse("GMSEC.>.FOO").is_err());
        let err = SubjectPattern::parse("GMSEC.MY MISSION.*.*.>").expect_err("space");
        assert!(err.to_string().contains("Subject is invalid"));
    }

    #[test]
    fn wildcard_matching() {
        let star = SubjectPattern::parse("GMSEC.*.BAR").expect("pattern");
        assert!(star.matches("GMSEC.FOO.BAR"));
        assert!(!star.matches("GMSEC.FOO.BAR.BAZ"));
        assert!(!star.matches("GMSEC.BAR"));

        let gt = SubjectPattern::parse("GMSEC.FOO.>").expect("pattern");
        assert!(gt.matches("GMSEC.FOO.BAR"));
        assert!(gt.matches("GMSEC.FOO.BAR.BAZ"));
        assert!(!gt.matches("GMSEC.FOO"));

        let plus = SubjectPattern::parse("GMSEC.FOO.+").expect("pattern");
        assert!(plus.matches("GMSEC.FOO"));
        assert!(plus.matches("GMSEC.FOO.BAR.BAZ"));
        assert!(!plus.matches("GMSEC.BAR"));

        let exact = SubjectPattern::parse("GMSEC.FOO").expect("pattern");
        assert!(exact.matches("GMSEC.FOO"));
        assert!(!exact.matches("GMSEC.FOO.BAR"));
    }
}
