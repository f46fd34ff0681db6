//! Password policy verdict types

use serde::{Serialize, Serializer};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// A rule a candidate password broke
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordViolation {
    TooShort,
    TooLong,
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSpecial,
    CommonPassword,
    /// Run of strictly consecutive characters, e.g. "abcd"
    SequentialCharacters(String),
    /// Character repeated more than twice in a row
    RepeatedCharacters(char),
    KeyboardPattern(String),
    /// Year, date, weekday, month or role name
    PredictableWord(String),
}

impl PasswordViolation {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooShort => "too_short",
            Self::TooLong => "too_long",
            Self::MissingUppercase => "missing_uppercase",
            Self::MissingLowercase => "missing_lowercase",
            Self::MissingDigit => "missing_digit",
            Self::MissingSpecial => "missing_special",
            Self::CommonPassword => "common_password",
            Self::SequentialCharacters(_) => "sequential_characters",
            Self::RepeatedCharacters(_) => "repeated_characters",
            Self::KeyboardPattern(_) => "keyboard_pattern",
            Self::PredictableWord(_) => "predictable_word",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::TooShort => "Use at least 12 characters",
            Self::TooLong => "Shorten the password to 128 characters or fewer",
            Self::MissingUppercase => "Add an uppercase letter",
            Self::MissingLowercase => "Add a lowercase letter",
            Self::MissingDigit => "Add a number",
            Self::MissingSpecial => "Add a symbol such as ! or #",
            Self::CommonPassword => "Avoid well-known passwords",
            Self::SequentialCharacters(_) => "Avoid sequences like abcd or 1234",
            Self::RepeatedCharacters(_) => "Avoid repeating the same character",
            Self::KeyboardPattern(_) => "Avoid keyboard patterns like qwerty",
            Self::PredictableWord(_) => "Avoid dates, names of days or months, and role names",
        }
    }
}

impl std::fmt::Display for PasswordViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(
                f,
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            ),
            Self::TooLong => write!(
                f,
                "Password must be at most {} characters",
                MAX_PASSWORD_LENGTH
            ),
            Self::MissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            Self::MissingLowercase => {
                write!(f, "Password must contain at least one lowercase letter")
            }
            Self::MissingDigit => write!(f, "Password must contain at least one number"),
            Self::MissingSpecial => {
                write!(f, "Password must contain at least one special character")
            }
            Self::CommonPassword => write!(f, "Password is too common"),
            Self::SequentialCharacters(run) => {
                write!(f, "Password contains sequential characters \"{}\"", run)
            }
            Self::RepeatedCharacters(c) => {
                write!(f, "Password repeats \"{}\" more than twice in a row", c)
            }
            Self::KeyboardPattern(walk) => {
                write!(f, "Password contains keyboard pattern \"{}\"", walk)
            }
            Self::PredictableWord(word) => {
                write!(f, "Password contains predictable text \"{}\"", word)
            }
        }
    }
}

impl Serialize for PasswordViolation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Result of validating a candidate password
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordValidation {
    /// True iff `errors` is empty; the score never gates acceptance
    pub valid: bool,
    /// Advisory strength, 0-100
    pub score: u8,
    pub errors: Vec<PasswordViolation>,
    pub suggestions: Vec<String>,
}

impl PasswordValidation {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_serializes_as_message() {
        let json = serde_json::to_string(&PasswordViolation::RepeatedCharacters('a')).unwrap();
        assert_eq!(json, "\"Password repeats \\\"a\\\" more than twice in a row\"");
    }

    #[test]
    fn test_error_messages() {
        let validation = PasswordValidation {
            valid: false,
            score: 10,
            errors: vec![PasswordViolation::TooShort, PasswordViolation::MissingDigit],
            suggestions: vec![],
        };
        assert_eq!(
            validation.error_messages(),
            vec![
                "Password must be at least 8 characters".to_string(),
                "Password must contain at least one number".to_string(),
            ]
        );
        assert_eq!(PasswordViolation::MissingDigit.code(), "missing_digit");
    }
}
