//! Password policy scoring and credential hashing

use crate::domain::{
    PasswordValidation, PasswordViolation, MAX_PASSWORD_LENGTH, MIN_PASSWORD_LENGTH,
};
use crate::error::{AppError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use regex::Regex;
use std::collections::HashSet;

const MAX_SCORE: u32 = 100;
const CLASS_POINTS: u32 = 10;
const UNCOMMON_POINTS: u32 = 10;
const PATTERN_POINTS: u32 = 5;
const MIN_RUN: usize = 4;

lazy_static::lazy_static! {
    static ref COMMON_PASSWORDS: HashSet<&'static str> = [
        "123456", "12345678", "123456789", "1234567890", "password", "password1",
        "password123", "passw0rd", "p@ssw0rd", "p@ssword", "qwerty", "qwerty123",
        "qwertyuiop", "abc123", "abcd1234", "111111", "000000", "123123", "654321",
        "iloveyou", "admin", "admin123", "administrator", "welcome", "welcome1",
        "welcome123", "letmein", "monkey", "dragon", "sunshine", "princess",
        "football", "baseball", "master", "shadow", "superman", "batman",
        "trustno1", "login", "starwars", "whatever", "freedom", "hello123",
        "changeme", "secret", "default", "guest", "test1234", "1q2w3e4r",
        "1qaz2wsx", "zaq12wsx", "asdfghjkl", "access", "michael", "charlie",
        "jennifer", "computer", "internet", "company", "attendance",
    ]
    .into_iter()
    .collect();

    /// Every four-key walk along a keyboard row or column, both directions
    static ref KEYBOARD_WALKS: Vec<String> = {
        let lines = [
            "qwertyuiop", "asdfghjkl", "zxcvbnm",
            "1qaz", "2wsx", "3edc", "4rfv", "5tgb", "6yhn", "7ujm",
        ];
        let mut walks = Vec::new();
        for line in lines {
            let chars: Vec<char> = line.chars().collect();
            for window in chars.windows(MIN_RUN) {
                let forward: String = window.iter().collect();
                let backward: String = window.iter().rev().collect();
                walks.push(forward);
                walks.push(backward);
            }
        }
        walks
    };

    static ref DATE_REGEX: Regex =
        Regex::new(r"(?:19|20)\d{2}|\d{1,2}[/.\-]\d{1,2}(?:[/.\-]\d{2,4})?").unwrap();

    static ref PREDICTABLE_WORDS: Vec<&'static str> = vec![
        "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
        "january", "february", "march", "april", "june", "july", "august",
        "september", "october", "november", "december",
        "admin", "superadmin", "platform", "user", "manager", "employee",
    ];
}

/// Scores and validates candidate passwords against a fixed rule set.
///
/// `validate` is a pure function of the password: the same input always yields
/// the same verdict. The score is advisory; only `errors` decide validity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordPolicyEngine;

impl PasswordPolicyEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, password: &str) -> PasswordValidation {
        let mut errors = Vec::new();
        let mut score: u32 = 0;
        let length = password.chars().count();

        if length < MIN_PASSWORD_LENGTH {
            errors.push(PasswordViolation::TooShort);
        } else if length > MAX_PASSWORD_LENGTH {
            errors.push(PasswordViolation::TooLong);
        } else {
            score += match length {
                0..=11 => 20,
                12..=15 => 25,
                _ => 30,
            };
        }

        let classes = [
            (
                password.chars().any(char::is_uppercase),
                PasswordViolation::MissingUppercase,
            ),
            (
                password.chars().any(char::is_lowercase),
                PasswordViolation::MissingLowercase,
            ),
            (
                password.chars().any(|c| c.is_ascii_digit()),
                PasswordViolation::MissingDigit,
            ),
            (
                password
                    .chars()
                    .any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
                PasswordViolation::MissingSpecial,
            ),
        ];
        for (present, violation) in classes {
            if present {
                score += CLASS_POINTS;
            } else {
                errors.push(violation);
            }
        }

        let lowered = password.to_lowercase();

        if COMMON_PASSWORDS.contains(lowered.as_str()) {
            errors.push(PasswordViolation::CommonPassword);
        } else {
            score += UNCOMMON_POINTS;
        }

        let pattern_checks = [
            find_sequential_run(&lowered).map(PasswordViolation::SequentialCharacters),
            find_repeated_char(password).map(PasswordViolation::RepeatedCharacters),
            find_keyboard_walk(&lowered).map(PasswordViolation::KeyboardPattern),
            find_predictable_word(&lowered).map(PasswordViolation::PredictableWord),
        ];
        for check in pattern_checks {
            match check {
                Some(violation) => errors.push(violation),
                None => score += PATTERN_POINTS,
            }
        }

        let mut suggestions: Vec<String> = Vec::new();
        for violation in &errors {
            let suggestion = violation.suggestion().to_string();
            if !suggestions.contains(&suggestion) {
                suggestions.push(suggestion);
            }
        }
        if errors.is_empty() && length < 12 {
            suggestions.push(PasswordViolation::TooShort.suggestion().to_string());
        }

        PasswordValidation {
            valid: errors.is_empty(),
            score: score.min(MAX_SCORE) as u8,
            errors,
            suggestions,
        }
    }

    /// Validate and fail with `WeakPassword` listing every broken rule.
    pub fn enforce(&self, password: &str) -> Result<PasswordValidation> {
        let validation = self.validate(password);
        if validation.valid {
            Ok(validation)
        } else {
            Err(AppError::WeakPassword(validation.error_messages()))
        }
    }
}

/// First run of `MIN_RUN` strictly consecutive letters or digits, either
/// direction ("abcd", "4321").
fn find_sequential_run(lowered: &str) -> Option<String> {
    let chars: Vec<char> = lowered.chars().collect();
    chars
        .windows(MIN_RUN)
        .find(|window| {
            let same_class = window.iter().all(|c| c.is_ascii_lowercase())
                || window.iter().all(|c| c.is_ascii_digit());
            if !same_class {
                return false;
            }
            let steps: Vec<i32> = window
                .windows(2)
                .map(|pair| pair[1] as i32 - pair[0] as i32)
                .collect();
            steps.iter().all(|&s| s == 1) || steps.iter().all(|&s| s == -1)
        })
        .map(|window| window.iter().collect())
}

/// A character appearing three or more times in a row
fn find_repeated_char(password: &str) -> Option<char> {
    let chars: Vec<char> = password.chars().collect();
    chars
        .windows(3)
        .find(|w| w[0] == w[1] && w[1] == w[2])
        .map(|w| w[0])
}

fn find_keyboard_walk(lowered: &str) -> Option<String> {
    KEYBOARD_WALKS
        .iter()
        .find(|walk| lowered.contains(walk.as_str()))
        .cloned()
}

fn find_predictable_word(lowered: &str) -> Option<String> {
    if let Some(m) = DATE_REGEX.find(lowered) {
        return Some(m.as_str().to_string());
    }
    PREDICTABLE_WORDS
        .iter()
        .find(|word| lowered.contains(*word))
        .map(|word| word.to_string())
}

/// Hash a password with Argon2id and a random salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC hash. A malformed hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        tracing::warn!("Stored password hash is malformed");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

lazy_static::lazy_static! {
    static ref DUMMY_HASH: String =
        hash_password("rollcall-dummy-password").unwrap_or_default();
}

/// Spend the same Argon2 work as a real check when there is no subject, so
/// "unknown email" and "wrong password" cost the same.
pub fn verify_against_dummy(password: &str) {
    let _ = verify_password(password, &DUMMY_HASH);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn engine() -> PasswordPolicyEngine {
        PasswordPolicyEngine::new()
    }

    #[test]
    fn test_reference_strong_password() {
        let result = engine().validate("Passw0rd!");
        assert!(result.valid, "unexpected errors: {:?}", result.errors);
        assert!(result.score >= 60);
        assert_eq!(result.score, 90);
    }

    #[test]
    fn test_reference_weak_password() {
        let result = engine().validate("password");
        assert!(!result.valid);
        for expected in [
            PasswordViolation::MissingUppercase,
            PasswordViolation::MissingDigit,
            PasswordViolation::MissingSpecial,
            PasswordViolation::CommonPassword,
        ] {
            assert!(result.errors.contains(&expected), "missing {:?}", expected);
        }
        assert_eq!(result.score, 50);
    }

    #[test]
    fn test_validate_is_deterministic() {
        let first = engine().validate("Tr1cky!Passphrase");
        let second = engine().validate("Tr1cky!Passphrase");
        assert_eq!(first, second);
    }

    #[rstest]
    #[case("Xy!9abcd", PasswordViolation::SequentialCharacters("abcd".to_string()))]
    #[case("Xy!97654", PasswordViolation::SequentialCharacters("7654".to_string()))]
    #[case("Xy!9aaab", PasswordViolation::RepeatedCharacters('a'))]
    #[case("Xy!9qwer", PasswordViolation::KeyboardPattern("qwer".to_string()))]
    #[case("Xy!9lkjh", PasswordViolation::KeyboardPattern("lkjh".to_string()))]
    #[case("Xy!1999z", PasswordViolation::PredictableWord("1999".to_string()))]
    #[case("Xy!#12/05", PasswordViolation::PredictableWord("12/05".to_string()))]
    #[case("Friday!9X", PasswordViolation::PredictableWord("friday".to_string()))]
    #[case("Xy!9Admin", PasswordViolation::PredictableWord("admin".to_string()))]
    fn test_pattern_rules(#[case] password: &str, #[case] expected: PasswordViolation) {
        let result = engine().validate(password);
        assert!(!result.valid);
        assert!(
            result.errors.contains(&expected),
            "{password}: expected {expected:?} in {:?}",
            result.errors
        );
    }

    #[rstest]
    #[case("Xy!9abdQ")]
    #[case("Xy!9aabQ")]
    #[case("Xy!9abcQ")]
    fn test_short_runs_and_doubles_are_allowed(#[case] password: &str) {
        let result = engine().validate(password);
        assert!(result.valid, "{password}: {:?}", result.errors);
    }

    #[test]
    fn test_length_bounds() {
        let too_long = format!("Aa1!{}", "xy".repeat(70));
        assert!(engine()
            .validate(&too_long)
            .errors
            .contains(&PasswordViolation::TooLong));
        assert!(engine()
            .validate("Aa1!")
            .errors
            .contains(&PasswordViolation::TooShort));
    }

    #[test]
    fn test_longer_passwords_score_higher() {
        let short = engine().validate("Kp7!vRzq");
        let long = engine().validate("Kp7!vRzq#Lm2Tx9w");
        assert!(short.valid && long.valid);
        assert!(long.score > short.score);
        assert_eq!(long.score, 100);
    }

    #[test]
    fn test_score_never_gates_validity() {
        // Valid despite a modest score
        let result = engine().validate("Kp7!vRzq");
        assert!(result.valid);
        assert!(result.score < 100);
        assert!(!result.suggestions.is_empty());
    }

    #[test]
    fn test_common_password_check_ignores_case() {
        let result = engine().validate("PASSWORD");
        assert!(result.errors.contains(&PasswordViolation::CommonPassword));
    }

    #[test]
    fn test_enforce_reports_messages() {
        let err = engine().enforce("password").unwrap_err();
        match err {
            AppError::WeakPassword(messages) => {
                assert!(messages.iter().any(|m| m.contains("too common")))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(engine().enforce("Passw0rd!").is_ok());
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("Passw0rd!").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Passw0rd!", &hash));
        assert!(!verify_password("Passw0rd?", &hash));
        assert!(!verify_password("Passw0rd!", "not-a-phc-string"));
    }
}
