//! Bot account helpers
//!
//! A Telegram bot token has the shape `{account_id}:{secret}`. The account id
//! is the only stable identity of a bot (the secret can be regenerated), so it
//! is used to key the bot's conversation state and is handed to extensions.

use std::sync::OnceLock;

use regex::Regex;

use crate::utils::errors::{FlowBotError, Result};

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([1-9]\d+):([A-Za-z0-9_-]{35,})$").expect("bot token pattern is valid")
    })
}

/// Extract the account id from a bot token.
///
/// Only the token format is checked, not whether Telegram accepts it.
pub fn bot_account_id_from_token(token: &str) -> Result<i64> {
    let captures = token_pattern()
        .captures(token)
        .ok_or_else(|| FlowBotError::InvalidCredential("Invalid token format.".to_string()))?;

    captures[1]
        .parse::<i64>()
        .map_err(|e| FlowBotError::InvalidCredential(format!("Account id out of range: {}", e)))
}

/// Check whether a token looks like a bot token without extracting anything
pub fn is_valid_bot_token(token: &str) -> bool {
    bot_account_id_from_token(token).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    const SECRET: &str = "AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhxwo";

    #[test]
    fn test_parse_valid_token() {
        let id = bot_account_id_from_token("1234567890:AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhxwo").unwrap();
        assert_eq!(id, 1234567890);
    }

    #[test]
    fn test_reject_non_digit_account_id() {
        assert_matches!(
            bot_account_id_from_token("12c34d56a7890:AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhxwo"),
            Err(FlowBotError::InvalidCredential(_))
        );
    }

    #[test]
    fn test_reject_missing_separator() {
        assert_matches!(
            bot_account_id_from_token("12345AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhxwo"),
            Err(FlowBotError::InvalidCredential(_))
        );
    }

    #[test]
    fn test_reject_leading_zero() {
        let token = format!("0123456:{}", SECRET);
        assert!(!is_valid_bot_token(&token));
    }

    #[test]
    fn test_reject_short_or_invalid_secret() {
        assert!(!is_valid_bot_token("123456:AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhx"));
        assert!(!is_valid_bot_token("123456:AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xh+o"));
        assert!(!is_valid_bot_token(""));
    }

    #[test]
    fn test_reject_single_digit_id() {
        // The pattern requires at least two digits before the separator.
        assert!(!is_valid_bot_token(&format!("7:{}", SECRET)));
    }

    #[test]
    fn test_reject_overflowing_id() {
        let token = format!("99999999999999999999:{}", SECRET);
        assert_matches!(
            bot_account_id_from_token(&token),
            Err(FlowBotError::InvalidCredential(_))
        );
    }

    proptest! {
        #[test]
        fn prop_account_id_round_trips(id in 10i64..i64::MAX, secret in "[A-Za-z0-9_-]{35,60}") {
            let token = format!("{}:{}", id, secret);
            prop_assert_eq!(bot_account_id_from_token(&token).unwrap(), id);
        }

        #[test]
        fn prop_short_secret_is_rejected(id in 10i64..1_000_000_000i64, secret in "[A-Za-z0-9_-]{0,34}") {
            let token = format!("{}:{}", id, secret);
            prop_assert!(bot_account_id_from_token(&token).is_err());
        }
    }
}
