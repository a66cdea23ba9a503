//! Input validation for everything users can type at the bot: wallet
//! addresses, social handles, withdrawal amounts and referral payloads.

use rust_decimal::Decimal;

/// A BEP-20 address: `0x` followed by exactly 40 hex characters.
pub fn is_valid_wallet_address(address: &str) -> bool {
    let Some(payload) = address.strip_prefix("0x") else {
        return false;
    };
    payload.len() == 40 && hex::decode(payload).is_ok()
}

/// Telegram handle: 5-32 word characters, optional leading `@`.
pub fn is_valid_telegram_handle(handle: &str) -> bool {
    is_handle(handle, 5, 32)
}

/// X/Twitter handle: 1-15 word characters, optional leading `@`.
pub fn is_valid_twitter_handle(handle: &str) -> bool {
    is_handle(handle, 1, 15)
}

fn is_handle(handle: &str, min: usize, max: usize) -> bool {
    let body = handle.strip_prefix('@').unwrap_or(handle);
    (min..=max).contains(&body.chars().count())
        && body.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strips the `@` so the stored form is uniform.
pub fn normalize_handle(handle: &str) -> String {
    handle.strip_prefix('@').unwrap_or(handle).to_string()
}

/// Parses a withdrawal amount: a number (thousands separators tolerated) or
/// the literal `all`, which withdraws the full balance.
pub fn parse_withdrawal_amount(text: &str, balance: Decimal) -> Option<Decimal> {
    let text = text.trim().to_lowercase();
    if text == "all" {
        return Some(balance);
    }
    text.replace(',', "").parse::<Decimal>().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    BelowMinimum { min: Decimal },
    ExceedsBalance { balance: Decimal },
    NotPositive,
}

/// A request is valid iff `min <= amount <= balance`.
pub fn validate_withdrawal_amount(
    amount: Decimal,
    min: Decimal,
    balance: Decimal,
) -> Result<(), AmountError> {
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive);
    }
    if amount < min {
        return Err(AmountError::BelowMinimum { min });
    }
    if amount > balance {
        return Err(AmountError::ExceedsBalance { balance });
    }
    Ok(())
}

/// Extracts the inviter id from a `/start ref<id>` payload. Self-referrals
/// are dropped here, before anything touches the ledger.
pub fn parse_referral_payload(payload: &str, user_id: i64) -> Option<i64> {
    let inviter: i64 = payload.trim().strip_prefix("ref")?.parse().ok()?;
    (inviter != user_id).then_some(inviter)
}

/// Parses the `<user_id> <amount>` argument pair of the manual-credit command.
pub fn parse_user_amount(args: &str) -> Option<(i64, Decimal)> {
    let mut parts = args.split_whitespace();
    let user_id = parts.next()?.parse().ok()?;
    let amount: Decimal = parts.next()?.parse().ok()?;
    if parts.next().is_some() || amount <= Decimal::ZERO {
        return None;
    }
    Some((user_id, amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn accepts_well_formed_addresses() {
        assert!(is_valid_wallet_address(
            "0x742d35Cc6634C0532925a3b8D4C0C8b3C2e1e1e1"
        ));
        assert!(is_valid_wallet_address(
            "0x0000000000000000000000000000000000000000"
        ));
    }

    #[test]
    fn rejects_malformed_addresses() {
        // missing prefix
        assert!(!is_valid_wallet_address(
            "742d35Cc6634C0532925a3b8D4C0C8b3C2e1e1e1"
        ));
        // wrong length
        assert!(!is_valid_wallet_address("0x742d35Cc"));
        assert!(!is_valid_wallet_address(
            "0x742d35Cc6634C0532925a3b8D4C0C8b3C2e1e1e1ab"
        ));
        // non-hex characters
        assert!(!is_valid_wallet_address(
            "0xZZZd35Cc6634C0532925a3b8D4C0C8b3C2e1e1e1"
        ));
        assert!(!is_valid_wallet_address(""));
    }

    #[test]
    fn handle_length_bounds() {
        assert!(is_valid_telegram_handle("@meta_core"));
        assert!(is_valid_telegram_handle("abcde"));
        assert!(!is_valid_telegram_handle("abcd"));
        assert!(!is_valid_telegram_handle(&"a".repeat(33)));
        assert!(!is_valid_telegram_handle("has space"));

        assert!(is_valid_twitter_handle("@x"));
        assert!(!is_valid_twitter_handle("@"));
        assert!(!is_valid_twitter_handle(&"b".repeat(16)));
    }

    #[test]
    fn normalizes_handles() {
        assert_eq!(normalize_handle("@meta_core"), "meta_core");
        assert_eq!(normalize_handle("meta_core"), "meta_core");
    }

    #[test]
    fn parses_amounts() {
        let balance = dec!(5000);
        assert_eq!(parse_withdrawal_amount("all", balance), Some(balance));
        assert_eq!(parse_withdrawal_amount("ALL ", balance), Some(balance));
        assert_eq!(parse_withdrawal_amount("4,250", balance), Some(dec!(4250)));
        assert_eq!(parse_withdrawal_amount("4250.5", balance), Some(dec!(4250.5)));
        assert_eq!(parse_withdrawal_amount("soon", balance), None);
    }

    #[test]
    fn amount_bounds() {
        let min = dec!(4000);
        let balance = dec!(5000);
        assert!(validate_withdrawal_amount(dec!(4000), min, balance).is_ok());
        assert!(validate_withdrawal_amount(dec!(5000), min, balance).is_ok());
        assert_eq!(
            validate_withdrawal_amount(dec!(3000), min, balance),
            Err(AmountError::BelowMinimum { min })
        );
        assert_eq!(
            validate_withdrawal_amount(dec!(5001), min, balance),
            Err(AmountError::ExceedsBalance { balance })
        );
        assert_eq!(
            validate_withdrawal_amount(dec!(0), min, balance),
            Err(AmountError::NotPositive)
        );
    }

    #[test]
    fn withdraw_all_uses_full_balance() {
        // balance 5000, min 4000: "all" creates a request for the full 5000
        let balance = dec!(5000);
        let amount = parse_withdrawal_amount("all", balance).unwrap();
        assert_eq!(amount, dec!(5000));
        assert!(validate_withdrawal_amount(amount, dec!(4000), balance).is_ok());
    }

    #[test]
    fn referral_payloads() {
        assert_eq!(parse_referral_payload("ref12345", 999), Some(12345));
        assert_eq!(parse_referral_payload("ref12345", 12345), None); // self-referral
        assert_eq!(parse_referral_payload("12345", 999), None);
        assert_eq!(parse_referral_payload("refabc", 999), None);
        assert_eq!(parse_referral_payload("", 999), None);
    }

    #[test]
    fn user_amount_args() {
        assert_eq!(parse_user_amount("42 1500"), Some((42, dec!(1500))));
        assert_eq!(parse_user_amount("42"), None);
        assert_eq!(parse_user_amount("42 -5"), None);
        assert_eq!(parse_user_amount("42 10 extra"), None);
    }
}
