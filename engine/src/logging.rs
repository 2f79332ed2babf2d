//! Log sanitization helpers
//!
//! Money-movement paths log enough detail for audit replay but never full
//! identifiers: user ids, wallet addresses and idempotency keys are truncated
//! before they reach the log stream.

/// Truncate an id to its first 8 characters for logging. Counts
/// characters, not bytes; ids carry display names in practice.
pub fn sanitize_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((byte_pos, _)) => format!("{}…", &id[..byte_pos]),
        None => id.to_string(),
    }
}

/// Show only the prefix and suffix of a wallet/escrow address
pub fn sanitize_address(addr: &str) -> String {
    let chars = addr.chars().count();
    if chars <= 12 {
        return addr.to_string();
    }
    let prefix: String = addr.chars().take(6).collect();
    let suffix: String = addr.chars().skip(chars - 4).collect();
    format!("{prefix}…{suffix}")
}

/// Bucket an amount to its order of magnitude; exact amounts stay in the
/// audit log, not in the log stream.
pub fn sanitize_amount(amount: i64) -> String {
    let digits = amount.abs().checked_ilog10().map(|d| d + 1).unwrap_or(1);
    format!("~10^{}", digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_truncated() {
        assert_eq!(sanitize_id("abcd"), "abcd");
        assert_eq!(sanitize_id("0123456789abcdef"), "01234567…");
    }

    #[test]
    fn addresses_keep_prefix_and_suffix() {
        assert_eq!(sanitize_address("GABCDEFGHIJKLMNOP"), "GABCDE…MNOP");
    }

    #[test]
    fn multibyte_identifiers_truncate_on_character_boundaries() {
        assert_eq!(sanitize_id("@ölga:server.example.org"), "@ölga:se…");
        assert_eq!(sanitize_id("@日本語のユーザー"), "@日本語のユーザ…");
        assert_eq!(
            sanitize_address("динар-кошелёк-адрес-длинный"),
            "динар-…нный"
        );
    }

    #[test]
    fn amounts_are_bucketed() {
        assert_eq!(sanitize_amount(98_500_000_000), "~10^11");
        assert_eq!(sanitize_amount(0), "~10^1");
    }
}
