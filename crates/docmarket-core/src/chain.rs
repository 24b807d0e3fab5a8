//! Chain identifiers.
//!
//! Providers report chain ids as hex quantities ("0xaa36a7"), some wallets
//! as decimal strings ("11155111"). Comparison accepts either form.

/// Sepolia test network chain id.
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

/// Sepolia chain id as the hex quantity returned by `eth_chainId`.
pub const SEPOLIA_CHAIN_ID_HEX: &str = "0xaa36a7";

/// Parses a chain id given as a hex quantity or a decimal string.
pub fn parse_chain_id(chain_id: &str) -> Option<u64> {
    let trimmed = chain_id.trim();
    match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => trimmed.parse().ok(),
    }
}

/// Formats a chain id as a lowercase hex quantity.
pub fn chain_id_hex(chain_id: u64) -> String {
    format!("{:#x}", chain_id)
}

/// Returns true when both strings name the same chain.
pub fn chain_matches(actual: &str, expected: &str) -> bool {
    match (parse_chain_id(actual), parse_chain_id(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Human-readable name for well-known chains.
pub fn chain_name(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "Ethereum Mainnet",
        SEPOLIA_CHAIN_ID => "Sepolia",
        17000 => "Holesky",
        31337 => "Local (Anvil/Hardhat)",
        _ => "Unknown network",
    }
}
