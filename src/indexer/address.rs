use sha2::{Digest, Sha256};

use crate::error::AddressError;

/// Version byte that prefixes every 20-byte mainnet account.
pub const ADDRESS_PREFIX: u8 = 0x41;

const DISPLAY_LEN: usize = 34;
const DISPLAY_LEAD: char = 'T';
const RAW_LEN: usize = 21;

/// Convert a raw hex address to its base58check display form.
///
/// Empty input and addresses that already look like display text are
/// returned unchanged. Undecodable hex is logged and also returned
/// unchanged so one bad address never stops a block.
pub fn to_display_address(raw: &str) -> String {
    match try_to_display_address(raw) {
        Ok(address) => address,
        Err(e) => {
            tracing::warn!(address = raw, error = %e, "Address conversion failed");
            raw.to_string()
        }
    }
}

pub fn try_to_display_address(raw: &str) -> Result<String, AddressError> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    if trimmed.is_empty() || looks_like_display(trimmed) {
        return Ok(trimmed.to_string());
    }

    let bytes = hex::decode(trimmed).map_err(|source| AddressError::Hex {
        address: raw.to_string(),
        source,
    })?;
    Ok(encode_check(&bytes))
}

/// Base58check over the 21-byte form (prefix byte + 20-byte account).
pub fn address_from_account(account: &[u8; 20]) -> String {
    let mut raw = [0u8; RAW_LEN];
    raw[0] = ADDRESS_PREFIX;
    raw[1..].copy_from_slice(account);
    encode_check(&raw)
}

/// Full validation of a display address: shape, alphabet, prefix and checksum.
pub fn is_valid_display_address(address: &str) -> bool {
    if !looks_like_display(address) {
        return false;
    }
    let Ok(decoded) = bs58::decode(address).into_vec() else {
        return false;
    };
    if decoded.len() != RAW_LEN + 4 || decoded[0] != ADDRESS_PREFIX {
        return false;
    }
    let (payload, checksum) = decoded.split_at(RAW_LEN);
    checksum == &double_sha256(payload)[..4]
}

fn looks_like_display(address: &str) -> bool {
    address.len() == DISPLAY_LEN && address.starts_with(DISPLAY_LEAD)
}

fn encode_check(payload: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(payload.len() + 4);
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&double_sha256(payload)[..4]);
    bs58::encode(bytes).into_string()
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}
