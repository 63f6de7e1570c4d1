use alloy::primitives::U256;
use alloy::sol;
use alloy::sol_types::SolCall;
use bigdecimal::BigDecimal;
use std::collections::HashSet;
use std::str::FromStr;

use super::address::{address_from_account, to_display_address};
use super::types::{BlockEnvelope, Contract, ContractKind, TokenType, Transaction, TransferEvent};
use crate::config::StablecoinConfig;
use crate::error::DecodeError;

// Only the selector is taken from the ABI; the arguments are sliced by hand so
// that dirty high bytes in the address word are truncated, not rejected.
sol! {
    function transfer(address to, uint256 amount) returns (bool);
}

/// Native coin precision.
pub const NATIVE_DECIMALS: u32 = 6;

/// Selector plus two 32-byte words, in hex characters.
const TRANSFER_CALL_HEX_LEN: usize = 8 + 64 + 64;

/// A contract payload after field validation, one variant per supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractCall {
    Native(NativeTransfer),
    Asset(AssetTransfer),
    Trigger(TriggerSmartContract),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeTransfer {
    pub owner_address: String,
    pub to_address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetTransfer {
    pub owner_address: String,
    pub to_address: String,
    pub amount: u64,
    pub asset_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSmartContract {
    pub owner_address: String,
    pub contract_address: String,
    pub data: String,
}

impl ContractCall {
    /// Validate a raw contract. Unsupported kinds yield `Ok(None)`.
    pub fn parse(contract: &Contract) -> Result<Option<Self>, DecodeError> {
        let params = contract.parameters.view();
        let call = match &contract.kind {
            ContractKind::NativeTransfer => {
                let value = params.get_nested("value")?;
                ContractCall::Native(NativeTransfer {
                    owner_address: value.get_str("owner_address")?.to_string(),
                    to_address: value.get_str("to_address")?.to_string(),
                    amount: value.get_u64("amount")?,
                })
            }
            ContractKind::AssetTransfer => {
                let value = params.get_nested("value")?;
                ContractCall::Asset(AssetTransfer {
                    owner_address: value.get_str("owner_address")?.to_string(),
                    to_address: value.get_str("to_address")?.to_string(),
                    amount: value.get_u64("amount")?,
                    asset_name: value.get_str("asset_name")?.to_string(),
                })
            }
            ContractKind::SmartContractTrigger => {
                let value = params.get_nested("value")?;
                ContractCall::Trigger(TriggerSmartContract {
                    owner_address: value.get_str("owner_address")?.to_string(),
                    contract_address: value.get_str("contract_address")?.to_string(),
                    data: value.get_str("data")?.to_string(),
                })
            }
            ContractKind::Other(_) => return Ok(None),
        };
        Ok(Some(call))
    }
}

/// Where a contract sits: its block, its transaction and its position in it.
#[derive(Debug, Clone, Copy)]
pub struct ContractContext<'a> {
    pub block: &'a BlockEnvelope,
    pub tx: &'a Transaction,
    pub index: u32,
}

/// Turns contracts into transfer events.
#[derive(Debug, Clone)]
pub struct TransferDecoder {
    stablecoin: StablecoinConfig,
    filter_native: bool,
}

impl TransferDecoder {
    pub fn new(stablecoin: StablecoinConfig, filter_native: bool) -> Self {
        Self {
            stablecoin,
            filter_native,
        }
    }

    /// Decode one contract into at most one event.
    ///
    /// Returns `Ok(None)` when the contract is not a transfer, the transfer
    /// touches no watched address (where filtering applies), or the tracked
    /// stablecoin is disabled.
    pub fn decode(
        &self,
        contract: &Contract,
        ctx: ContractContext<'_>,
        watched: &HashSet<String>,
    ) -> Result<Option<TransferEvent>, DecodeError> {
        match ContractCall::parse(contract)? {
            Some(ContractCall::Native(call)) => self.decode_native(&call, ctx, watched),
            Some(ContractCall::Asset(call)) => self.decode_asset(&call, ctx, watched),
            Some(ContractCall::Trigger(call)) => self.decode_trigger(&call, ctx, watched),
            None => Ok(None),
        }
    }

    fn decode_native(
        &self,
        call: &NativeTransfer,
        ctx: ContractContext<'_>,
        watched: &HashSet<String>,
    ) -> Result<Option<TransferEvent>, DecodeError> {
        let source = to_display_address(&call.owner_address);
        let destination = to_display_address(&call.to_address);

        if self.filter_native && !touches(watched, &source, &destination) {
            return Ok(None);
        }

        let amount = scale_amount(call.amount, NATIVE_DECIMALS)?;
        tracing::debug!(
            from = %source,
            to = %destination,
            amount = %amount,
            tx = %ctx.tx.id,
            "TRX transfer"
        );

        Ok(Some(new_event(
            ctx,
            TokenType::Native,
            source,
            destination,
            amount,
        )))
    }

    fn decode_asset(
        &self,
        call: &AssetTransfer,
        ctx: ContractContext<'_>,
        watched: &HashSet<String>,
    ) -> Result<Option<TransferEvent>, DecodeError> {
        let source = to_display_address(&call.owner_address);
        let destination = to_display_address(&call.to_address);

        if !touches(watched, &source, &destination) {
            return Ok(None);
        }

        // Asset precision is per-asset and not known here.
        let amount = BigDecimal::from(call.amount);
        tracing::debug!(
            from = %source,
            to = %destination,
            amount = %amount,
            asset = %call.asset_name,
            tx = %ctx.tx.id,
            "TRC10 transfer"
        );

        let mut event = new_event(
            ctx,
            TokenType::FirstClassToken,
            source,
            destination,
            amount,
        );
        event.asset_name = Some(call.asset_name.clone());
        Ok(Some(event))
    }

    fn decode_trigger(
        &self,
        call: &TriggerSmartContract,
        ctx: ContractContext<'_>,
        watched: &HashSet<String>,
    ) -> Result<Option<TransferEvent>, DecodeError> {
        let contract_address = to_display_address(&call.contract_address);
        let is_stablecoin = contract_address == self.stablecoin.contract_address;

        if is_stablecoin && !self.stablecoin.enable_monitoring {
            tracing::trace!(tx = %ctx.tx.id, "Stablecoin monitoring disabled, skipping");
            return Ok(None);
        }

        let Some((account, raw_amount)) = parse_transfer_call(&call.data)? else {
            return Ok(None);
        };

        let source = to_display_address(&call.owner_address);
        let destination = address_from_account(&account);

        if !touches(watched, &source, &destination) {
            return Ok(None);
        }

        let (token_type, amount, usd_value) = if is_stablecoin {
            let amount = scale_amount(raw_amount, self.stablecoin.decimals)?;
            (TokenType::TrackedStablecoin, amount.clone(), Some(amount))
        } else {
            let amount = BigDecimal::from_str(&raw_amount.to_string())
                .map_err(|e| DecodeError::InvalidAmount(e.to_string()))?;
            (TokenType::ContractToken, amount, None)
        };

        tracing::debug!(
            from = %source,
            to = %destination,
            amount = %amount,
            contract = %contract_address,
            token_type = token_type.as_str(),
            tx = %ctx.tx.id,
            "TRC20 transfer"
        );

        let mut event = new_event(ctx, token_type, source, destination, amount);
        event.contract_address = Some(contract_address);
        event.is_tracked_stablecoin = is_stablecoin;
        event.usd_value = usd_value;
        Ok(Some(event))
    }
}

/// Split `transfer(address,uint256)` call data into the 20-byte recipient
/// account and the raw amount.
///
/// Anything that is not such a call, including data too short to hold both
/// arguments, is `Ok(None)`.
pub fn parse_transfer_call(data: &str) -> Result<Option<([u8; 20], U256)>, DecodeError> {
    let data = data.strip_prefix("0x").unwrap_or(data);
    let selector = hex::encode(transferCall::SELECTOR);

    let prefix_matches = data
        .get(..selector.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(&selector));
    if data.len() < TRANSFER_CALL_HEX_LEN || !prefix_matches {
        return Ok(None);
    }

    let args = data
        .get(selector.len()..TRANSFER_CALL_HEX_LEN)
        .ok_or_else(|| DecodeError::InvalidHex {
            field: "data",
            details: "non-ASCII call data".to_string(),
        })?;
    let bytes = hex::decode(args).map_err(|e| DecodeError::InvalidHex {
        field: "data",
        details: e.to_string(),
    })?;

    let mut account = [0u8; 20];
    account.copy_from_slice(&bytes[12..32]);
    let amount = U256::from_be_slice(&bytes[32..64]);

    Ok(Some((account, amount)))
}

/// `raw / 10^decimals`, exact.
pub fn scale_amount(raw: impl std::fmt::Display, decimals: u32) -> Result<BigDecimal, DecodeError> {
    BigDecimal::from_str(&format!("{}e-{}", raw, decimals))
        .map_err(|e| DecodeError::InvalidAmount(e.to_string()))
}

fn touches(watched: &HashSet<String>, source: &str, destination: &str) -> bool {
    watched.contains(source) || watched.contains(destination)
}

fn new_event(
    ctx: ContractContext<'_>,
    token_type: TokenType,
    source: String,
    destination: String,
    amount: BigDecimal,
) -> TransferEvent {
    TransferEvent {
        source,
        destination,
        amount,
        fee: BigDecimal::from(0),
        tx_hash: ctx.tx.id.clone(),
        contract_index: ctx.index,
        block_height: ctx.block.height,
        timestamp_ms: ctx.block.timestamp,
        token_type,
        contract_address: None,
        asset_name: None,
        is_tracked_stablecoin: false,
        usd_value: None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::indexer::params::ContractParams;
    use serde_json::json;

    pub const ALICE_HEX: &str = "411111111111111111111111111111111111111111";
    pub const ALICE: &str = "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV";
    pub const BOB_HEX: &str = "412222222222222222222222222222222222222222";
    pub const BOB: &str = "TD5gsCwxykWsLN9aPrq2TAfNjByuZKYp4E";
    pub const CAROL_HEX: &str = "413333333333333333333333333333333333333333";
    pub const USDT_HEX: &str = "41a614f803b6fd780986a42c78ec9c7f77e6ded13c";
    pub const USDT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    pub fn native(owner: &str, to: &str, amount: u64) -> Contract {
        Contract {
            kind: ContractKind::NativeTransfer,
            parameters: ContractParams::new(json!({
                "value": { "owner_address": owner, "to_address": to, "amount": amount }
            })),
        }
    }

    pub fn asset(owner: &str, to: &str, amount: u64) -> Contract {
        Contract {
            kind: ContractKind::AssetTransfer,
            parameters: ContractParams::new(json!({
                "value": {
                    "owner_address": owner,
                    "to_address": to,
                    "amount": amount,
                    "asset_name": "31303030303031"
                }
            })),
        }
    }

    pub fn trigger(owner: &str, contract: &str, data: &str) -> Contract {
        Contract {
            kind: ContractKind::SmartContractTrigger,
            parameters: ContractParams::new(json!({
                "value": {
                    "owner_address": owner,
                    "contract_address": contract,
                    "data": data
                }
            })),
        }
    }

    /// `transfer(to, amount)` call data with `to` given as a 20-byte hex account.
    pub fn transfer_data(to_account_hex: &str, amount: u64) -> String {
        format!("a9059cbb{:0>64}{:064x}", to_account_hex, amount)
    }

    pub fn block(height: i64, transactions: Vec<Transaction>) -> BlockEnvelope {
        BlockEnvelope {
            height,
            hash: format!("{:064x}", height),
            timestamp: 1_700_000_000_000,
            transactions,
        }
    }

    fn decoder() -> TransferDecoder {
        TransferDecoder::new(StablecoinConfig::default(), false)
    }

    fn decode_one(
        decoder: &TransferDecoder,
        contract: Contract,
        watched: &[&str],
    ) -> Result<Option<TransferEvent>, DecodeError> {
        let tx = Transaction {
            id: "ab".repeat(32),
            contracts: vec![contract.clone()],
        };
        let block = block(100, vec![tx.clone()]);
        let watched: HashSet<String> = watched.iter().map(|s| s.to_string()).collect();
        let ctx = ContractContext {
            block: &block,
            tx: &tx,
            index: 0,
        };
        decoder.decode(&contract, ctx, &watched)
    }

    #[test]
    fn test_selector_matches_abi() {
        assert_eq!(hex::encode(transferCall::SELECTOR), "a9059cbb");
    }

    #[test]
    fn test_native_transfer_scaling() {
        for raw in [0u64, 1, 999_999, 5_000_000, 123_456_789, u64::MAX] {
            let event = decode_one(&decoder(), native(ALICE_HEX, BOB_HEX, raw), &[])
                .unwrap()
                .unwrap();
            let expected = BigDecimal::from(raw) / BigDecimal::from(1_000_000u64);
            assert_eq!(event.amount, expected, "raw amount {}", raw);
        }

        let event = decode_one(&decoder(), native(ALICE_HEX, BOB_HEX, 5_000_000), &[])
            .unwrap()
            .unwrap();
        assert_eq!(event.amount, BigDecimal::from_str("5.0").unwrap());
        assert_eq!(event.token_type, TokenType::Native);
        assert_eq!(event.source, ALICE);
        assert_eq!(event.destination, BOB);
        assert_eq!(event.fee, BigDecimal::from(0));
        assert_eq!(event.block_height, 100);
        assert!(!event.is_tracked_stablecoin);
    }

    #[test]
    fn test_native_filter_is_configurable() {
        // Unfiltered by default
        assert!(decode_one(&decoder(), native(ALICE_HEX, BOB_HEX, 1), &[])
            .unwrap()
            .is_some());

        let filtering = TransferDecoder::new(StablecoinConfig::default(), true);
        assert!(decode_one(&filtering, native(ALICE_HEX, BOB_HEX, 1), &[])
            .unwrap()
            .is_none());
        assert!(decode_one(&filtering, native(ALICE_HEX, BOB_HEX, 1), &[BOB])
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_asset_transfer_requires_watched_endpoint() {
        assert!(decode_one(&decoder(), asset(ALICE_HEX, BOB_HEX, 42), &[])
            .unwrap()
            .is_none());

        let event = decode_one(&decoder(), asset(ALICE_HEX, BOB_HEX, 42), &[ALICE])
            .unwrap()
            .unwrap();
        assert_eq!(event.token_type, TokenType::FirstClassToken);
        assert_eq!(event.amount, BigDecimal::from(42));
        assert_eq!(event.asset_name.as_deref(), Some("31303030303031"));
    }

    #[test]
    fn test_trc20_transfer() {
        let data = transfer_data(&BOB_HEX[2..], 7_000);
        let event = decode_one(&decoder(), trigger(ALICE_HEX, CAROL_HEX, &data), &[BOB])
            .unwrap()
            .unwrap();

        assert_eq!(event.token_type, TokenType::ContractToken);
        assert_eq!(event.destination, BOB);
        assert_eq!(event.amount, BigDecimal::from(7_000));
        assert_eq!(
            event.contract_address.as_deref(),
            Some("TEdvoHEatmDKvTh3o9vBRB9Vdtbhn4QFhy")
        );
        assert!(event.usd_value.is_none());

        // Neither endpoint watched
        assert!(decode_one(&decoder(), trigger(ALICE_HEX, CAROL_HEX, &data), &[])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_tracked_stablecoin_is_scaled() {
        let data = transfer_data(&BOB_HEX[2..], 12_345_678);
        let event = decode_one(&decoder(), trigger(ALICE_HEX, USDT_HEX, &data), &[ALICE])
            .unwrap()
            .unwrap();

        assert_eq!(event.token_type, TokenType::TrackedStablecoin);
        assert!(event.is_tracked_stablecoin);
        assert_eq!(event.amount, BigDecimal::from_str("12.345678").unwrap());
        assert_eq!(event.usd_value, Some(event.amount.clone()));
        assert_eq!(event.contract_address.as_deref(), Some(USDT));
    }

    #[test]
    fn test_disabled_stablecoin_is_skipped() {
        let stablecoin = StablecoinConfig {
            enable_monitoring: false,
            ..StablecoinConfig::default()
        };
        let decoder = TransferDecoder::new(stablecoin, false);
        let data = transfer_data(&BOB_HEX[2..], 1);
        assert!(decode_one(&decoder, trigger(ALICE_HEX, USDT_HEX, &data), &[ALICE, BOB])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unrecognized_call_data_yields_nothing() {
        let full = transfer_data(&BOB_HEX[2..], 1);
        let cases = [
            String::new(),
            full[..73].to_string(),
            full[..135].to_string(),
            format!("095ea7b3{}", &full[8..]), // approve(address,uint256)
            "a9059cbb".to_string(),
            "é".repeat(70),
        ];
        for data in cases {
            let result = decode_one(&decoder(), trigger(ALICE_HEX, CAROL_HEX, &data), &[ALICE, BOB]);
            assert!(matches!(result, Ok(None)), "data {:?}", data);
        }
    }

    #[test]
    fn test_dirty_address_word_is_truncated() {
        let data = format!("a9059cbb{}{}{:064x}", "ff".repeat(12), &BOB_HEX[2..], 1u64);
        let (account, amount) = parse_transfer_call(&data).unwrap().unwrap();
        assert_eq!(account, [0x22; 20]);
        assert_eq!(amount, U256::from(1u64));
    }

    #[test]
    fn test_full_width_amount() {
        let data = format!("a9059cbb{:0>64}{}", &BOB_HEX[2..], "f".repeat(64));
        let (_, amount) = parse_transfer_call(&data).unwrap().unwrap();
        assert_eq!(amount, U256::MAX);
    }

    #[test]
    fn test_bad_hex_in_arguments_is_an_error() {
        let data = format!("a9059cbb{}", "zz".repeat(64));
        assert!(matches!(
            parse_transfer_call(&data),
            Err(DecodeError::InvalidHex { field: "data", .. })
        ));
    }

    #[test]
    fn test_malformed_parameters_are_typed_errors() {
        let contract = Contract {
            kind: ContractKind::NativeTransfer,
            parameters: ContractParams::new(json!({
                "value": { "owner_address": ALICE_HEX, "amount": 1 }
            })),
        };
        assert!(matches!(
            decode_one(&decoder(), contract, &[]),
            Err(DecodeError::MissingField("to_address"))
        ));

        let contract = Contract {
            kind: ContractKind::AssetTransfer,
            parameters: ContractParams::new(json!({
                "value": {
                    "owner_address": ALICE_HEX,
                    "to_address": BOB_HEX,
                    "amount": "lots",
                    "asset_name": "x"
                }
            })),
        };
        assert!(matches!(
            decode_one(&decoder(), contract, &[ALICE]),
            Err(DecodeError::WrongType { field: "amount", .. })
        ));
    }

    #[test]
    fn test_other_contract_kinds_are_ignored() {
        let contract = Contract {
            kind: ContractKind::Other("VoteWitnessContract".to_string()),
            parameters: ContractParams::new(json!({})),
        };
        assert!(decode_one(&decoder(), contract, &[]).unwrap().is_none());
    }
}
