use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::params::ContractParams;

/// A block as handed from the block source to the workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockEnvelope {
    pub height: i64,
    pub hash: String,
    /// Block time in milliseconds since the epoch.
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub contracts: Vec<Contract>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub kind: ContractKind,
    pub parameters: ContractParams,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContractKind {
    NativeTransfer,
    AssetTransfer,
    SmartContractTrigger,
    Other(String),
}

impl ContractKind {
    /// Map the provider's contract `type` string.
    pub fn from_provider(name: &str) -> Self {
        match name {
            "TransferContract" => Self::NativeTransfer,
            "TransferAssetContract" => Self::AssetTransfer,
            "TriggerSmartContract" => Self::SmartContractTrigger,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TokenType {
    #[serde(rename = "TRX")]
    Native,
    #[serde(rename = "TRC10")]
    FirstClassToken,
    #[serde(rename = "TRC20")]
    ContractToken,
    #[serde(rename = "STABLECOIN")]
    TrackedStablecoin,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Native => "TRX",
            TokenType::FirstClassToken => "TRC10",
            TokenType::ContractToken => "TRC20",
            TokenType::TrackedStablecoin => "STABLECOIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRX" => Some(TokenType::Native),
            "TRC10" => Some(TokenType::FirstClassToken),
            "TRC20" => Some(TokenType::ContractToken),
            "STABLECOIN" => Some(TokenType::TrackedStablecoin),
            _ => None,
        }
    }
}

/// A decoded transfer, ready for storage. `amount` is already in
/// human units for every token type that has a known precision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferEvent {
    pub source: String,
    pub destination: String,
    pub amount: BigDecimal,
    pub fee: BigDecimal,
    pub tx_hash: String,
    pub contract_index: u32,
    pub block_height: i64,
    pub timestamp_ms: i64,
    pub token_type: TokenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_name: Option<String>,
    pub is_tracked_stablecoin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_value: Option<BigDecimal>,
}

/// A registered address and its activity counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchAddress {
    pub address: String,
    pub added_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub transfer_count: i64,
}

impl WatchAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            added_at: Utc::now(),
            last_seen: None,
            transfer_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_kind_from_provider() {
        assert_eq!(
            ContractKind::from_provider("TransferContract"),
            ContractKind::NativeTransfer
        );
        assert_eq!(
            ContractKind::from_provider("TriggerSmartContract"),
            ContractKind::SmartContractTrigger
        );
        assert_eq!(
            ContractKind::from_provider("FreezeBalanceV2Contract"),
            ContractKind::Other("FreezeBalanceV2Contract".to_string())
        );
    }

    #[test]
    fn test_token_type_round_trips_through_str() {
        for token_type in [
            TokenType::Native,
            TokenType::FirstClassToken,
            TokenType::ContractToken,
            TokenType::TrackedStablecoin,
        ] {
            assert_eq!(TokenType::parse(token_type.as_str()), Some(token_type));
        }
        assert_eq!(TokenType::parse("ERC20"), None);
    }
}
