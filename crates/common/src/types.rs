use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Open mapping of named facts emitted by the scorers.
pub type MetricMap = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferCategory {
    External,
    Internal,
    Erc20,
    Erc721,
    Erc1155,
}

impl TransferCategory {
    pub const ALL: [Self; 5] = [
        Self::External,
        Self::Internal,
        Self::Erc20,
        Self::Erc721,
        Self::Erc1155,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Internal => "internal",
            Self::Erc20 => "erc20",
            Self::Erc721 => "erc721",
            Self::Erc1155 => "erc1155",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

/// A value movement into or out of a wallet. Identified by `hash`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub hash: String,
    /// Wallet the transfer was fetched for.
    pub address: String,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub block_number: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// `None` when upstream reports a category we do not model.
    pub category: Option<TransferCategory>,
    pub contract_address: Option<String>,
    pub raw_payload: serde_json::Value,
}

/// A wallet's current balance in one (token, protocol) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub address: String,
    pub token_contract: String,
    /// Token base units.
    pub balance: BigUint,
    pub protocol: Option<String>,
    pub usd_value: Option<f64>,
    pub observed_at: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
}

impl Position {
    pub fn is_active(&self) -> bool {
        self.balance > BigUint::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub activity: f64,
    pub diversification: f64,
    pub risk: f64,
    pub profitability: f64,
    pub stability: f64,
}

impl ScoreComponents {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.activity,
            self.diversification,
            self.risk,
            self.profitability,
            self.stability,
        ]
    }
}

/// One wallet's score for one UTC calendar day. Keyed by (address, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletHealthRecord {
    pub address: String,
    pub date: NaiveDate,
    pub components: ScoreComponents,
    pub total_score: f64,
    pub metrics: MetricMap,
}

/// Wallet identity row with first/last activity watermarks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wallet {
    pub address: String,
    pub chain: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionJob {
    pub id: i64,
    pub address: String,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transfer from `alchemy_getAssetTransfers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiTransfer {
    pub hash: Option<String>,
    #[serde(rename = "blockNum")]
    pub block_num: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Decimal-adjusted amount; upstream sends a number or null.
    #[serde(default)]
    pub value: serde_json::Value,
    pub category: Option<String>,
    #[serde(rename = "rawContract")]
    pub raw_contract: Option<ApiRawContract>,
    pub metadata: Option<ApiTransferMetadata>,
    /// Fields we do not model, kept so the archived payload stays lossless.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiRawContract {
    pub address: Option<String>,
    pub value: Option<String>,
    pub decimal: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiTransferMetadata {
    /// ISO-8601 string in practice; epoch seconds are accepted too.
    #[serde(rename = "blockTimestamp", default)]
    pub block_timestamp: serde_json::Value,
}

/// Token balance from `alchemy_getTokenBalances`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiTokenBalance {
    #[serde(rename = "contractAddress")]
    pub contract_address: Option<String>,
    #[serde(rename = "tokenBalance", default)]
    pub token_balance: serde_json::Value,
    pub error: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
