use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::types::{ApiTokenBalance, ApiTransfer};

const TRANSFER_CATEGORIES: [&str; 5] = ["external", "internal", "erc20", "erc721", "erc1155"];

/// Upstream failure. Never converted into an empty or partial result.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("missing Alchemy API key; set ALCHEMY_API_KEY")]
    MissingApiKey,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("JSON-RPC response for {method} carried no result")]
    MissingResult { method: &'static str },
    #[error("failed to decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Low-cardinality label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "config",
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "http",
            Self::Status { status: 429, .. } => "rate_limited",
            Self::Status { .. } => "status",
            Self::Rpc { .. } => "rpc",
            Self::MissingResult { .. } | Self::Decode(_) => "decode",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AssetTransfersResult {
    #[serde(default)]
    transfers: Vec<ApiTransfer>,
    #[serde(rename = "pageKey")]
    page_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenBalancesResult {
    #[serde(rename = "tokenBalances", default)]
    token_balances: Vec<ApiTokenBalance>,
}

/// Decode a JSON-RPC envelope, surfacing `error` before looking at `result`.
fn decode_rpc<T: DeserializeOwned>(method: &'static str, body: &[u8]) -> Result<T, FetchError> {
    let resp: RpcResponse<T> = serde_json::from_slice(body)?;
    if let Some(err) = resp.error {
        return Err(FetchError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    resp.result.ok_or(FetchError::MissingResult { method })
}

/// Minimal Alchemy JSON-RPC client for asset transfers and token balances.
pub struct AlchemyClient {
    base_url: String,
    api_key: String,
    max_count_per_page: u32,
    client: reqwest::Client,
}

impl AlchemyClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        request_timeout: Duration,
        max_count_per_page: u32,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_count_per_page: max_count_per_page.max(1),
            client,
        })
    }

    pub fn from_config(cfg: &crate::config::Alchemy) -> anyhow::Result<Self> {
        Self::new(
            &cfg.base_url,
            &cfg.api_key,
            Duration::from_secs(cfg.request_timeout_secs),
            cfg.max_count_per_page,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `alchemy_getAssetTransfers` params for one page of a wallet's outgoing transfers.
    pub fn asset_transfers_params(&self, address: &str, page_key: Option<&str>) -> serde_json::Value {
        let mut filter = serde_json::json!({
            "fromBlock": "0x0",
            "toBlock": "latest",
            "fromAddress": address.to_lowercase(),
            "category": TRANSFER_CATEGORIES,
            "withMetadata": true,
            "excludeZeroValue": false,
            "maxCount": format!("{:#x}", self.max_count_per_page),
        });
        if let Some(key) = page_key {
            filter["pageKey"] = serde_json::Value::String(key.to_string());
        }
        serde_json::json!([filter])
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> Result<T, FetchError> {
        if self.api_key.is_empty() {
            return Err(FetchError::MissingApiKey);
        }
        let url = format!("{}/{}", self.base_url, self.api_key);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self.client.post(&url).json(&payload).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).chars().take(512).collect(),
            });
        }
        decode_rpc(method, &body)
    }

    /// Full transfer history for `address`, following `pageKey` until exhausted.
    pub async fn fetch_transfers(&self, address: &str) -> Result<Vec<ApiTransfer>, FetchError> {
        info!(address, "fetching asset transfers");
        let mut all = Vec::new();
        let mut page_key: Option<String> = None;
        let mut pages = 0_u32;

        loop {
            let params = self.asset_transfers_params(address, page_key.as_deref());
            let page: AssetTransfersResult = self.rpc("alchemy_getAssetTransfers", params).await?;
            pages += 1;
            debug!(address, page = pages, count = page.transfers.len(), "transfers page");
            all.extend(page.transfers);

            match page.page_key {
                // A repeated key would loop forever.
                Some(next) if page_key.as_deref() != Some(next.as_str()) => page_key = Some(next),
                _ => break,
            }
        }

        info!(address, count = all.len(), pages, "fetched asset transfers");
        Ok(all)
    }

    pub async fn fetch_token_balances(
        &self,
        address: &str,
    ) -> Result<Vec<ApiTokenBalance>, FetchError> {
        info!(address, "fetching token balances");
        let params = serde_json::json!([address.to_lowercase(), "erc20"]);
        let result: TokenBalancesResult = self.rpc("alchemy_getTokenBalances", params).await?;
        info!(address, count = result.token_balances.len(), "fetched token balances");
        Ok(result.token_balances)
    }
}
