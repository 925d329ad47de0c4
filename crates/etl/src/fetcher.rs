use std::future::Future;
use std::time::Instant;

use common::alchemy::{AlchemyClient, FetchError};
use common::types::{ApiTokenBalance, ApiTransfer};

/// Source of raw chain data for one wallet.
pub trait ChainDataProvider: Send + Sync {
    /// Complete transfer history, all pages.
    fn fetch_transfers(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Vec<ApiTransfer>, FetchError>> + Send;

    fn fetch_token_balances(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Vec<ApiTokenBalance>, FetchError>> + Send;
}

fn record<T>(endpoint: &'static str, start: Instant, res: &Result<T, FetchError>) {
    let ms = start.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("wallet_health_api_latency_ms", "endpoint" => endpoint).record(ms);
    match res {
        Ok(_) => {
            metrics::counter!("wallet_health_api_requests_total", "endpoint" => endpoint, "status" => "ok").increment(1);
        }
        Err(e) => {
            metrics::counter!("wallet_health_api_requests_total", "endpoint" => endpoint, "status" => "error").increment(1);
            metrics::counter!(
                "wallet_health_api_errors_total",
                "endpoint" => endpoint,
                "kind" => e.kind()
            )
            .increment(1);
        }
    }
}

impl ChainDataProvider for AlchemyClient {
    async fn fetch_transfers(&self, address: &str) -> Result<Vec<ApiTransfer>, FetchError> {
        let start = Instant::now();
        let res = AlchemyClient::fetch_transfers(self, address).await;
        record("asset_transfers", start, &res);
        res
    }

    async fn fetch_token_balances(
        &self,
        address: &str,
    ) -> Result<Vec<ApiTokenBalance>, FetchError> {
        let start = Instant::now();
        let res = AlchemyClient::fetch_token_balances(self, address).await;
        record("token_balances", start, &res);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::time::Duration;

    #[test]
    fn test_failed_fetch_records_error_kind() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        let rt = tokio::runtime::Runtime::new().unwrap();
        metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                let client =
                    AlchemyClient::new("http://127.0.0.1:9", "", Duration::from_secs(1), 10)
                        .unwrap();
                let res = ChainDataProvider::fetch_token_balances(&client, "0xw").await;
                assert!(matches!(res, Err(FetchError::MissingApiKey)));
            });
        });

        let rendered = handle.render();
        assert!(rendered.contains(
            r#"wallet_health_api_errors_total{endpoint="token_balances",kind="config"} 1"#
        ));
    }
}
