use std::time::Duration;

use common::alchemy::AlchemyClient;

fn live_client() -> AlchemyClient {
    let key = std::env::var("ALCHEMY_API_KEY").expect("ALCHEMY_API_KEY must be set");
    AlchemyClient::new(
        "https://eth-mainnet.g.alchemy.com/v2",
        &key,
        Duration::from_secs(60),
        100,
    )
    .unwrap()
}

const VITALIK: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";

#[tokio::test]
#[ignore] // requires network and ALCHEMY_API_KEY
async fn test_fetch_real_token_balances() {
    let balances = live_client().fetch_token_balances(VITALIK).await.unwrap();
    assert!(!balances.is_empty());
    assert!(balances.iter().all(|b| b.contract_address.is_some()));
}

#[tokio::test]
#[ignore] // requires network and ALCHEMY_API_KEY; paginates the full history
async fn test_fetch_real_transfers_and_save_fixture() {
    let transfers = live_client().fetch_transfers(VITALIK).await.unwrap();
    assert!(!transfers.is_empty());

    std::fs::create_dir_all("tests/fixtures").unwrap();
    std::fs::write(
        "tests/fixtures/asset_transfers_live.json",
        serde_json::to_string_pretty(&transfers[..transfers.len().min(20)]).unwrap(),
    )
    .unwrap();
}
