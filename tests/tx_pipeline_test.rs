mod common;

use std::str::FromStr;

use common::{MockRpcServer, TestEnvironment, TEST_MNEMONIC};
use wallet_engine::tx::{HistoryFilter, TxStatus};
use wallet_engine::{Address, FeeSpeed, Network, SeedSource, TransferParams};

const RECIPIENT: &str = "0x3535353535353535353535353535353535353535";

/// A throwaway network entry pointing at the in-process node.
fn local_network(rpc_url: &str) -> Network {
    Network {
        key: "localnet".to_string(),
        name: "Local".to_string(),
        chain_id: 31337,
        rpc_url: rpc_url.to_string(),
        symbol: "ETH".to_string(),
        explorer: None,
        testnet: true,
        custom: true,
    }
}

async fn env_on_local_node() -> anyhow::Result<(TestEnvironment, Address)> {
    let env = TestEnvironment::new()?;
    let node = MockRpcServer::start().await?;
    env.engine.add_network(local_network(&node.url))?;
    env.engine.switch_network("localnet", None).await?;
    let account = env.engine.create_account(
        Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())),
        "Main",
        vec![],
    )?;
    Ok((env, account.address))
}

fn transfer(from: &Address) -> anyhow::Result<TransferParams> {
    Ok(TransferParams {
        from: from.clone(),
        to: Address::from_str(RECIPIENT)?,
        amount: 0.001,
        value_wei: 1_000_000_000_000_000,
        data: Vec::new(),
        token: false,
        speed: FeeSpeed::Normal,
    })
}

#[tokio::test]
async fn wallet_initiated_send_survives_restart() -> anyhow::Result<()> {
    let (env, from) = env_on_local_node().await?;

    let entry = env.engine.send(transfer(&from)?).await?;
    assert_eq!(entry.status, TxStatus::Submitted);
    assert_eq!(entry.network_key, "localnet");

    let reopened = env.reopen()?;
    let persisted = reopened.history().list(&from, &HistoryFilter::default());
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].hash, entry.hash);
    assert_eq!(persisted[0].status, TxStatus::Submitted);
    Ok(())
}

#[tokio::test]
async fn receipt_status_update_survives_restart() -> anyhow::Result<()> {
    let (env, from) = env_on_local_node().await?;

    let entry = env.engine.send(transfer(&from)?).await?;
    let status = env.engine.wait_for_receipt(&from, &entry.hash).await?;
    assert_eq!(status, TxStatus::Confirmed);

    let reopened = env.reopen()?;
    let persisted = reopened.history().list(&from, &HistoryFilter::default());
    assert_eq!(persisted[0].status, TxStatus::Confirmed);
    Ok(())
}
