//! Example: find events of a contract on a node, either near a known transaction or over the
//! whole history.
//!
//! Usage:
//!   cargo run -p relay-scan --example scan_events -- --url URL --contract 0x... --abi ABI.json \
//!     --event NAME [--block N --tx 0xHASH] [--config scan.json] [--auto-reconnect]

use anyhow::{Context, Result};
use relay_scan::abi::{parse_address, parse_tx_hash};
use relay_scan::{
    BlockTag, ContractAbi, EventScanner, RpcCall, ScanConfig, ScanOutcome, TransportOptions,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut url = String::new();
    let mut contract = String::new();
    let mut abi_path = String::new();
    let mut event = String::new();
    let mut block: Option<u64> = None;
    let mut tx: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut auto_reconnect = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--url" => {
                i += 1;
                url = args.get(i).cloned().unwrap_or_default();
            }
            "--contract" => {
                i += 1;
                contract = args.get(i).cloned().unwrap_or_default();
            }
            "--abi" => {
                i += 1;
                abi_path = args.get(i).cloned().unwrap_or_default();
            }
            "--event" => {
                i += 1;
                event = args.get(i).cloned().unwrap_or_default();
            }
            "--block" => {
                i += 1;
                block = args.get(i).and_then(|s| s.parse().ok());
            }
            "--tx" => {
                i += 1;
                tx = args.get(i).cloned();
            }
            "--config" => {
                i += 1;
                config_path = args.get(i).cloned();
            }
            "--auto-reconnect" => auto_reconnect = true,
            _ => {}
        }
        i += 1;
    }
    if url.is_empty() || contract.is_empty() || abi_path.is_empty() || event.is_empty() {
        eprintln!(
            "Usage: scan_events --url URL --contract 0xADDR --abi ABI.json --event NAME \
             [--block N --tx 0xHASH] [--config scan.json] [--auto-reconnect]"
        );
        std::process::exit(1);
    }

    let address = parse_address(&contract)?;
    let abi_text = std::fs::read_to_string(&abi_path).with_context(|| format!("read {abi_path}"))?;
    let abi: serde_json::Value = serde_json::from_str(&abi_text).context("parse ABI")?;
    let contract = ContractAbi::from_json(address, &abi)?;
    if contract.event(&event).is_err() {
        let known: Vec<&str> = contract.events().map(|e| e.name.as_str()).collect();
        anyhow::bail!("event {event:?} not in ABI; known events: {}", known.join(", "));
    }
    let config = match &config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            ScanConfig::from_json_str(&text)?
        }
        None => ScanConfig::default(),
    };
    let options = TransportOptions {
        auto_reconnect,
        ..Default::default()
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let transport = RpcCall::create(&url, options).await?;
        let scanner = EventScanner::new(&transport).config(config).log_prefix("scan_events");
        let tx_hash = tx.as_deref().map(parse_tx_hash).transpose()?;
        let scan = async {
            match (block, tx_hash) {
                (Some(block), Some(tx_hash)) => {
                    scanner.contract_call_events(&contract, &event, block, &tx_hash, &[]).await
                }
                _ => {
                    scanner
                        .past_events_progressive(&contract, &event, BlockTag::Number(0), BlockTag::Latest, &[])
                        .await
                }
            }
        };
        let outcome = tokio::select! {
            outcome = scan => outcome,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupted");
                ScanOutcome::Empty
            }
        };
        transport.disconnect().await;

        match outcome {
            ScanOutcome::Found(events) => {
                for ev in events {
                    println!(
                        "{} block={} tx=0x{} log_index={} topics={} data_len={}",
                        event,
                        ev.block_number,
                        hex::encode(ev.transaction_hash),
                        ev.log_index,
                        ev.topics.len(),
                        ev.data.len()
                    );
                }
            }
            ScanOutcome::Empty => println!("no {event} events found"),
            ScanOutcome::TransportFailure(e) => return Err(e.into()),
        }
        Ok::<_, anyhow::Error>(())
    })
}
