//! Demo: wait for an Xcom gateway to connect, then read a value, write a
//! value or scan the bus.
//!
//! Usage:
//!   demo read <nr> <dest> <catalog_240v.json> <catalog_120v.json>
//!   demo write <nr> <dest> <float> <catalog_240v.json> <catalog_120v.json>
//!   demo discover <catalog_240v.json> <catalog_120v.json>
//!
//! The gateway must be configured to connect to this machine on port 4001.

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use voltage_xcom::{
    DeviceSelector, TcpTransport, XcomClient, XcomDataset, XcomDiscover, XcomVoltage,
    DEFAULT_TCP_PORT,
};

/// A destination argument is either a raw bus address or a device code
fn parse_destination(arg: &str) -> DeviceSelector {
    match arg.parse::<u32>() {
        Ok(addr) => DeviceSelector::Address(addr),
        Err(_) => DeviceSelector::Code(arg.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("help");

    match command {
        "read" if args.len() == 5 => {
            let nr: u32 = args[1].parse().context("nr must be a number")?;
            let dataset = load_dataset(&args[3], &args[4]).await?;
            let client = connect().await?;

            let datapoint = dataset.get_by_nr(nr, None)?;
            let value = client.request_value(datapoint, parse_destination(&args[2])).await?;
            println!("{} ({}) = {} {}", datapoint.name, nr, value, datapoint.unit);

            client.close().await?;
        }
        "write" if args.len() == 6 => {
            let nr: u32 = args[1].parse().context("nr must be a number")?;
            let new_value: f32 = args[3].parse().context("value must be a float")?;
            let dataset = load_dataset(&args[4], &args[5]).await?;
            let client = connect().await?;

            let datapoint = dataset.get_by_nr(nr, None)?;
            client
                .update_value(datapoint, new_value, parse_destination(&args[2]))
                .await?;
            println!("{} ({}) set to {}", datapoint.name, nr, new_value);

            client.close().await?;
        }
        "discover" if args.len() == 3 => {
            let dataset = load_dataset(&args[1], &args[2]).await?;
            let client = connect().await?;

            let discover = XcomDiscover::new(&client, &dataset);
            let devices = discover.discover_devices(true).await;

            println!("Found {} device(s):", devices.len());
            for device in devices {
                println!(
                    "  {} at {} ({}, model {:?}, sw {:?})",
                    device.code,
                    device.addr,
                    device.family_model,
                    device.device_model,
                    device.sw_version
                );
            }

            println!("Diagnostics: {:?}", client.diagnostics());
            client.close().await?;
        }
        _ => {
            bail!(
                "usage: demo read <nr> <dest> <240v.json> <120v.json>\n\
                 \x20      demo write <nr> <dest> <value> <240v.json> <120v.json>\n\
                 \x20      demo discover <240v.json> <120v.json>"
            );
        }
    }

    Ok(())
}

async fn load_dataset(path_240v: &str, path_120v: &str) -> Result<XcomDataset> {
    XcomDataset::load(XcomVoltage::Ac240, path_240v, path_120v)
        .await
        .context("failed to load datapoint catalog")
}

async fn connect() -> Result<XcomClient<TcpTransport>> {
    println!("Waiting for the Xcom gateway to connect on port {DEFAULT_TCP_PORT}...");
    let transport = TcpTransport::accept(DEFAULT_TCP_PORT, Duration::from_secs(30)).await?;
    Ok(XcomClient::new(transport))
}
