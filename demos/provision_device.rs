//! Pair with a peripheral and hand it WiFi credentials
//!
//! Run with: cargo run --example provision_device --features bluez -- <address> <ssid> <psk>

use ble_provisioner::{redact, EngineConfig, Error, PairingEngine, ProvisioningOutcome, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("ble_provisioner=debug")
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [address, ssid, psk] = match <[String; 3]>::try_from(args) {
        Ok(args) => args,
        Err(_) => {
            eprintln!("usage: provision_device <address> <ssid> <psk>");
            return Err(Error::InvalidArguments {
                reason: "expected <address> <ssid> <psk>".to_string(),
            });
        }
    };

    println!("WiFi Provisioning");
    println!("=================\n");

    let engine = PairingEngine::with_bluez(EngineConfig::default()).await?;

    // Answer PIN prompts from stdin
    let mut requests = engine.subscribe_pin_requests();
    let pins = engine.pins().clone();
    let prompter = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(request) = requests.recv().await {
            println!("Enter the PIN shown by {}:", request.address);
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !pins.submit_pin(line.trim()) {
                        println!("PIN request already expired");
                    }
                }
                _ => break,
            }
        }
    });

    println!("Pairing with {}...", address);
    let mut session = engine.connect_and_pair(&address, true).await?;
    prompter.abort();

    println!("Paired. Sending credentials for {} ({})", ssid, redact(&psk));
    let report = session.provision(&ssid, &psk).await?;

    match &report.outcome {
        ProvisioningOutcome::Success => println!("Device joined {}", ssid),
        ProvisioningOutcome::Failure(failure) => println!("Provisioning failed: {}", failure),
        ProvisioningOutcome::TimedOut => println!("Device did not report a result in time"),
    }
    println!(
        "Polls: {}, last status: {:?}, took {} ms",
        report.polls,
        report.last_status,
        (report.finished_at - report.started_at).num_milliseconds()
    );

    session.disconnect().await?;
    report.into_result().map(|_| ())
}
