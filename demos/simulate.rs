//! Loads a configuration document and runs the simulator over the
//! in-memory loopback transport, printing every pushed payload.

use std::path::PathBuf;

use blesim::{DeviceConfiguration, Simulator, transport};
use clap::Parser;

#[derive(Parser)]
struct Args {
    /// Configuration document to load. Must end in .json.
    /// Falls back to the bundled benchtop sensor configuration.
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let args = Args::parse();
    let path = match args.config {
        Some(path) => {
            if path.extension().map(|ext| ext == "json") != Some(true) {
                return Err(format!("not a configuration document: {}", path.display()).into());
            }
            path
        }
        None => PathBuf::from("demos/benchtop_sensor.json"),
    };

    let config = DeviceConfiguration::parse(&std::fs::read(&path)?)?;

    let (adapter, mut central) = transport::loopback();
    let mut simulator = Simulator::new();
    simulator.start(config, adapter).await?;

    // Play the remote central: subscribe to every characteristic
    let service = central.registered_service().unwrap();
    for characteristic in &service.characteristics {
        central.subscribe(characteristic.uuid);
    }

    for _ in 0..10 {
        if let Some((uuid, payload)) = central.next_notification().await {
            let name = service
                .characteristic_by_uuid(uuid)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| uuid.to_string());
            println!("{}: {}", name, String::from_utf8_lossy(&payload));
        }
    }

    simulator.stop().await;

    Ok(())
}
