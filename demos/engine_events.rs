//! This example listens for engine events while the simulator runs.

use blesim::{DeviceConfiguration, EngineEvent, Simulator, transport};
use futures::StreamExt;
use tokio::time::{Duration, sleep};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let bytes = std::fs::read("demos/benchtop_sensor.json")?;
    let config = DeviceConfiguration::parse(&bytes)?;

    let (adapter, central) = transport::loopback();

    // Create a new peripheral simulator
    let mut simulator = Simulator::new();

    // Create a stream that is provided with engine events
    let mut event_stream = simulator.event_stream();

    // Read events in a separate task
    let join_handle = tokio::spawn(async move {
        while let Some(event) = event_stream.next().await {
            match event {
                EngineEvent::Started { advertised_name } => {
                    println!("Advertising as {}", advertised_name)
                }
                EngineEvent::Notified { data_key, bytes } => {
                    println!("Pushed {} bytes for {}", bytes, data_key)
                }
                EngineEvent::Subscribed { subscribers, .. } => {
                    println!("Central subscribed ({} total)", subscribers)
                }
                EngineEvent::Stopped => {
                    println!("Simulator stopped");
                    break;
                }
                other => println!("{:?}", other),
            }
        }
    });

    simulator.start(config, adapter).await?;

    let service = central.registered_service().unwrap();
    central.subscribe(service.characteristics[0].uuid);

    sleep(Duration::from_millis(5000)).await;

    simulator.stop().await;

    join_handle.await?;

    Ok(())
}
