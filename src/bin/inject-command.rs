//! Printago Command Injection Utility
//!
//! Publishes one Printago command envelope to a running bridge and, if asked,
//! prints the response envelopes that come back.
//!
//! ## Usage
//!
//! ```bash
//! # Pause the current print
//! inject-command --type printer_control --action pause_print
//!
//! # Set the bed temperature and wait for the reply
//! inject-command --type temperature_control --action set_bed \
//!   --parameters '{"temperature": 60}' --wait 5
//!
//! # Home X and Y on a remote broker
//! inject-command --broker-url broker.local --type movement_control \
//!   --action home --parameters '{"axes": "x,y"}'
//! ```

use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "inject-command",
    about = "Inject a Printago command into a running bridge",
    long_about = "Publishes one command envelope to the bridge's command topic.\nUseful for manual testing against a dry-run bridge."
)]
struct Args {
    /// Command type (printer_control, temperature_control, movement_control, camera_control)
    #[arg(long = "type", required = true)]
    command_type: String,

    /// Action within the command type
    #[arg(long, required = true)]
    action: String,

    /// Parameters as a JSON object
    #[arg(long, default_value = "{}")]
    parameters: String,

    /// Command topic the bridge subscribes to
    #[arg(long, default_value = "octoprint/commands")]
    topic: String,

    /// Seconds to wait for response envelopes (0 = don't wait)
    #[arg(long, default_value = "0")]
    wait: u64,

    /// MQTT broker URL
    #[arg(long, default_value = "localhost")]
    broker_url: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    broker_port: u16,
}

fn build_command(command_type: &str, action: &str, parameters: Value) -> Value {
    json!({
        "type": command_type,
        "action": action,
        "parameters": parameters,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let parameters: Value = match serde_json::from_str(&args.parameters) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            eprintln!("✗ --parameters must be a JSON object");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("✗ Invalid parameters JSON: {e}");
            std::process::exit(1);
        }
    };

    let client_id = format!("inject-command-{}", Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, &args.broker_url, args.broker_port);
    options.set_keep_alive(Duration::from_secs(60));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    println!("Connecting to MQTT broker {}:{}...", args.broker_url, args.broker_port);

    if args.wait > 0 {
        client.subscribe("octoprint/+", QoS::AtMostOnce).await?;
    }

    let command = build_command(&args.command_type, &args.action, parameters);
    let payload = serde_json::to_string(&command)?;
    client
        .publish(&args.topic, QoS::AtLeastOnce, false, payload)
        .await?;

    println!("\n📤 Injecting command to {}", args.topic);
    println!("   {}::{}", args.command_type, args.action);
    println!("   Parameters: {}", command["parameters"]);

    let wait = Duration::from_secs(args.wait.max(1));
    let _ = timeout(wait, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic == args.topic {
                        continue;
                    }
                    let body = String::from_utf8_lossy(&publish.payload);
                    println!("\n📥 {}", publish.topic);
                    match serde_json::from_str::<Value>(&body) {
                        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default()),
                        Err(_) => println!("{body}"),
                    }
                }
                Ok(Event::Outgoing(rumqttc::Outgoing::Publish(_))) if args.wait == 0 => {
                    println!("✓ Command injected successfully");
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("MQTT eventloop error: {e}");
                    break;
                }
            }
        }
    })
    .await;

    client.disconnect().await.ok();
    sleep(Duration::from_millis(100)).await;
    Ok(())
}
