use ws_gateway::transport::tungstenite::TungsteniteTransport;
use ws_gateway::{GatewayClient, GatewayConfig, GatewayEvent};

fn usage() -> &'static str {
    "basic_connect\n\
  Opens one gateway session and prints every message it receives.\n\
\n\
USAGE:\n\
  cargo run --example basic_connect -- --token <TOKEN> [--url <wss-url>] [--config <json-file>]\n\
\n\
The token can also come from GATEWAY_TOKEN.\n"
}

fn parse_args() -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let mut config = GatewayConfig::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--token" => config.token = args.next().ok_or("--token needs a value")?,
            "--url" => config.url = args.next().ok_or("--url needs a value")?,
            "--config" => {
                let path = args.next().ok_or("--config needs a path")?;
                let token = std::mem::take(&mut config.token);
                config = GatewayConfig::from_json(&std::fs::read_to_string(path)?)?;
                if config.token.is_empty() {
                    config.token = token;
                }
            }
            "-h" | "--help" => {
                print!("{}", usage());
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument {other}\n{}", usage()).into()),
        }
    }
    if config.token.is_empty() {
        config.token = std::env::var("GATEWAY_TOKEN").map_err(|_| usage())?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args()?;
    println!("connecting: {}", config.url);

    let (client, mut events) = GatewayClient::spawn(config, TungsteniteTransport::default())?;
    client.open().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(GatewayEvent::Connected(session)) => {
                    println!("ready: session={} user={}", session.session_id, session.user.id)
                }
                Some(GatewayEvent::MessageReceived(message)) => println!(
                    "[{}] {}: {}",
                    message.channel_id,
                    message.author.as_ref().map(|a| a.username.as_str()).unwrap_or("?"),
                    message.content.as_deref().unwrap_or("")
                ),
                Some(other) => println!("event: {}", other.name()),
                None => break,
            },
        }
    }

    let snapshot = client.snapshot().await?;
    println!(
        "shutting down: state={} close={}",
        snapshot.state.as_str(),
        snapshot.close_code.description()
    );
    client.destroy().await?;
    Ok(())
}
