/*!
# Signed RPC Command Line Client

Talks to a node over its websocket endpoint.

## Usage

```bash
rpccli help [subcommand]
```

## Available subcommands

**ping**

checks the node answers, and that the answer is signed by the node

**config**

prints the node address and the methods it serves

**auth**

logs in with the given key and prints the session

**listen**

logs in and prints every event the node pushes until Ctrl-C

## Example

```bash
rpccli --url ws://127.0.0.1:8000/ws ping
rpccli --key 0x<hex private key> listen
```
*/
use clap::{App, Arg, SubCommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use signed_rpc::config::Settings;
use signed_rpc::crypto::{verify_signature, Signer};
use signed_rpc::keypair::Keypair;
use signed_rpc::networking::client::Client;
use signed_rpc::networking::dialer::{Dialer, WebsocketDialer};
use signed_rpc::networking::message::Params;
use signed_rpc::networking::signals::signal_for_shutdown;

#[tokio::main]
pub async fn main() -> signed_rpc::Result<()> {
    tracing_subscriber::fmt::init();

    let command_matches = App::new("Signed RPC Command Line Interface")
        .about("Call a signed RPC node from the command line")
        .arg(
            Arg::with_name("url")
                .short("u")
                .long("url")
                .default_value("ws://127.0.0.1:8000/ws")
                .takes_value(true)
                .help("websocket url of the node"),
        )
        .arg(
            Arg::with_name("key")
                .short("k")
                .long("key")
                .takes_value(true)
                .help("hex encoded private key, a throwaway key is used when absent"),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("config file name"),
        )
        .subcommand(SubCommand::with_name("ping").about("ping the node"))
        .subcommand(SubCommand::with_name("config").about("print the node configuration"))
        .subcommand(SubCommand::with_name("auth").about("log in and print the session"))
        .subcommand(SubCommand::with_name("listen").about("log in and print events"))
        .get_matches();

    let settings = Settings::load(command_matches.value_of("config").unwrap_or("config"))?;
    let keypair = match command_matches.value_of("key") {
        Some(key) => Keypair::from_secret_hex(key)?,
        None => Keypair::new(),
    };
    let url = command_matches.value_of("url").unwrap_or("ws://127.0.0.1:8000/ws");

    let dialer = WebsocketDialer::new(settings.dialer_config());
    dialer.dial(url).await?;
    let signer: Arc<dyn Signer> = Arc::new(keypair);
    let client = Client::new(dialer, vec![signer]);

    match command_matches.subcommand_name() {
        Some("ping") => {
            let response = client.call("ping", Params::new()).await?;
            let config = client.get_config().await?;
            let signed_by_node = response.signatures.first().map_or(false, |signature| {
                response
                    .payload
                    .to_bytes()
                    .map(|bytes| verify_signature(&bytes, signature, &config.broker_address))
                    .unwrap_or(false)
            });
            println!("method        : {}", response.payload.method);
            println!("node          : {}", config.broker_address);
            println!("signed by node: {}", signed_by_node);
        }
        Some("config") => {
            let config = client.get_config().await?;
            println!("node   : {}", config.broker_address);
            println!("methods: {}", config.methods.join(", "));
        }
        Some("auth") => {
            let result = client.login().await?;
            let session = client.get_session().await?;
            println!("address      : {}", result.address);
            println!("scope        : {}", session.scope);
            println!("expires at   : {}", session.expires_at);
        }
        Some("listen") => {
            let result = client.login().await?;
            println!("listening as {}", result.address);
            client.handle_balance_update_event(|notification, _| {
                for balance in notification.balance_updates {
                    println!("bu  {} {}", balance.asset, balance.amount);
                }
            });
            client.handle_channel_update_event(|notification, _| {
                println!(
                    "cu  {} {} {}",
                    notification.channel_id, notification.status, notification.amount
                );
            });
            client.handle_transfer_event(|notification, _| {
                for tx in notification.transactions {
                    println!(
                        "tr  {} {} -> {} {} {}",
                        tx.id, tx.from_account, tx.to_account, tx.amount, tx.asset
                    );
                }
            });
            client.handle_app_session_update_event(|notification, _| {
                println!(
                    "asu {} {} v{}",
                    notification.app_session_id, notification.status, notification.version
                );
            });

            let token = CancellationToken::new();
            tokio::select! {
                _ = client.listen_events(&token) => println!("node closed the connection"),
                _ = signal_for_shutdown() => token.cancel(),
            }
        }
        _ => println!("{}", command_matches.usage()),
    }

    client.dialer().close().await?;
    Ok(())
}
