use clap::{App, Arg};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, Settings};
use crate::error::RpcError;
use crate::keypair::Keypair;
use crate::networking::filters::ws_upgrade_route_filter;
use crate::networking::handlers::register_handlers;
use crate::networking::router::{Node, Router};
use crate::networking::signals::signal_for_shutdown;

///
/// The entry point to the node runtime
///
pub async fn run() -> crate::Result<()> {
    //
    // handle command-line arguments
    //
    let matches = App::new("Signed RPC Node")
        .about("Runs a signed websocket RPC node")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("config file name"),
        )
        .arg(
            Arg::with_name("key")
                .short("k")
                .long("key")
                .takes_value(true)
                .help("hex encoded private key, overrides node.private_key"),
        )
        .get_matches();

    let config_name = matches.value_of("config").unwrap_or("config");
    let settings = Settings::load(config_name)?;

    //
    // load or generate the node key
    //
    let private_key = matches
        .value_of("key")
        .map(String::from)
        .or_else(|| settings.node.private_key.clone());
    let keypair = match private_key {
        Some(private_key) => Keypair::from_secret_hex(&private_key)?,
        None => {
            warn!("no private key configured, using a throwaway key");
            Keypair::new()
        }
    };
    info!(address = %keypair.address(), "node key loaded");

    let node = build_node(Arc::new(keypair), settings.connection_config());
    let addr = SocketAddr::from((settings.rpc.host, settings.rpc.port));
    let path = upgrade_path(&settings.rpc.path)?;

    let shutdown = node.shutdown_token().clone();
    let (addr, server) = warp::serve(ws_upgrade_route_filter(node, path.clone()))
        .try_bind_with_graceful_shutdown(addr, async move {
            signal_for_shutdown().await;
            info!("shutting down");
            shutdown.cancel();
        })?;
    info!("listening on ws://{}/{}", addr, path);
    server.await;
    Ok(())
}

///
/// Router with the built-in methods and logging hooks, frozen into a node.
///
pub fn build_node(keypair: Arc<Keypair>, config: ConnectionConfig) -> Arc<Node> {
    let mut router = Router::new(keypair, config);
    router.on_connect(|send| {
        debug!(connection_id = %send.connection_id(), "client connected");
    });
    router.on_authenticated(|user_id, send| {
        info!(%user_id, connection_id = %send.connection_id(), "client logged in");
    });
    router.on_disconnect(|user_id, err| match err {
        Some(err) => warn!(%user_id, "client dropped: {}", err),
        None => debug!(%user_id, "client disconnected"),
    });
    register_handlers(&mut router);
    router.build()
}

/// Websocket path without its slashes; must be a single segment.
pub fn upgrade_path(path: &str) -> crate::Result<String> {
    let path = path.trim_matches('/');
    if path.is_empty() || path.contains('/') {
        return Err(RpcError::Config(format!(
            "rpc.path must be a single path segment, got {:?}",
            path
        )));
    }
    Ok(path.to_string())
}
