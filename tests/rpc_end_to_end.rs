use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use signed_rpc::config::{ConnectionConfig, DialerConfig};
use signed_rpc::crypto::{verify_signature, Signer};
use signed_rpc::keypair::Keypair;
use signed_rpc::networking::client::Client;
use signed_rpc::networking::dialer::{Dialer, WebsocketDialer};
use signed_rpc::networking::events::EventKind;
use signed_rpc::networking::filters::ws_upgrade_route_filter;
use signed_rpc::networking::message::Params;
use signed_rpc::networking::router::Node;
use signed_rpc::runtime::build_node;
use signed_rpc::RpcError;

async fn start_node() -> (Arc<Node>, Arc<Keypair>, String) {
    let keypair = Arc::new(Keypair::new());
    let node = build_node(keypair.clone(), ConnectionConfig::default());
    let routes = ws_upgrade_route_filter(node.clone(), String::from("ws"));
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (node, keypair, format!("ws://{}/ws", addr))
}

async fn connect(url: &str, keypair: Arc<Keypair>) -> Client<WebsocketDialer> {
    let dialer = WebsocketDialer::new(DialerConfig::default());
    dialer.dial(url).await.unwrap();
    let signer: Arc<dyn Signer> = keypair;
    Client::new(dialer, vec![signer])
}

async fn wait_for_user(node: &Node, user_id: &str, connections: usize) {
    for _ in 0..100 {
        if node.hub().user_connection_ids(user_id).len() == connections {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never had {} connections", user_id, connections);
}

#[tokio::test]
async fn ping_is_signed_by_node_test() {
    let (_node, node_key, url) = start_node().await;
    let client = connect(&url, Arc::new(Keypair::new())).await;

    let response = client.call("ping", Params::new()).await.unwrap();
    assert_eq!(response.payload.method, "pong");
    assert_eq!(response.signatures.len(), 1);
    assert!(verify_signature(
        &response.payload.to_bytes().unwrap(),
        &response.signatures[0],
        &node_key.address()
    ));
    client.ping().await.unwrap();

    let config = client.get_config().await.unwrap();
    assert_eq!(config.broker_address, node_key.address());
    assert!(config.methods.contains(&String::from("ping")));
}

#[tokio::test]
async fn errors_keep_connection_open_test() {
    let (_node, _, url) = start_node().await;
    let client = connect(&url, Arc::new(Keypair::new())).await;

    assert_eq!(
        client.call("withdraw_everything", Params::new()).await.unwrap_err(),
        RpcError::Remote(String::from("unknown method: withdraw_everything"))
    );
    assert_eq!(
        client.get_session().await.unwrap_err(),
        RpcError::Remote(String::from("authentication required"))
    );
    assert!(client.dialer().is_connected());
    client.ping().await.unwrap();
}

#[tokio::test]
async fn login_and_receive_events_test() {
    let (node, _, url) = start_node().await;
    let user = Arc::new(Keypair::new());
    let client = Arc::new(connect(&url, user.clone()).await);
    let second = connect(&url, user.clone()).await;

    let result = client.login().await.unwrap();
    assert_eq!(result.address, user.address());
    assert!(result.success);
    second.login().await.unwrap();
    wait_for_user(&node, &user.address(), 2).await;

    let session = client.get_session().await.unwrap();
    assert_eq!(session.address, user.address());

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    client.handle_balance_update_event(move |notification, signatures| {
        let _ = events_tx.send((notification, signatures));
    });
    let token = CancellationToken::new();
    let listener = {
        let client = client.clone();
        let token = token.clone();
        tokio::spawn(async move { client.listen_events(&token).await })
    };

    let params = Params::from_value(&json!({
        "balance_updates": [{"asset": "usdc", "amount": "100.5"}]
    }))
    .unwrap();
    node.notify(&user.address(), EventKind::BalanceUpdate.method(), params)
        .await
        .unwrap();

    let (notification, signatures) = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.balance_updates[0].amount, "100.5");
    assert_eq!(signatures.len(), 1);

    // the second connection got its own copy
    let event = tokio::time::timeout(Duration::from_secs(5), second.dialer().next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.payload.request_id, 0);
    assert_eq!(event.payload.method, "bu");
    assert!(verify_signature(
        &event.payload.to_bytes().unwrap(),
        &event.signatures[0],
        &node.address()
    ));

    token.cancel();
    listener.await.unwrap();

    second.dialer().close().await.unwrap();
    wait_for_user(&node, &user.address(), 1).await;
}
