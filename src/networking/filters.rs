use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

use crate::networking::router::Node;
use crate::networking::transport::split_warp_socket;

/// websocket upgrade filter, served at `/{path}`.
pub fn ws_upgrade_route_filter(
    node: Arc<Node>,
    path: String,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path(path)
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_node(node))
        .and_then(ws_upgrade_handler)
}

async fn ws_upgrade_handler(ws: warp::ws::Ws, node: Arc<Node>) -> Result<impl Reply, Rejection> {
    Ok(ws.on_upgrade(move |socket| {
        let (stream, sink) = split_warp_socket(socket);
        node.handle_socket(stream, sink)
    }))
}

/// inject node
fn with_node(node: Arc<Node>) -> impl Filter<Extract = (Arc<Node>,), Error = Infallible> + Clone {
    warp::any().map(move || node.clone())
}
