/*!
# Signed RPC

A websocket RPC transport and router for payment channel nodes. Every
request and every response carries secp256k1 signatures over its payload,
so both ends can tell who said what without trusting the socket.

The node side accepts websocket connections, routes each request through a
chain of middleware and a handler, signs the answer and keeps track of
which connections belong to which logged-in user so it can push events to
them. The client side dials a node, makes typed calls and dispatches the
events it receives.

# Usage

```bash
signed_rpc --config config --key 0x<hex private key>
rpccli --url ws://127.0.0.1:8000/ws ping
```

*/
pub mod config;
pub mod crypto;
pub mod error;
pub mod keypair;
pub mod networking;
pub mod runtime;
pub mod time;

#[cfg(test)]
pub mod test_utilities;

pub use error::RpcError;

pub type Result<T> = std::result::Result<T, RpcError>;
