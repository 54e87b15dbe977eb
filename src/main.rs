/*!
# Signed RPC Node

## Help

```bash
signed_rpc --help
```

## Example Usage

```bash
signed_rpc --config config
SIGNED_RPC_RPC__PORT=9000 signed_rpc --key 0x<hex private key>
```
*/

use signed_rpc::runtime;

#[tokio::main]
pub async fn main() -> signed_rpc::Result<()> {
    tracing_subscriber::fmt::init();
    runtime::run().await
}
