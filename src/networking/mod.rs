/*!

# Networking Interfaces and Methods

## Introduction

Nodes expose a signed JSON RPC interface over websockets. The same socket
carries request/response pairs started by the client and events pushed by
the node, so a client never has to poll.

Every message is signed. Clients sign requests (one or more signatures),
the node signs every response and every event with its own key, and either
side can recover the signer's address from a signature.

## Payload

The signed unit is a JSON array of exactly four elements:

```text
[request_id, method, params, timestamp]
```

- `request_id`: u64 chosen by the client, echoed in the response. 0 is
  reserved for events.
- `method`: name of the method invoked, or of the reply.
- `params`: JSON object. Keys are sorted so the payload re-encodes to the
  bytes that were signed.
- `timestamp`: milliseconds since the unix epoch when the payload was made.

The `Payload` type carries this data.

## Envelopes

```json
{"req": [17, "ping", {}, 1700000000000], "sig": ["0x..."]}
{"res": [17, "pong", {}, 1700000000003], "sig": ["0x..."]}
```

Signatures are 65 bytes `r || s || v` (recoverable secp256k1 over the
BLAKE3 hash of the payload JSON), hex encoded with a `0x` prefix. An
address is `0x` followed by the hex of the compressed public key.

## Errors

An error response has method `error` and params `{"error": "<message>"}`.
A frame that cannot be decoded is answered with request id 0 and
`invalid message format`; an unregistered method with
`unknown method: <method>`. Neither closes the connection.

## Methods

```text
ping            -> pong
get_config      -> get_config     {broker_address, methods}
auth_request    -> auth_challenge {challenge_message}
auth_verify     -> auth_verify    {address, success}
get_session     -> get_session    {address, scope, authenticated_at, expires_at}
```

`get_session` lives in the `private` group and needs a logged in
connection.

## Login

1. `auth_request {address}`: the node stores a challenge for this
   connection and returns it.
2. `auth_verify {challenge}`: signed by the key behind `address`, within
   60 seconds. On success the connection belongs to `address` and starts
   receiving that user's events.

## Events

Events are responses with request id 0.

```text
bu   balance update
cu   channel update
tr   transfer
asu  app session update
```

*/

pub mod client;
pub mod connection;
pub mod context;
pub mod dialer;
pub mod events;
pub mod filters;
pub mod handlers;
pub mod hub;
pub mod message;
pub mod message_types;
pub mod router;
pub mod signals;
pub mod transport;
