//! Process glue: consumer loops, the outbox flusher, the broker sink
//! boundary, and the fetch-API HTTP routes. The `ledgerd` binary wires
//! these together per process role.

pub mod consumer;
pub mod flusher;
pub mod routes;
pub mod sink;
