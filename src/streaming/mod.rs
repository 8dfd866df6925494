//! Pub/sub transport between the bridge and an external controller
//!
//! - `zmtp`: ZMTP 3.0 greeting and READY handshake
//! - `frame`: ZMTP frame codec on the TCP streams
//! - `endpoint`: endpoint string parsing
//! - `queue`: ingress/egress hand-off queues
//! - `pub_socket` / `sub_socket`: the two socket roles
//! - `relay`: worker threads and lifecycle around both sockets

pub mod endpoint;
pub mod frame;
pub mod pub_socket;
pub mod queue;
pub mod relay;
pub mod sub_socket;
pub mod zmtp;

pub use pub_socket::PubSocket;
pub use queue::MessageQueue;
pub use relay::{Relay, RelayHealth};
pub use sub_socket::{SubInterrupter, SubSocket};
