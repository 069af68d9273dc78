//! JSON-RPC chain access, event decoding, and smart-contract dispatch.

pub mod abi;
pub mod chain_rpc;
pub mod dispatch;
pub mod rpc;

pub use chain_rpc::JsonRpcChain;
pub use dispatch::{AlloyDispatcher, AlloyDispatcherConfig};
