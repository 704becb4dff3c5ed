pub mod aura_rpc; // Aura/Apex RPC client and response classification
pub mod extractor; // Adaptive location of the record array in a payload

pub use aura_rpc::{AuraClient, RpcResponse, RpcTarget, TransportFailure};
pub use extractor::{extract_array, ArrayLocation, Extraction};
