//! xDLMS application layer PDUs
//!
//! Encoders and decoders for the confirmed services a client drives:
//! initiate, get, set and action, including the block-transfer variants.
//! All payloads are A-XDR.

pub mod action;
pub mod descriptor;
pub mod get;
pub mod initiate;
pub mod invoke;
pub mod set;

pub use action::{ActionRequestNormal, ActionResponseNormal};
pub use descriptor::{AttributeDescriptor, MethodDescriptor, SelectiveAccess};
pub use get::{GetDataBlock, GetRequest, GetResponse, GetResult};
pub use initiate::{InitiateRequest, InitiateResponse};
pub use invoke::InvokeIdAndPriority;
pub use set::{SetRequest, SetResponse};
