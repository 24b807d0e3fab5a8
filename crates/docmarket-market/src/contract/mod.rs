//! Contract call layer: ABI bindings, transaction plumbing and typed wrappers.

pub mod abi;
pub mod caller;
pub mod registry;
pub mod token;
pub mod units;

pub use caller::{emitted, fetch_receipt, ContractCaller, PendingTx};
pub use registry::{OnchainDocument, RegistryContract};
pub use token::{TokenContract, TokenInfo};
