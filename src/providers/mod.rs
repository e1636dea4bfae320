//! Providers Module - external systems
//!
//! Scoring oracle (generative model) and the read-only Stacks ledger client.

pub mod clarity;
pub mod ledger;
pub mod oracle;

pub use clarity::{ClarityValue, PrincipalData};
pub use ledger::LedgerClient;
pub use oracle::{GeminiOracle, ScoringOracle, ScriptedOracle, ScriptedReply};
