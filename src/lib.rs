//! Evidence-based order workflow engine.
//!
//! Turns a buyer/seller negotiation into a traceable transaction record: versioned quotes that
//! lock when both parties agree, a payment ledger reconciled against uploaded proof, a hash
//! chained evidence store, OTP or photo delivery confirmation with a geofence, disputes, and an
//! append-only audit trail from which every order's status can be replayed.
pub mod audit;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod dispute;
pub mod error;
pub mod evidence;
pub mod geo;
pub mod lock;
pub mod order;
pub mod payment;
pub mod quote;
pub mod service;
pub mod store;
pub mod sweep;
pub mod timeline;
pub mod types;
pub mod utils;

pub use service::{Agreement, OrderWorkflowService};
pub use sweep::{SweepReport, Sweeper};
