//! Deterministic simulation harness for the ephemeral device key lifecycle.
//!
//! In-memory implementations of every collaborator: a seeded environment
//! with a settable clock, a Merkle log whose roots the test controls, and a
//! server directory with injectable faults. [`SimWorld`] wires them together
//! for one user with several devices.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_directory;
pub mod sim_env;
pub mod sim_merkle;
pub mod world;

pub use sim_directory::{DirectoryFault, SimDirectory};
pub use sim_env::SimEnv;
pub use sim_merkle::SimMerkleLog;
pub use world::{SimDevice, SimFetcher, SimPublisher, SimWorld};
