//! # beliefnet-core
//!
//! Distributed belief network inference with Pearl-style pi/lambda message passing.
//!
//! ## Overview
//!
//! A belief network is a directed graph of random variables, each with a conditional
//! distribution given its parents. beliefnet-core computes posteriors by passing **pi**
//! (causal support) messages from parents to children and **lambda** (diagnostic support)
//! messages from children to parents. Networks may reference variables in other networks,
//! including networks published under a different registry location, so one model can be
//! split across many cooperating processes.
//!
//! ### Key Features
//!
//! - **Pull on demand**: posteriors are computed lazily and memoized per variable
//! - **Push invalidation**: evidence changes clear exactly the messages that depended on them
//! - **Type-directed dispatch**: the computation for each combination of distribution kinds is a
//!   registered strategy, resolved at call time
//! - **Loopy networks**: cyclic graphs converge through damped synchronous sweeps
//! - **Fault tolerance**: unreachable peers are retried per a reconnect policy, then dropped
//!   without stopping propagation
//!
//! ## Architecture
//!
//! - **[`context`]**: `Context`, the registry networks are bound in and resolved through
//! - **[`network`]**: `BeliefNetwork`, variables, message computation, peers and transports
//! - **[`strategy`]**: `StrategyRegistry`, type signatures and the built-in strategies
//! - **[`distribution`]**: the `Distribution` union and its kinds
//! - **[`codec`]**: text format and Graphviz export
//! - **[`cache`]**: an interpolating cache for expensive one-dimensional functions
//! - **[`event`]**: change notifications for observers
//! - **[`config`]**: `EngineConfig` and its TOML provider
//!
//! ## Quick Start
//!
//! ```rust
//! use beliefnet_core::{config::EngineConfig, context::Context, distribution::Distribution};
//!
//! # fn main() -> Result<(), beliefnet_core::InferenceError> {
//! let context = Context::new(EngineConfig::default())?;
//! let network = context.parse_network(
//!     r#"
//!     BeliefNetwork sprinkler {
//!         Variable rain {
//!             type discrete { "no" "yes" }
//!             distribution Discrete { probabilities { 0.8 0.2 } }
//!         }
//!         Variable wet {
//!             type discrete { "no" "yes" }
//!             parents { rain }
//!             distribution ConditionalDiscrete {
//!                 parent-cardinalities { 2 }
//!                 cardinality 2
//!                 probabilities { 0.9 0.1 0.2 0.8 }
//!             }
//!         }
//!     }
//!     "#,
//! )?;
//!
//! network.assign_evidence_state("wet", "yes")?;
//! if let Distribution::Discrete(rain) = network.get_posterior("rain")? {
//!     // P(rain | wet) = 0.16 / 0.24
//!     assert!((rain.probabilities()[1] - 2.0 / 3.0).abs() < 1e-9);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **default**: the library
//! - **bin**: the `beliefnet` command line tool

pub mod cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod distribution;
pub mod error;
pub mod event;
pub mod nameinfo;
pub mod network;
pub mod strategy;

pub use error::*;
