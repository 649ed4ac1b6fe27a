//! Reading and writing network descriptions.
//!
//! The text format is brace-delimited with `%` line comments:
//!
//! ```text
//! BeliefNetwork sprinkler {
//!     Variable rain {
//!         type discrete { "no" "yes" }
//!         distribution Discrete { probabilities { 0.8 0.2 } }
//!     }
//!     Variable wet {
//!         type discrete
//!         parents { rain }          % or host:port/network.variable
//!         distribution ConditionalDiscrete {
//!             parent-cardinalities { 2 }
//!             cardinality 2
//!             probabilities { 0.9 0.1 0.2 0.8 }
//!         }
//!     }
//! }
//! ```
//!
//! [`format_network`] always writes the canonical form, which [`parse_network`] reads back to
//! an equal [`NetworkDescription`]. Parse errors carry the 1-based line number.
//!
//! # Module Organization
//!
//! - `lexer`: tokens and a line-aware token cursor
//! - `text`: the description types, parser and formatter
//! - `dot`: Graphviz export of a live network

mod dot;
mod lexer;
mod text;


pub use dot::dot_format;
pub use text::{format_network, parse_network, NetworkDescription, VariableDescription};
