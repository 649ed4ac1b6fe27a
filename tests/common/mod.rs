//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use beliefnet_core::distribution::Distribution;
use std::path::{Path, PathBuf};

/// Two binary variables: `rain` and `wet` given `rain`.
#[allow(dead_code)]
pub const SPRINKLER: &str = r#"
BeliefNetwork sprinkler {
    Variable rain {
        type discrete { "no" "yes" }
        distribution Discrete { probabilities { 0.8 0.2 } }
    }
    Variable wet {
        type discrete { "no" "yes" }
        parents { rain }
        distribution ConditionalDiscrete {
            parent-cardinalities { 2 }
            cardinality 2
            probabilities { 0.9 0.1 0.2 0.8 }
        }
    }
}
"#;

/// `x ~ N(0, 1)`, `y = x + N(0, 1)`.
#[allow(dead_code)]
pub const GAUSSIAN_CHAIN: &str = r#"
BeliefNetwork chain {
    Variable x {
        type continuous
        distribution Gaussian { mean 0 std-deviation 1 }
    }
    Variable y {
        type continuous
        parents { x }
        distribution LinearGaussian { weights { 1 } offset 0 std-deviation 1 }
    }
}
"#;

/// Write `text` as `<dir>/<name>.bnet` and return the path.
#[allow(dead_code)]
pub fn write_network(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(format!("{name}.bnet"));
    std::fs::write(&path, text).unwrap();
    path
}

#[allow(dead_code)]
pub fn probabilities(distribution: &Distribution) -> Vec<f64> {
    match distribution {
        Distribution::Discrete(d) => d.probabilities().to_vec(),
        other => panic!("expected a discrete distribution, got {other}"),
    }
}
