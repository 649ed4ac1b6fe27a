//! Interpolating cache for expensive one-dimensional functions.
//!
//! Samples are kept in a top-down splay tree keyed by abscissa. A lookup splays the query to
//! the root, takes the neighboring samples on either side, and interpolates linearly between
//! them when they are closer than `close_enough`. Anything else is evaluated and inserted.
//! Samples are never evicted.
use crate::{config::CacheConfig, error::InferenceError};

#[derive(Debug, Clone)]
struct SplayNode {
    key: f64,
    value: f64,
    left: Option<usize>,
    right: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Real evaluations of the wrapped function.
    pub evaluations: usize,
    /// Lookups answered from stored samples (exact or interpolated).
    pub hits: usize,
}

pub struct InterpolatingCache<F> {
    function: F,
    nodes: Vec<SplayNode>,
    root: Option<usize>,
    close_enough: f64,
    error_tolerance: f64,
    stats: CacheStats,
}

impl<F> InterpolatingCache<F>
where
    F: FnMut(f64) -> Result<f64, InferenceError>,
{
    pub fn new(function: F, config: &CacheConfig) -> Result<Self, InferenceError> {
        config.validate()?;
        Ok(InterpolatingCache {
            function,
            nodes: Vec::new(),
            root: None,
            close_enough: config.close_enough,
            error_tolerance: config.error_tolerance,
            stats: CacheStats::default(),
        })
    }

    pub fn with_defaults(function: F) -> Result<Self, InferenceError> {
        InterpolatingCache::new(function, &CacheConfig::default())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn error_tolerance(&self) -> f64 {
        self.error_tolerance
    }

    /// Value at `x`, interpolated when `x` sits in a narrow enough bracket.
    pub fn lookup(&mut self, x: f64) -> Result<f64, InferenceError> {
        if !x.is_finite() {
            return Err(InferenceError::InvalidArgument(format!(
                "cache lookup at non-finite abscissa {x}"
            )));
        }
        let Some(root) = self.root else {
            return self.evaluate_and_insert(x);
        };
        let root = self.splay(root, x);
        self.root = Some(root);

        let root_key = self.nodes[root].key;
        if x == root_key {
            self.stats.hits += 1;
            return Ok(self.nodes[root].value);
        }
        let (a, b) = if x > root_key {
            match self.nodes[root].right {
                None => return self.evaluate_and_insert(x),
                Some(right) => (root, self.min_of(right)),
            }
        } else {
            match self.nodes[root].left {
                None => return self.evaluate_and_insert(x),
                Some(left) => (self.max_of(left), root),
            }
        };

        let (a, b) = (&self.nodes[a], &self.nodes[b]);
        let width = b.key - a.key;
        if width < self.close_enough {
            let t = (x - a.key) / width;
            self.stats.hits += 1;
            tracing::trace!(
                "[InterpolatingCache::lookup] interpolating {} in [{}, {}]",
                x,
                a.key,
                b.key
            );
            return Ok((1.0 - t) * a.value + t * b.value);
        }
        self.evaluate_and_insert(x)
    }

    fn evaluate_and_insert(&mut self, x: f64) -> Result<f64, InferenceError> {
        let value = (self.function)(x)?;
        self.stats.evaluations += 1;
        self.insert(x, value);
        Ok(value)
    }

    fn insert(&mut self, key: f64, value: f64) {
        let index = self.nodes.len();
        let Some(root) = self.root else {
            self.nodes.push(SplayNode {
                key,
                value,
                left: None,
                right: None,
            });
            self.root = Some(index);
            return;
        };
        let root = self.splay(root, key);
        if self.nodes[root].key == key {
            self.nodes[root].value = value;
            self.root = Some(root);
            return;
        }
        let node = if key < self.nodes[root].key {
            let left = self.nodes[root].left.take();
            SplayNode {
                key,
                value,
                left,
                right: Some(root),
            }
        } else {
            let right = self.nodes[root].right.take();
            SplayNode {
                key,
                value,
                left: Some(root),
                right,
            }
        };
        self.nodes.push(node);
        self.root = Some(index);
    }

    fn min_of(&self, mut index: usize) -> usize {
        while let Some(left) = self.nodes[index].left {
            index = left;
        }
        index
    }

    fn max_of(&self, mut index: usize) -> usize {
        while let Some(right) = self.nodes[index].right {
            index = right;
        }
        index
    }

    /// Top-down splay of `key` starting from `t`; returns the new root.
    ///
    /// `left_max`/`right_min` are the attachment points of the left and right assembly
    /// trees; `None` stands for the header.
    fn splay(&mut self, mut t: usize, key: f64) -> usize {
        let mut left_root: Option<usize> = None;
        let mut right_root: Option<usize> = None;
        let mut left_max: Option<usize> = None;
        let mut right_min: Option<usize> = None;

        loop {
            if key < self.nodes[t].key {
                let Some(mut l) = self.nodes[t].left else {
                    break;
                };
                if key < self.nodes[l].key {
                    // rotate right
                    self.nodes[t].left = self.nodes[l].right;
                    self.nodes[l].right = Some(t);
                    t = l;
                    match self.nodes[t].left {
                        Some(next) => l = next,
                        None => break,
                    }
                }
                // link right
                match right_min {
                    Some(r) => self.nodes[r].left = Some(t),
                    None => right_root = Some(t),
                }
                right_min = Some(t);
                t = l;
            } else if key > self.nodes[t].key {
                let Some(mut r) = self.nodes[t].right else {
                    break;
                };
                if key > self.nodes[r].key {
                    // rotate left
                    self.nodes[t].right = self.nodes[r].left;
                    self.nodes[r].left = Some(t);
                    t = r;
                    match self.nodes[t].right {
                        Some(next) => r = next,
                        None => break,
                    }
                }
                // link left
                match left_max {
                    Some(l) => self.nodes[l].right = Some(t),
                    None => left_root = Some(t),
                }
                left_max = Some(t);
                t = r;
            } else {
                break;
            }
        }

        // assemble
        let (t_left, t_right) = (self.nodes[t].left, self.nodes[t].right);
        match left_max {
            Some(l) => self.nodes[l].right = t_left,
            None => left_root = t_left,
        }
        match right_min {
            Some(r) => self.nodes[r].left = t_right,
            None => right_root = t_right,
        }
        self.nodes[t].left = left_root;
        self.nodes[t].right = right_root;
        t
    }
}
