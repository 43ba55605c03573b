//! Deferred task graph
//!
//! Operations are recorded as nodes over previously added nodes, so the graph
//! is acyclic by construction. Nothing runs until [`TaskGraph::materialize`],
//! which evaluates only what the requested outputs depend on. Nodes whose
//! dependencies are all available form a wave and run concurrently under the
//! given [`ProcessingMode`]. Intermediate values are dropped as soon as their
//! last consumer has run.

use crate::strategy::{ParallelStrategy, ProcessingMode};
use chronocube_core::{Error, Result};
use std::fmt;
use tracing::{debug, info};

/// Handle to a node in a [`TaskGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type OpFn<V> = Box<dyn Fn(&[&V]) -> Result<V> + Send + Sync>;

enum NodeKind<V> {
    Source(V),
    Op { deps: Vec<NodeId>, op: OpFn<V> },
}

struct Node<V> {
    label: String,
    kind: NodeKind<V>,
}

impl<V> Node<V> {
    fn deps(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Source(_) => &[],
            NodeKind::Op { deps, .. } => deps,
        }
    }
}

/// Arena of deferred computations producing values of type `V`
pub struct TaskGraph<V> {
    nodes: Vec<Node<V>>,
}

impl<V> Default for TaskGraph<V> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<V> fmt::Debug for TaskGraph<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("nodes", &self.nodes.iter().map(|n| n.label.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

impl<V: Send + Sync> TaskGraph<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add an already available value
    pub fn add_source(&mut self, label: impl Into<String>, value: V) -> NodeId {
        self.push(label.into(), NodeKind::Source(value))
    }

    /// Record an operation over existing nodes.
    ///
    /// `op` receives the dependency values in the order given.
    pub fn add_op<F>(&mut self, label: impl Into<String>, deps: &[NodeId], op: F) -> Result<NodeId>
    where
        F: Fn(&[&V]) -> Result<V> + Send + Sync + 'static,
    {
        let label = label.into();
        if let Some(bad) = deps.iter().find(|d| d.0 >= self.nodes.len()) {
            return Err(Error::InvalidParameter {
                name: "deps",
                value: bad.to_string(),
                reason: format!("unknown dependency of '{}'", label),
            });
        }
        Ok(self.push(
            label,
            NodeKind::Op {
                deps: deps.to_vec(),
                op: Box::new(op),
            },
        ))
    }

    fn push(&mut self, label: String, kind: NodeKind<V>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { label, kind });
        id
    }

    /// Evaluate the graph and return the values of `outputs` in order.
    ///
    /// The first failing node aborts the whole run with its error.
    pub fn materialize(self, outputs: &[NodeId], mode: ProcessingMode) -> Result<Vec<V>> {
        let n = self.nodes.len();
        for (i, out) in outputs.iter().enumerate() {
            if out.0 >= n {
                return Err(Error::InvalidParameter {
                    name: "outputs",
                    value: out.to_string(),
                    reason: "unknown node".into(),
                });
            }
            if outputs[..i].contains(out) {
                return Err(Error::InvalidParameter {
                    name: "outputs",
                    value: out.to_string(),
                    reason: "requested twice".into(),
                });
            }
        }

        // Mark everything the outputs depend on
        let mut needed = vec![false; n];
        let mut stack: Vec<usize> = outputs.iter().map(|o| o.0).collect();
        while let Some(i) = stack.pop() {
            if !needed[i] {
                needed[i] = true;
                stack.extend(self.nodes[i].deps().iter().map(|d| d.0));
            }
        }

        // Ids are topologically ordered, so one forward pass assigns levels
        let mut level = vec![0usize; n];
        let mut consumers = vec![0usize; n];
        for i in (0..n).filter(|&i| needed[i]) {
            if let NodeKind::Op { .. } = self.nodes[i].kind {
                level[i] = 1;
            }
            for d in self.nodes[i].deps() {
                level[i] = level[i].max(level[d.0] + 1);
                consumers[d.0] += 1;
            }
        }
        let is_output = {
            let mut v = vec![false; n];
            for o in outputs {
                v[o.0] = true;
            }
            v
        };

        let depth = (0..n).filter(|&i| needed[i]).map(|i| level[i]).max().unwrap_or(0);
        info!(
            nodes = needed.iter().filter(|&&b| b).count(),
            recorded = n,
            waves = depth,
            "materializing task graph"
        );

        let mut values: Vec<Option<V>> = (0..n).map(|_| None).collect();
        let mut ops: Vec<Option<(String, Vec<NodeId>, OpFn<V>)>> = Vec::with_capacity(n);
        for (i, node) in self.nodes.into_iter().enumerate() {
            match node.kind {
                NodeKind::Source(v) => {
                    if needed[i] {
                        values[i] = Some(v);
                    }
                    ops.push(None);
                }
                NodeKind::Op { deps, op } => ops.push(Some((node.label, deps, op))),
            }
        }

        for wave in 1..=depth {
            let members: Vec<usize> = (0..n).filter(|&i| needed[i] && level[i] == wave).collect();
            debug!(wave, size = members.len(), "running wave");

            let results: Vec<Result<V>> = {
                let values = &values;
                let ops = &ops;
                let members = &members;
                mode.par_map(0..members.len(), |k| {
                    let i = members[k];
                    let Some((label, deps, op)) = &ops[i] else {
                        return Err(Error::Algorithm(format!("node #{} has no operation", i)));
                    };
                    let inputs: Vec<&V> = deps
                        .iter()
                        .map(|d| {
                            values[d.0].as_ref().ok_or_else(|| {
                                Error::Algorithm(format!(
                                    "'{}' ran before its input #{}",
                                    label, d.0
                                ))
                            })
                        })
                        .collect::<Result<_>>()?;
                    op(&inputs).map_err(|e| {
                        debug!(node = %label, error = %e, "task failed");
                        e
                    })
                })
            };

            for (k, result) in results.into_iter().enumerate() {
                values[members[k]] = Some(result?);
            }

            // Release inputs nobody else will read
            for &i in &members {
                let deps: Vec<usize> = ops[i]
                    .as_ref()
                    .map(|(_, deps, _)| deps.iter().map(|d| d.0).collect())
                    .unwrap_or_default();
                for d in deps {
                    consumers[d] -= 1;
                    if consumers[d] == 0 && !is_output[d] {
                        values[d] = None;
                    }
                }
            }
        }

        outputs
            .iter()
            .map(|o| {
                values[o.0]
                    .take()
                    .ok_or_else(|| Error::Algorithm(format!("output {} was not computed", o)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_diamond() {
        let mut g: TaskGraph<i64> = TaskGraph::new();
        let a = g.add_source("a", 3);
        let b = g.add_op("double", &[a], |v| Ok(v[0] * 2)).unwrap();
        let c = g.add_op("square", &[a], |v| Ok(v[0] * v[0])).unwrap();
        let d = g.add_op("sum", &[b, c], |v| Ok(v[0] + v[1])).unwrap();

        let out = g.materialize(&[d, b], ProcessingMode::Parallel).unwrap();
        assert_eq!(out, vec![15, 6]);
    }

    #[test]
    fn test_only_needed_nodes_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut g: TaskGraph<i64> = TaskGraph::new();
        let a = g.add_source("a", 1);
        let counter = Arc::clone(&runs);
        let used = g
            .add_op("used", &[a], move |v| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(v[0] + 1)
            })
            .unwrap();
        let counter = Arc::clone(&runs);
        g.add_op("unused", &[a], move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(v[0] - 1)
        })
        .unwrap();

        let out = g.materialize(&[used], ProcessingMode::Sequential).unwrap();
        assert_eq!(out, vec![2]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_op_without_dependencies_runs() {
        let mut g: TaskGraph<i64> = TaskGraph::new();
        let k = g.add_op("constant", &[], |_| Ok(42)).unwrap();
        assert_eq!(g.materialize(&[k], ProcessingMode::Sequential).unwrap(), vec![42]);
    }

    #[test]
    fn test_failure_aborts() {
        let mut g: TaskGraph<i64> = TaskGraph::new();
        let a = g.add_source("a", 1);
        let bad = g
            .add_op("bad", &[a], |_| Err(Error::Algorithm("boom".into())))
            .unwrap();
        let after = g.add_op("after", &[bad], |v| Ok(*v[0])).unwrap();
        let err = g.materialize(&[after], ProcessingMode::Parallel).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut g: TaskGraph<i64> = TaskGraph::new();
        g.add_source("a", 1);
        let mut other: TaskGraph<i64> = TaskGraph::new();
        let x = other.add_source("x", 0);
        let y = other.add_source("y", 0);
        assert!(g.add_op("op", &[x, y], |v| Ok(*v[0])).is_err());
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let mut g: TaskGraph<i64> = TaskGraph::new();
        let a = g.add_source("a", 1);
        assert!(g.materialize(&[a, a], ProcessingMode::Sequential).is_err());
    }
}
