use std::{
    collections::HashSet,
    fmt::{self, Display},
};

/// Handle to a node stored in a [`Graph`].
///
/// Ids are only meaningful for the graph that issued them. Once the graph is rewound past a node,
/// its id is stale and any access through it panics, even if the slot has been reused since.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

/// The operation that produced a node, together with the operands it read.
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Op {
    Leaf,
    Add { lhs: NodeId, rhs: NodeId },
    Mul { lhs: NodeId, rhs: NodeId },
    Powf { base: NodeId, exp: f64 },
    Tanh { input: NodeId },
}

impl Op {
    pub fn inputs(&self) -> impl DoubleEndedIterator<Item = NodeId> {
        let ids = match *self {
            Op::Leaf => [None, None],
            Op::Add { lhs, rhs } | Op::Mul { lhs, rhs } => [Some(lhs), Some(rhs)],
            Op::Powf { base, .. } => [Some(base), None],
            Op::Tanh { input } => [Some(input), None],
        };
        ids.into_iter().flatten()
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Leaf => Ok(()),
            Op::Add { .. } => write!(f, "+"),
            Op::Mul { .. } => write!(f, "*"),
            Op::Powf { exp, .. } => write!(f, "^{exp}"),
            Op::Tanh { .. } => write!(f, "tanh"),
        }
    }
}

#[derive(Debug)]
struct Node {
    data: f64,
    /// gradient relative to the root of the last `backward()`
    grad: f64,
    op: Op,
    generation: u32,
}

/// Point in a graph's history that [`Graph::rewind`] can truncate back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    len: usize,
}

/// Arena holding a computation graph of scalar nodes.
///
/// Nodes are appended in creation order and an operation can only reference nodes that already
/// exist, so every operand has a smaller index than its consumer and the graph is a DAG.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    generation: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, data: f64, op: Op) -> NodeId {
        let index = self.nodes.len();
        debug_assert!(op.inputs().all(|input| input.index < index));
        self.nodes.push(Node {
            data,
            grad: 0.0,
            op,
            generation: self.generation,
        });
        NodeId {
            index,
            generation: self.generation,
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        match self.nodes.get(id.index) {
            Some(node) if node.generation == id.generation => node,
            _ => panic!("stale or foreign node id {id:?}"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.nodes.get_mut(id.index) {
            Some(node) if node.generation == id.generation => node,
            _ => panic!("stale or foreign node id {id:?}"),
        }
    }

    pub fn data(&self, id: NodeId) -> f64 {
        self.node(id).data
    }

    pub fn grad(&self, id: NodeId) -> f64 {
        self.node(id).grad
    }

    pub fn op(&self, id: NodeId) -> Op {
        self.node(id).op
    }

    pub fn increase_data(&mut self, id: NodeId, val: f64) {
        self.node_mut(id).data += val;
    }

    pub fn set_grad(&mut self, id: NodeId, val: f64) {
        self.node_mut(id).grad = val;
    }

    fn increase_grad(&mut self, id: NodeId, val: f64) {
        self.node_mut(id).grad += val;
    }

    /// Marks the current end of the arena.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            len: self.nodes.len(),
        }
    }

    /// Drops every node created after `checkpoint`. Ids of the dropped nodes become stale.
    pub fn rewind(&mut self, checkpoint: Checkpoint) {
        if checkpoint.len >= self.nodes.len() {
            return;
        }
        self.nodes.truncate(checkpoint.len);
        self.generation += 1;
    }

    /// Creates a node with no operands: an input, a parameter or a constant.
    pub fn leaf(&mut self, data: f64) -> NodeId {
        self.push(data, Op::Leaf)
    }

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        let data = self.data(lhs) + self.data(rhs);
        self.push(data, Op::Add { lhs, rhs })
    }

    pub fn mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        let data = self.data(lhs) * self.data(rhs);
        self.push(data, Op::Mul { lhs, rhs })
    }

    pub fn neg(&mut self, input: NodeId) -> NodeId {
        let minus_one = self.leaf(-1.0);
        self.mul(input, minus_one)
    }

    pub fn sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        let neg = self.neg(rhs);
        self.add(lhs, neg)
    }

    /// Raises `base` to a constant exponent.
    ///
    /// A negative base with a fractional exponent, or a zero base with `exp < 1`, yields NaN or
    /// infinity here or in the gradient. Nothing in the graph checks for it.
    pub fn powf(&mut self, base: NodeId, exp: f64) -> NodeId {
        let data = self.data(base).powf(exp);
        self.push(data, Op::Powf { base, exp })
    }

    pub fn tanh(&mut self, input: NodeId) -> NodeId {
        let data = self.data(input).tanh();
        self.push(data, Op::Tanh { input })
    }

    /// Adds up `values` onto a fresh `0.0` leaf.
    pub fn sum<I: IntoIterator<Item = NodeId>>(&mut self, values: I) -> NodeId {
        let zero = self.leaf(0.0);
        values
            .into_iter()
            .fold(zero, |acc, value| self.add(acc, value))
    }

    fn propagate(&mut self, id: NodeId) {
        let (out_data, out_grad, op) = {
            let node = self.node(id);
            (node.data, node.grad, node.op)
        };
        match op {
            Op::Leaf => {}
            Op::Add { lhs, rhs } => {
                self.increase_grad(lhs, out_grad);
                self.increase_grad(rhs, out_grad);
            }
            Op::Mul { lhs, rhs } => {
                let (l, r) = (self.data(lhs), self.data(rhs));
                self.increase_grad(lhs, r * out_grad);
                self.increase_grad(rhs, l * out_grad);
            }
            Op::Powf { base, exp } => {
                // y = base^exp
                // dy/dbase = exp * base^(exp-1)
                let local = exp * self.data(base).powf(exp - 1.0);
                self.increase_grad(base, local * out_grad);
            }
            Op::Tanh { input } => {
                // dy/dx = 1 - y^2
                self.increase_grad(input, (1.0 - out_data * out_data) * out_grad);
            }
        }
    }

    /// Post-order of every node reachable from `root`: operands always come before the nodes
    /// that consume them, and `root` comes last.
    pub fn topo(&self, root: NodeId) -> Vec<NodeId> {
        let mut topo = Vec::new();
        let mut visited = HashSet::new();
        // (node, operands already pushed)
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                topo.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            // reversed so that the lhs operand is walked first
            for input in self.op(id).inputs().rev() {
                if !visited.contains(&input) {
                    stack.push((input, false));
                }
            }
        }
        topo
    }

    /// Accumulates d(root)/d(node) into the gradient of every node reachable from `root`.
    ///
    /// Gradients add onto whatever is already stored, so parameters must be zeroed between
    /// passes.
    pub fn backward(&mut self, root: NodeId) {
        // mark the top of the computation graph
        self.set_grad(root, 1.0);
        let topo = self.topo(root);
        log::trace!("backward over {} nodes", topo.len());
        // consumers before producers, so each node has its full gradient when it propagates
        for id in topo.into_iter().rev() {
            self.propagate(id);
        }
    }

    /// Renders the subgraph under `root` as an indented tree.
    ///
    /// Meant for small graphs: a node shared by several consumers is printed once under each of
    /// them, and rendering recurses once per level of depth.
    pub fn display(&self, root: NodeId) -> GraphDisplay<'_> {
        GraphDisplay { graph: self, root }
    }
}

pub struct GraphDisplay<'a> {
    graph: &'a Graph,
    root: NodeId,
}

impl Display for GraphDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn fmt_with_indent(
            graph: &Graph,
            id: NodeId,
            f: &mut fmt::Formatter<'_>,
            indent: usize,
        ) -> fmt::Result {
            for _ in 0..indent {
                write!(f, "    ")?; // four spaces per indent level
            }

            let op = graph.op(id);
            match op {
                Op::Leaf => writeln!(
                    f,
                    "Value(data={:.4}, grad={:.4})",
                    graph.data(id),
                    graph.grad(id)
                )?,
                op => writeln!(
                    f,
                    "Value(data={:.4}, grad={:.4}, op={})",
                    graph.data(id),
                    graph.grad(id),
                    op
                )?,
            }

            match op {
                Op::Add { lhs, rhs } | Op::Mul { lhs, rhs } if lhs == rhs => {
                    fmt_with_indent(graph, lhs, f, indent + 1)?;
                }
                op => {
                    for input in op.inputs() {
                        fmt_with_indent(graph, input, f, indent + 1)?;
                    }
                }
            }

            Ok(())
        }

        fmt_with_indent(self.graph, self.root, f, 0)
    }
}
