//! Scalar reverse-mode autodiff and a tiny tanh MLP built on it.
//!
//! A [`Graph`] is an arena of scalar nodes. Every operation appends a node recording its operands,
//! and [`Graph::backward`] walks the nodes reachable from a root in reverse topological order to
//! accumulate gradients.
//!
//! ```rust
//! use ukiyo_grad::Graph;
//!
//! let mut g = Graph::new();
//! let a = g.leaf(-2.0);
//! let b = g.leaf(3.0);
//! let d = g.mul(a, b);
//! let e = g.add(a, b);
//! let f = g.mul(d, e);
//! g.backward(f);
//!
//! assert_eq!(g.grad(a), -3.0);
//! assert_eq!(g.grad(b), -8.0);
//! ```
//!
//! [`Mlp`] keeps its weights at the front of its own graph and rewinds everything else after each
//! inference or training step.
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//! use ukiyo_grad::{Example, Mlp, TrainConfig};
//!
//! # fn main() -> ukiyo_grad::Result<()> {
//! let mut mlp = Mlp::with_rng(2, &[4, 1], &mut StdRng::seed_from_u64(0))?;
//! let examples = [Example::new([0.5, -0.5], 0.5)];
//! let outcome = mlp.train(&examples, &TrainConfig { max_iterations: 10, ..Default::default() })?;
//! assert!(outcome.iterations() <= 10);
//! let _prediction = mlp.infer(&[0.5, -0.5])?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod nn;
pub mod train;

pub use engine::{Checkpoint, Graph, GraphDisplay, NodeId, Op};
pub use error::{Error, Result};
pub use nn::{Layer, Mlp, Neuron, Parameters};
pub use train::{Example, TrainConfig, TrainOutcome, squared_error};
