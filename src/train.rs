use std::fmt::{self, Display};

use crate::{
    engine::{Graph, NodeId},
    error::{Error, Result},
    nn::{Mlp, Parameters},
};

/// One supervised example: an input vector and its scalar target.
#[derive(Clone, Debug, PartialEq)]
pub struct Example {
    pub input: Vec<f64>,
    pub target: f64,
}

impl Example {
    pub fn new(input: impl Into<Vec<f64>>, target: f64) -> Self {
        Self {
            input: input.into(),
            target,
        }
    }
}

/// Gradient-descent settings for [`Mlp::train`].
#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    /// Step size applied to every parameter gradient.
    pub learning_rate: f64,
    /// Training stops once the summed squared error drops below this.
    pub convergence_threshold: f64,
    /// Upper bound on forward/backward/update rounds.
    pub max_iterations: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            convergence_threshold: 1e-5,
            max_iterations: 100_000,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if !self.convergence_threshold.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "convergence threshold must be finite, got {}",
                self.convergence_threshold
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// How a call to [`Mlp::train`] ended.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrainOutcome {
    /// The loss fell below the threshold after `iterations` rounds.
    Converged { iterations: usize, loss: f64 },
    /// `iterations` rounds ran without crossing the threshold.
    Exhausted { iterations: usize, loss: f64 },
}

impl TrainOutcome {
    pub fn converged(&self) -> bool {
        matches!(self, TrainOutcome::Converged { .. })
    }

    pub fn iterations(&self) -> usize {
        match *self {
            TrainOutcome::Converged { iterations, .. }
            | TrainOutcome::Exhausted { iterations, .. } => iterations,
        }
    }

    /// Loss computed in the final round, before its update was applied.
    pub fn loss(&self) -> f64 {
        match *self {
            TrainOutcome::Converged { loss, .. } | TrainOutcome::Exhausted { loss, .. } => loss,
        }
    }

    /// Treats an exhausted run as [`Error::NotConverged`].
    pub fn into_result(self) -> Result<Self> {
        match self {
            TrainOutcome::Exhausted { iterations, loss } => {
                Err(Error::NotConverged { iterations, loss })
            }
            converged => Ok(converged),
        }
    }
}

impl Display for TrainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainOutcome::Converged { iterations, loss } => {
                write!(f, "converged after {iterations} iterations, loss = {loss:.3e}")
            }
            TrainOutcome::Exhausted { iterations, loss } => write!(
                f,
                "did not converge within {iterations} iterations, loss = {loss:.3e}"
            ),
        }
    }
}

/// Sum of squared errors between each prediction and its target, rooted in a single `0.0` leaf.
pub fn squared_error(graph: &mut Graph, predictions: &[NodeId], targets: &[f64]) -> NodeId {
    let errors = predictions
        .iter()
        .zip(targets)
        .map(|(&pred, &target)| {
            let target = graph.leaf(target);
            let diff = graph.sub(pred, target);
            graph.powf(diff, 2.0)
        })
        .collect::<Vec<_>>();
    graph.sum(errors)
}

impl Mlp {
    /// Fits the network to `examples` by full-batch gradient descent on the summed squared error.
    ///
    /// Each round rebuilds the graph for every example, backpropagates the loss, steps every
    /// parameter and then drops the round's graph. Training stops as soon as a round's loss is
    /// below `config.convergence_threshold` or after `config.max_iterations` rounds.
    pub fn train(&mut self, examples: &[Example], config: &TrainConfig) -> Result<TrainOutcome> {
        config.validate()?;
        if self.nout() != 1 {
            return Err(Error::InvalidConfig(format!(
                "training needs a single output, network has {}",
                self.nout()
            )));
        }
        if let Some(bad) = examples.iter().find(|e| e.input.len() != self.nin()) {
            return Err(Error::DimensionMismatch {
                expected: self.nin(),
                actual: bad.input.len(),
            });
        }

        let params = self.parameters();
        let targets = examples.iter().map(|e| e.target).collect::<Vec<_>>();
        // flush gradients a caller may have left behind
        self.reset();
        self.zero_grads();

        let mut loss = f64::NAN;
        for iteration in 1..=config.max_iterations {
            // forward pass
            let mut predictions = Vec::with_capacity(examples.len());
            for example in examples {
                predictions.push(self.forward(&example.input)?[0]);
            }
            let loss_node = squared_error(self.graph_mut(), &predictions, &targets);
            loss = self.graph().data(loss_node);
            if !loss.is_finite() {
                self.reset();
                return Err(Error::NonFiniteLoss { iteration, loss });
            }

            // backward pass
            let graph = self.graph_mut();
            graph.backward(loss_node);

            // update params
            for &p in &params {
                let step = -config.learning_rate * graph.grad(p);
                graph.increase_data(p, step);
                graph.set_grad(p, 0.0);
            }
            self.reset();
            log::trace!("iteration {iteration}: loss = {loss:.6}");

            if loss < config.convergence_threshold {
                log::info!("converged after {iteration} iterations, loss = {loss:.3e}");
                return Ok(TrainOutcome::Converged {
                    iterations: iteration,
                    loss,
                });
            }
        }

        log::warn!(
            "no convergence after {} iterations, loss = {loss:.3e}",
            config.max_iterations
        );
        Ok(TrainOutcome::Exhausted {
            iterations: config.max_iterations,
            loss,
        })
    }
}
