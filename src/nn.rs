use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::{
    engine::{Checkpoint, Graph, NodeId},
    error::{Error, Result},
};

pub trait Parameters {
    fn parameters(&self) -> Vec<NodeId>;
    /// Sets all gradients of the parameters to zero
    fn zero_grad(&self, graph: &mut Graph) {
        self.parameters()
            .into_iter()
            .for_each(|p| graph.set_grad(p, 0.0));
    }
}

#[derive(Debug)]
pub struct Neuron {
    weights: Vec<NodeId>,
    bias: NodeId,
}

impl Neuron {
    /// Creates a new [`Neuron`] with `nin` inputs, its weights and bias allocated as leaves of
    /// `graph` and drawn from `init`.
    pub fn new<R: Rng + ?Sized>(
        graph: &mut Graph,
        nin: usize,
        init: &Uniform<f64>,
        rng: &mut R,
    ) -> Self {
        Self {
            weights: (0..nin).map(|_| graph.leaf(init.sample(rng))).collect(),
            bias: graph.leaf(init.sample(rng)),
        }
    }

    pub fn nin(&self) -> usize {
        self.weights.len()
    }

    /// Returns `tanh(w · x + b)` as a node of `graph`.
    pub fn forward(&self, graph: &mut Graph, inputs: &[NodeId]) -> Result<NodeId> {
        if inputs.len() != self.weights.len() {
            return Err(Error::DimensionMismatch {
                expected: self.weights.len(),
                actual: inputs.len(),
            });
        }
        let products = self
            .weights
            .iter()
            .zip(inputs)
            .map(|(&wi, &xi)| graph.mul(xi, wi))
            .collect::<Vec<_>>();
        let dot = graph.sum(products);
        let raw = graph.add(dot, self.bias);
        // pass through activation function
        Ok(graph.tanh(raw))
    }
}

impl Parameters for Neuron {
    /// Returns the tuneable knobs of the neuron: weights and bias
    fn parameters(&self) -> Vec<NodeId> {
        let mut params = self.weights.clone();
        params.push(self.bias);
        params
    }
}

#[derive(Debug)]
pub struct Layer {
    neurons: Vec<Neuron>,
}

impl Layer {
    /// Creates a new [`Layer`] of `nout` neurons, each with `nin` inputs (dimensionality)
    pub fn new<R: Rng + ?Sized>(
        graph: &mut Graph,
        nin: usize,
        nout: usize,
        init: &Uniform<f64>,
        rng: &mut R,
    ) -> Self {
        Self {
            neurons: (0..nout)
                .map(|_| Neuron::new(graph, nin, init, rng))
                .collect(),
        }
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn forward(&self, graph: &mut Graph, inputs: &[NodeId]) -> Result<Vec<NodeId>> {
        self.neurons
            .iter()
            .map(|n| n.forward(graph, inputs))
            .collect()
    }
}

impl Parameters for Layer {
    /// Returns the parameters of all neurons
    fn parameters(&self) -> Vec<NodeId> {
        self.neurons
            .iter()
            .flat_map(|n| n.parameters().into_iter())
            .collect()
    }
}

/// A tanh multilayer perceptron whose weights live in its own [`Graph`].
///
/// The parameters occupy the front of the arena. Everything a forward pass adds after them is
/// scratch and is dropped by [`Mlp::infer`] and by every training step.
#[derive(Debug)]
pub struct Mlp {
    graph: Graph,
    layers: Vec<Layer>,
    params_end: Checkpoint,
}

impl Mlp {
    /// Creates a new [`Mlp`] with `nin` inputs and `nouts` as the number of neurons in each
    /// subsequent layer, initialised from the thread-local RNG.
    pub fn new(nin: usize, nouts: &[usize]) -> Result<Self> {
        Self::with_rng(nin, nouts, &mut rand::rng())
    }

    /// Like [`Mlp::new`] but draws the initial weights from `rng`.
    ///
    /// Invariant: number of neurons in layer n == input dim of layer n+1
    pub fn with_rng<R: Rng + ?Sized>(nin: usize, nouts: &[usize], rng: &mut R) -> Result<Self> {
        if nin == 0 {
            return Err(Error::InvalidConfig("input width must be positive".into()));
        }
        if nouts.is_empty() {
            return Err(Error::InvalidConfig("at least one layer is required".into()));
        }
        if let Some(i) = nouts.iter().position(|&n| n == 0) {
            return Err(Error::InvalidConfig(format!("layer {i} has no neurons")));
        }

        let init = Uniform::new(-1.0, 1.0)?;
        let sz = std::iter::once(nin)
            .chain(nouts.iter().copied())
            .collect::<Vec<_>>();
        let mut graph = Graph::new();
        let layers = sz
            .windows(2)
            .map(|w| Layer::new(&mut graph, w[0], w[1], &init, rng))
            .collect::<Vec<_>>();
        let params_end = graph.checkpoint();
        log::debug!("built mlp {:?} with {} parameters", sz, graph.len());

        Ok(Self {
            graph,
            layers,
            params_end,
        })
    }

    pub fn nin(&self) -> usize {
        self.layers[0].neurons[0].nin()
    }

    pub fn nout(&self) -> usize {
        self.layers[self.layers.len() - 1].neurons.len()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Builds the graph for one evaluation of `inputs` and returns the output nodes.
    ///
    /// The nodes stay in the graph until the next [`Mlp::reset`], so callers can run
    /// [`Graph::backward`] on anything derived from them.
    pub fn forward(&mut self, inputs: &[f64]) -> Result<Vec<NodeId>> {
        if inputs.len() != self.nin() {
            return Err(Error::DimensionMismatch {
                expected: self.nin(),
                actual: inputs.len(),
            });
        }
        let mut x = inputs
            .iter()
            .map(|&xi| self.graph.leaf(xi))
            .collect::<Vec<_>>();
        for layer in &self.layers {
            x = layer.forward(&mut self.graph, &x)?;
        }
        Ok(x)
    }

    /// Drops every node created after the parameters.
    pub fn reset(&mut self) {
        self.graph.rewind(self.params_end);
    }

    pub fn infer(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        let outputs = self.forward(input);
        let values = outputs.map(|ys| ys.into_iter().map(|y| self.graph.data(y)).collect());
        self.reset();
        values
    }

    /// Zeroes the gradient of every weight and bias.
    pub fn zero_grads(&mut self) {
        for layer in &self.layers {
            layer.zero_grad(&mut self.graph);
        }
    }

    /// Current values of all parameters, in [`Parameters::parameters`] order.
    pub fn parameter_values(&self) -> Vec<f64> {
        self.parameters()
            .into_iter()
            .map(|p| self.graph.data(p))
            .collect()
    }
}

impl Parameters for Mlp {
    /// Returns the parameters of all layers
    fn parameters(&self) -> Vec<NodeId> {
        self.layers
            .iter()
            .flat_map(|l| l.parameters().into_iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn seeded(nin: usize, nouts: &[usize]) -> Mlp {
        Mlp::with_rng(nin, nouts, &mut StdRng::seed_from_u64(7)).unwrap()
    }

    #[test]
    fn test_parameter_count_and_shape() {
        let mlp = seeded(3, &[4, 4, 1]);

        assert_eq!(mlp.nin(), 3);
        assert_eq!(mlp.nout(), 1);
        assert_eq!(mlp.layers().len(), 3);
        assert_eq!(mlp.layers()[1].neurons()[0].nin(), 4);
        // (3 + 1) * 4 + (4 + 1) * 4 + (4 + 1) * 1
        assert_eq!(mlp.parameters().len(), 41);
        assert_eq!(mlp.graph().len(), 41);
    }

    #[test]
    fn test_weights_are_in_unit_range() {
        let mlp = seeded(5, &[8, 3]);
        assert!(
            mlp.parameter_values()
                .iter()
                .all(|v| (-1.0..1.0).contains(v))
        );
    }

    #[test]
    fn test_same_seed_same_network() {
        let a = seeded(2, &[3, 1]);
        let b = seeded(2, &[3, 1]);
        assert_eq!(a.parameter_values(), b.parameter_values());
    }

    #[test]
    fn test_neuron_parameters_order() {
        let mut graph = Graph::new();
        let init = Uniform::new(-1.0, 1.0).unwrap();
        let neuron = Neuron::new(&mut graph, 2, &init, &mut StdRng::seed_from_u64(1));
        let params = neuron.parameters();

        assert_eq!(params.len(), 3);
        assert_eq!(params[..2], neuron.weights[..]);
        assert_eq!(params[2], neuron.bias);
    }

    #[test]
    fn test_layer_parameters_follow_neuron_order() {
        let mut graph = Graph::new();
        let init = Uniform::new(-1.0, 1.0).unwrap();
        let layer = Layer::new(&mut graph, 2, 3, &init, &mut StdRng::seed_from_u64(1));
        let expected = layer
            .neurons()
            .iter()
            .flat_map(|n| n.parameters())
            .collect::<Vec<_>>();

        assert_eq!(layer.parameters(), expected);
        assert_eq!(layer.parameters().len(), 9);
    }

    #[test]
    fn test_neuron_forward_matches_closed_form() {
        let mut graph = Graph::new();
        let init = Uniform::new(-1.0, 1.0).unwrap();
        let neuron = Neuron::new(&mut graph, 2, &init, &mut StdRng::seed_from_u64(3));
        let x = [graph.leaf(0.5), graph.leaf(-2.0)];
        let out = neuron.forward(&mut graph, &x).unwrap();

        let w = neuron
            .weights
            .iter()
            .map(|&w| graph.data(w))
            .collect::<Vec<_>>();
        let b = graph.data(neuron.bias);
        let expected = (0.5 * w[0] - 2.0 * w[1] + b).tanh();
        assert!((graph.data(out) - expected).abs() < 1e-12);

        graph.backward(out);
        let dtanh = 1.0 - expected * expected;
        assert!((graph.grad(neuron.bias) - dtanh).abs() < 1e-12);
        assert!((graph.grad(neuron.weights[1]) - -2.0 * dtanh).abs() < 1e-12);
    }

    #[test]
    fn test_neuron_rejects_wrong_input_width() {
        let mut graph = Graph::new();
        let init = Uniform::new(-1.0, 1.0).unwrap();
        let neuron = Neuron::new(&mut graph, 3, &init, &mut StdRng::seed_from_u64(1));
        let x = [graph.leaf(1.0), graph.leaf(2.0)];

        assert_eq!(
            neuron.forward(&mut graph, &x),
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_mlp_rejects_wrong_input_width() {
        let mut mlp = seeded(3, &[4, 1]);
        assert_eq!(
            mlp.infer(&[1.0, 2.0, 3.0, 4.0]),
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        );
        // nothing leaked into the arena
        assert_eq!(mlp.graph().len(), mlp.parameters().len());
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(matches!(Mlp::new(0, &[1]), Err(Error::InvalidConfig(_))));
        assert!(matches!(Mlp::new(2, &[]), Err(Error::InvalidConfig(_))));
        assert!(matches!(Mlp::new(2, &[3, 0, 1]), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_infer_resets_arena() {
        let mut mlp = seeded(3, &[4, 4, 2]);
        let before = mlp.graph().len();
        let first = mlp.infer(&[0.1, 0.2, 0.3]).unwrap();
        let second = mlp.infer(&[0.1, 0.2, 0.3]).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert!(first.iter().all(|y| y.abs() < 1.0));
        assert_eq!(mlp.graph().len(), before);
    }

    #[test]
    fn test_zero_grad() {
        let mut graph = Graph::new();
        let init = Uniform::new(-1.0, 1.0).unwrap();
        let layer = Layer::new(&mut graph, 2, 2, &init, &mut StdRng::seed_from_u64(5));
        let x = [graph.leaf(1.0), graph.leaf(-1.0)];
        let ys = layer.forward(&mut graph, &x).unwrap();
        let out = graph.sum(ys);
        graph.backward(out);
        assert!(layer.parameters().iter().any(|&p| graph.grad(p) != 0.0));

        layer.zero_grad(&mut graph);
        assert!(layer.parameters().iter().all(|&p| graph.grad(p) == 0.0));
        // inputs are not parameters and keep their gradient
        assert_ne!(graph.grad(x[0]), 0.0);
    }
}
