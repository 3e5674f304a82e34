use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AnomalyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Linear,
}

/// Fully connected layer, `y = act(x W + b)` with `W` shaped `[in, out]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub(crate) weights: Array2<f64>,
    pub(crate) bias: Array1<f64>,
    activation: Activation,
}

impl Dense {
    /// He-uniform for ReLU layers, Glorot-uniform otherwise. Zero bias.
    pub fn new(fan_in: usize, fan_out: usize, activation: Activation, rng: &mut StdRng) -> Self {
        let limit = match activation {
            Activation::Relu => (6.0 / fan_in.max(1) as f64).sqrt(),
            Activation::Linear => (6.0 / (fan_in + fan_out).max(1) as f64).sqrt(),
        };
        let weights = Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-limit..=limit));
        Dense {
            weights,
            bias: Array1::zeros(fan_out),
            activation,
        }
    }

    fn pre_activation(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        x.dot(&self.weights) + &self.bias
    }

    fn activate(&self, z: &Array2<f64>) -> Array2<f64> {
        match self.activation {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Linear => z.clone(),
        }
    }
}

/// Parameter gradients of one layer.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

/// Intermediate values kept from a forward pass for backpropagation.
pub struct ForwardCache {
    inputs: Vec<Array2<f64>>,
    pre: Vec<Array2<f64>>,
    output: Array2<f64>,
}

impl ForwardCache {
    pub fn output(&self) -> &Array2<f64> {
        &self.output
    }
}

/// ReLU hidden layers followed by a linear output layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    layers: Vec<Dense>,
}

impl Mlp {
    pub fn new(input: usize, hidden: &[usize], output: usize, rng: &mut StdRng) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut fan_in = input;
        for &width in hidden {
            layers.push(Dense::new(fan_in, width, Activation::Relu, rng));
            fan_in = width;
        }
        layers.push(Dense::new(fan_in, output, Activation::Linear, rng));
        Mlp { layers }
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    /// Layer shapes chain from `input` features to `output` values.
    pub fn check_dimensions(&self, input: usize, output: usize) -> Result<()> {
        let mut fan_in = input;
        for (i, layer) in self.layers.iter().enumerate() {
            let (rows, cols) = layer.weights.dim();
            if rows != fan_in || layer.bias.len() != cols {
                return Err(AnomalyError::shape(
                    format!("layer {i}: {fan_in} inputs, bias matching its outputs"),
                    format!("weights [{rows}, {cols}], bias of {}", layer.bias.len()),
                ));
            }
            fan_in = cols;
        }
        if self.layers.is_empty() || fan_in != output {
            return Err(AnomalyError::shape(
                format!("network with {output} outputs"),
                format!("{} layers ending in {fan_in} outputs", self.layers.len()),
            ));
        }
        Ok(())
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Dense] {
        &mut self.layers
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut current = x.to_owned();
        for layer in &self.layers {
            let z = layer.pre_activation(current.view());
            current = layer.activate(&z);
        }
        current
    }

    pub fn forward(&self, x: ArrayView2<'_, f64>) -> ForwardCache {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre = Vec::with_capacity(self.layers.len());
        let mut current = x.to_owned();
        for layer in &self.layers {
            let z = layer.pre_activation(current.view());
            let next = layer.activate(&z);
            inputs.push(current);
            pre.push(z);
            current = next;
        }
        ForwardCache {
            inputs,
            pre,
            output: current,
        }
    }

    /// Backpropagate `d loss / d output` through the cached pass.
    pub fn backward(&self, cache: &ForwardCache, grad_output: Array2<f64>) -> Vec<Gradients> {
        let mut grads = Vec::with_capacity(self.layers.len());
        let mut delta = grad_output;
        for (i, layer) in self.layers.iter().enumerate().rev() {
            if layer.activation == Activation::Relu {
                delta.zip_mut_with(&cache.pre[i], |d, &z| {
                    if z <= 0.0 {
                        *d = 0.0;
                    }
                });
            }
            grads.push(Gradients {
                weights: cache.inputs[i].t().dot(&delta),
                bias: delta.sum_axis(Axis(0)),
            });
            if i > 0 {
                delta = delta.dot(&layer.weights.t());
            }
        }
        grads.reverse();
        grads
    }
}

/// Mean squared error and its gradient with respect to `prediction`.
pub fn mse_with_grad(prediction: &Array2<f64>, target: ArrayView2<'_, f64>) -> (f64, Array2<f64>) {
    let diff = prediction - &target;
    let n = diff.len().max(1) as f64;
    let loss = diff.mapv(|d| d * d).sum() / n;
    (loss, diff * (2.0 / n))
}

pub fn mse(prediction: &Array2<f64>, target: ArrayView2<'_, f64>) -> f64 {
    let n = prediction.len().max(1) as f64;
    (prediction - &target).mapv(|d| d * d).sum() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_shapes_through_hidden_layers() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = Mlp::new(4, &[8, 3], 2, &mut rng);
        assert_eq!(net.layers().len(), 3);

        let x = Array2::from_elem((5, 4), 0.5);
        assert_eq!(net.predict(x.view()).dim(), (5, 2));
        assert_eq!(net.forward(x.view()).output(), &net.predict(x.view()));
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(7);
        let net = Mlp::new(3, &[4], 2, &mut rng);
        let x = array![[0.3, -0.2, 0.9], [1.1, 0.4, -0.5]];
        let y = array![[0.5, -1.0], [0.2, 0.7]];

        let cache = net.forward(x.view());
        let (_, grad_out) = mse_with_grad(cache.output(), y.view());
        let grads = net.backward(&cache, grad_out);

        let eps = 1e-6;
        for (layer, (r, c)) in [(0usize, (1usize, 2usize)), (1, (3, 1))] {
            let mut plus = net.clone();
            plus.layers_mut()[layer].weights[[r, c]] += eps;
            let mut minus = net.clone();
            minus.layers_mut()[layer].weights[[r, c]] -= eps;

            let numeric = (mse(&plus.predict(x.view()), y.view())
                - mse(&minus.predict(x.view()), y.view()))
                / (2.0 * eps);
            let analytic = grads[layer].weights[[r, c]];
            assert!(
                (numeric - analytic).abs() < 1e-5,
                "layer {layer}: {numeric} vs {analytic}"
            );
        }
    }

    #[test]
    fn test_mse() {
        let p = array![[1.0, 2.0]];
        assert_eq!(mse(&p, array![[1.0, 0.0]].view()), 2.0);
    }
}
