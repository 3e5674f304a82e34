use ndarray::{Array, Dimension, Zip};

use crate::models::network::{Gradients, Mlp};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

struct Moments<D: Dimension> {
    m: Array<f64, D>,
    v: Array<f64, D>,
}

impl<D: Dimension> Moments<D> {
    fn like(param: &Array<f64, D>) -> Self {
        Moments {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    fn step(&mut self, param: &mut Array<f64, D>, grad: &Array<f64, D>, lr_t: f64) {
        Zip::from(param)
            .and(&mut self.m)
            .and(&mut self.v)
            .and(grad)
            .for_each(|p, m, v, &g| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + EPSILON);
            });
    }
}

/// Adam optimizer state for one network.
pub struct Adam {
    learning_rate: f64,
    step: i32,
    weights: Vec<Moments<ndarray::Ix2>>,
    bias: Vec<Moments<ndarray::Ix1>>,
}

impl Adam {
    pub fn new(net: &Mlp, learning_rate: f64) -> Self {
        Adam {
            learning_rate,
            step: 0,
            weights: net.layers().iter().map(|l| Moments::like(&l.weights)).collect(),
            bias: net.layers().iter().map(|l| Moments::like(&l.bias)).collect(),
        }
    }

    pub fn apply(&mut self, net: &mut Mlp, grads: &[Gradients]) {
        self.step = self.step.saturating_add(1);
        let lr_t = self.learning_rate * (1.0 - BETA2.powi(self.step)).sqrt()
            / (1.0 - BETA1.powi(self.step));

        for (i, (layer, grad)) in net.layers_mut().iter_mut().zip(grads).enumerate() {
            self.weights[i].step(&mut layer.weights, &grad.weights, lr_t);
            self.bias[i].step(&mut layer.bias, &grad.bias, lr_t);
        }
    }
}
