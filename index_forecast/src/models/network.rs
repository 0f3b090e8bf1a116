//! Stacked LSTM regression network trained with backpropagation through time
//!
//! Layers feed their full hidden sequence to the next layer; the last
//! hidden state of the top layer goes through a dense head to a scalar.
//! Dropout is inverted (scaled at training time) so inference needs no
//! rescaling.

use crate::error::{ForecastError, Result};
use log::debug;
use ndarray::{s, Array1, Array2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v.clamp(-500.0, 500.0)).exp())
}

fn xavier(rows: usize, cols: usize, fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Array2<f64> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    let uniform = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn((rows, cols), |_| uniform.sample(&mut *rng))
}

/// One LSTM layer
///
/// `weights` has shape `(4H, I + H)` acting on `[x_t, h_{t-1}]`, with gate
/// blocks ordered input, forget, output, candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmLayer {
    input_size: usize,
    hidden_size: usize,
    weights: Array2<f64>,
    bias: Array1<f64>,
}

/// Activations kept from the forward pass of one time step
#[derive(Debug, Clone)]
struct StepCache {
    xh: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    o: Array1<f64>,
    g: Array1<f64>,
    c_prev: Array1<f64>,
    tanh_c: Array1<f64>,
}

impl LstmLayer {
    /// Create a new layer with Xavier-uniform weights and forget bias 1
    pub fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Self {
        let weights = xavier(
            4 * hidden_size,
            input_size + hidden_size,
            input_size + hidden_size,
            hidden_size,
            rng,
        );
        let mut bias = Array1::zeros(4 * hidden_size);
        bias.slice_mut(s![hidden_size..2 * hidden_size]).fill(1.0);
        Self {
            input_size,
            hidden_size,
            weights,
            bias,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn forward(&self, inputs: &[Array1<f64>]) -> (Vec<Array1<f64>>, Vec<StepCache>) {
        let h_size = self.hidden_size;
        let mut h = Array1::<f64>::zeros(h_size);
        let mut c = Array1::<f64>::zeros(h_size);
        let mut outputs = Vec::with_capacity(inputs.len());
        let mut caches = Vec::with_capacity(inputs.len());

        for x in inputs {
            let mut xh = Array1::zeros(self.input_size + h_size);
            xh.slice_mut(s![..self.input_size]).assign(x);
            xh.slice_mut(s![self.input_size..]).assign(&h);

            let z = self.weights.dot(&xh) + &self.bias;
            let i = z.slice(s![..h_size]).mapv(sigmoid);
            let f = z.slice(s![h_size..2 * h_size]).mapv(sigmoid);
            let o = z.slice(s![2 * h_size..3 * h_size]).mapv(sigmoid);
            let g = z.slice(s![3 * h_size..]).mapv(f64::tanh);

            let c_next = &f * &c + &i * &g;
            let tanh_c = c_next.mapv(f64::tanh);
            h = &o * &tanh_c;

            outputs.push(h.clone());
            caches.push(StepCache {
                xh,
                i,
                f,
                o,
                g,
                c_prev: c,
                tanh_c,
            });
            c = c_next;
        }
        (outputs, caches)
    }

    /// Accumulate gradients into `grads`; returns gradients w.r.t. the inputs
    fn backward(
        &self,
        caches: &[StepCache],
        d_outputs: &[Array1<f64>],
        grads: &mut LayerGrads,
    ) -> Vec<Array1<f64>> {
        let h_size = self.hidden_size;
        let mut dh_next = Array1::<f64>::zeros(h_size);
        let mut dc_next = Array1::<f64>::zeros(h_size);
        let mut d_inputs = vec![Array1::zeros(self.input_size); caches.len()];

        for t in (0..caches.len()).rev() {
            let cache = &caches[t];
            let dh = &d_outputs[t] + &dh_next;
            let d_o = &dh * &cache.tanh_c;
            let dc = &dh * &cache.o * &cache.tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
            let d_i = &dc * &cache.g;
            let d_f = &dc * &cache.c_prev;
            let d_g = &dc * &cache.i;
            dc_next = &dc * &cache.f;

            let mut dz = Array1::<f64>::zeros(4 * h_size);
            dz.slice_mut(s![..h_size])
                .assign(&(&d_i * &cache.i.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![h_size..2 * h_size])
                .assign(&(&d_f * &cache.f.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![2 * h_size..3 * h_size])
                .assign(&(&d_o * &cache.o.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![3 * h_size..])
                .assign(&(&d_g * &cache.g.mapv(|v| 1.0 - v * v)));

            let outer = dz
                .view()
                .insert_axis(Axis(1))
                .dot(&cache.xh.view().insert_axis(Axis(0)));
            grads.weights += &outer;
            grads.bias += &dz;

            let d_xh = self.weights.t().dot(&dz);
            d_inputs[t] = d_xh.slice(s![..self.input_size]).to_owned();
            dh_next = d_xh.slice(s![self.input_size..]).to_owned();
        }
        d_inputs
    }
}

#[derive(Debug, Clone)]
struct LayerGrads {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

/// Gradients (or Adam moments) shaped like a network
#[derive(Debug, Clone)]
struct NetworkGrads {
    layers: Vec<LayerGrads>,
    dense_weights: Array1<f64>,
    dense_bias: f64,
}

impl NetworkGrads {
    fn zeros_like(network: &LstmNetwork) -> Self {
        Self {
            layers: network
                .layers
                .iter()
                .map(|layer| LayerGrads {
                    weights: Array2::zeros(layer.weights.raw_dim()),
                    bias: Array1::zeros(layer.bias.raw_dim()),
                })
                .collect(),
            dense_weights: Array1::zeros(network.dense_weights.raw_dim()),
            dense_bias: 0.0,
        }
    }

    fn clip(&mut self, limit: f64) {
        for layer in &mut self.layers {
            layer.weights.mapv_inplace(|g| g.clamp(-limit, limit));
            layer.bias.mapv_inplace(|g| g.clamp(-limit, limit));
        }
        self.dense_weights.mapv_inplace(|g| g.clamp(-limit, limit));
        self.dense_bias = self.dense_bias.clamp(-limit, limit);
    }
}

/// Per-sample activations needed for the backward pass
struct TrainingPass {
    caches: Vec<Vec<StepCache>>,
    masks: Vec<Vec<Array1<f64>>>,
    last_hidden: Array1<f64>,
    output: f64,
}

/// Options for [`LstmNetwork::train`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub gradient_clip: f64,
}

/// Stacked LSTM with a dense scalar head
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmNetwork {
    input_size: usize,
    layers: Vec<LstmLayer>,
    dense_weights: Array1<f64>,
    dense_bias: f64,
    dropout: f64,
}

impl LstmNetwork {
    /// Create a new network
    pub fn new(input_size: usize, hidden_sizes: &[usize], dropout: f64, rng: &mut StdRng) -> Result<Self> {
        if input_size == 0 || hidden_sizes.is_empty() || hidden_sizes.contains(&0) {
            return Err(ForecastError::InvalidParameter(
                "LSTM needs a positive input size and non-empty positive hidden sizes".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&dropout) {
            return Err(ForecastError::InvalidParameter(format!(
                "Dropout must be in [0, 1), got {}",
                dropout
            )));
        }

        let mut layers = Vec::with_capacity(hidden_sizes.len());
        let mut width = input_size;
        for &hidden in hidden_sizes {
            layers.push(LstmLayer::new(width, hidden, rng));
            width = hidden;
        }
        let dense_weights = xavier(1, width, width, 1, rng).row(0).to_owned();

        Ok(Self {
            input_size,
            layers,
            dense_weights,
            dense_bias: 0.0,
            dropout,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_sizes(&self) -> Vec<usize> {
        self.layers.iter().map(|l| l.hidden_size()).collect()
    }

    /// Predict from one window of shape `(timesteps, input_size)`
    pub fn predict(&self, window: &Array2<f64>) -> Result<f64> {
        self.check_window(window)?;
        let mut sequence: Vec<Array1<f64>> = window.rows().into_iter().map(|r| r.to_owned()).collect();
        for layer in &self.layers {
            sequence = layer.forward(&sequence).0;
        }
        let last = sequence
            .last()
            .ok_or_else(|| ForecastError::DataError("Empty input window".to_string()))?;
        Ok(self.dense_weights.dot(last) + self.dense_bias)
    }

    /// Mini-batch training on `(window, target)` samples with Adam
    ///
    /// Samples are visited in order; the mean squared error of each epoch
    /// is returned.
    pub fn train(
        &mut self,
        samples: &[(Array2<f64>, f64)],
        params: &TrainingParams,
        rng: &mut StdRng,
    ) -> Result<Vec<f64>> {
        if samples.is_empty() {
            return Err(ForecastError::InsufficientHistory {
                required: 1,
                available: 0,
            });
        }
        if params.epochs == 0 || params.batch_size == 0 {
            return Err(ForecastError::InvalidParameter(
                "Epochs and batch size must be positive".to_string(),
            ));
        }
        for (window, _) in samples {
            self.check_window(window)?;
        }

        let mut adam = Adam::new(self, params.learning_rate);
        let mut losses = Vec::with_capacity(params.epochs);

        for epoch in 0..params.epochs {
            let mut epoch_loss = 0.0;
            for batch in samples.chunks(params.batch_size) {
                let mut grads = NetworkGrads::zeros_like(self);
                let scale = 2.0 / batch.len() as f64;
                for (window, target) in batch {
                    let pass = self.forward_train(window, rng);
                    let error = pass.output - target;
                    epoch_loss += error * error;
                    self.backward(&pass, scale * error, &mut grads);
                }
                grads.clip(params.gradient_clip);
                adam.step(self, &grads);
            }

            let mse = epoch_loss / samples.len() as f64;
            if !mse.is_finite() {
                return Err(ForecastError::DataError(format!(
                    "LSTM training diverged in epoch {}",
                    epoch + 1
                )));
            }
            debug!("LSTM epoch {}/{}: mse {:.6}", epoch + 1, params.epochs, mse);
            losses.push(mse);
        }
        Ok(losses)
    }

    fn check_window(&self, window: &Array2<f64>) -> Result<()> {
        if window.ncols() != self.input_size || window.nrows() == 0 {
            return Err(ForecastError::InvalidParameter(format!(
                "Window shape {:?} does not match input size {}",
                window.dim(),
                self.input_size
            )));
        }
        Ok(())
    }

    fn forward_train(&self, window: &Array2<f64>, rng: &mut StdRng) -> TrainingPass {
        let keep = 1.0 - self.dropout;
        let mut sequence: Vec<Array1<f64>> = window.rows().into_iter().map(|r| r.to_owned()).collect();
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut masks = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            let (outputs, layer_caches) = layer.forward(&sequence);
            let layer_masks: Vec<Array1<f64>> = outputs
                .iter()
                .map(|h| {
                    Array1::from_shape_fn(h.len(), |_| {
                        if self.dropout == 0.0 || rng.gen::<f64>() < keep {
                            1.0 / keep
                        } else {
                            0.0
                        }
                    })
                })
                .collect();
            sequence = outputs.iter().zip(&layer_masks).map(|(h, m)| h * m).collect();
            caches.push(layer_caches);
            masks.push(layer_masks);
        }

        let last_hidden = sequence
            .last()
            .cloned()
            .unwrap_or_else(|| Array1::zeros(self.dense_weights.len()));
        let output = self.dense_weights.dot(&last_hidden) + self.dense_bias;
        TrainingPass {
            caches,
            masks,
            last_hidden,
            output,
        }
    }

    fn backward(&self, pass: &TrainingPass, d_output: f64, grads: &mut NetworkGrads) {
        grads.dense_weights.scaled_add(d_output, &pass.last_hidden);
        grads.dense_bias += d_output;

        let steps = pass.caches.first().map(|c| c.len()).unwrap_or(0);
        let top = self.dense_weights.len();
        let mut d_sequence = vec![Array1::<f64>::zeros(top); steps];
        if let Some(last) = d_sequence.last_mut() {
            *last = &self.dense_weights * d_output;
        }

        for (index, layer) in self.layers.iter().enumerate().rev() {
            let d_hidden: Vec<Array1<f64>> = d_sequence
                .iter()
                .zip(&pass.masks[index])
                .map(|(d, m)| d * m)
                .collect();
            d_sequence = layer.backward(&pass.caches[index], &d_hidden, &mut grads.layers[index]);
        }
    }
}

/// Adam optimizer state
struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
    m: NetworkGrads,
    v: NetworkGrads,
}

impl Adam {
    fn new(network: &LstmNetwork, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            m: NetworkGrads::zeros_like(network),
            v: NetworkGrads::zeros_like(network),
        }
    }

    fn step(&mut self, network: &mut LstmNetwork, grads: &NetworkGrads) {
        self.t += 1;
        let lr = self.learning_rate * (1.0 - self.beta2.powi(self.t)).sqrt()
            / (1.0 - self.beta1.powi(self.t));
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);

        for (((layer, g), m), v) in network
            .layers
            .iter_mut()
            .zip(&grads.layers)
            .zip(&mut self.m.layers)
            .zip(&mut self.v.layers)
        {
            adam_update(&mut layer.weights, &g.weights, &mut m.weights, &mut v.weights, lr, b1, b2, eps);
            adam_update(&mut layer.bias, &g.bias, &mut m.bias, &mut v.bias, lr, b1, b2, eps);
        }
        adam_update(
            &mut network.dense_weights,
            &grads.dense_weights,
            &mut self.m.dense_weights,
            &mut self.v.dense_weights,
            lr,
            b1,
            b2,
            eps,
        );

        let g = grads.dense_bias;
        self.m.dense_bias = b1 * self.m.dense_bias + (1.0 - b1) * g;
        self.v.dense_bias = b2 * self.v.dense_bias + (1.0 - b2) * g * g;
        network.dense_bias -= lr * self.m.dense_bias / (self.v.dense_bias.sqrt() + eps);
    }
}

#[allow(clippy::too_many_arguments)]
fn adam_update<D: Dimension>(
    param: &mut ndarray::Array<f64, D>,
    grad: &ndarray::Array<f64, D>,
    m: &mut ndarray::Array<f64, D>,
    v: &mut ndarray::Array<f64, D>,
    lr: f64,
    b1: f64,
    b2: f64,
    eps: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
            *p -= lr * *m / (v.sqrt() + eps);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn samples() -> Vec<(Array2<f64>, f64)> {
        // Next value of a slow ramp from the previous four
        (0..40)
            .map(|start| {
                let window = Array2::from_shape_fn((4, 1), |(t, _)| (start + t) as f64 / 50.0);
                (window, (start + 4) as f64 / 50.0)
            })
            .collect()
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = LstmNetwork::new(2, &[4, 3], 0.2, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = LstmNetwork::new(2, &[4, 3], 0.2, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hidden_sizes(), vec![4, 3]);
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut network = LstmNetwork::new(1, &[8], 0.0, &mut rng).unwrap();
        let params = TrainingParams {
            epochs: 30,
            batch_size: 8,
            learning_rate: 0.01,
            gradient_clip: 1.0,
        };
        let losses = network.train(&samples(), &params, &mut rng).unwrap();
        assert_eq!(losses.len(), 30);
        assert!(losses[29] < losses[0]);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(5);
        let network = LstmNetwork::new(2, &[3, 2], 0.0, &mut rng).unwrap();
        let window = Array2::from_shape_fn((3, 2), |(t, j)| 0.1 * (t + 2 * j) as f64);
        let target = 0.3;

        let pass = network.forward_train(&window, &mut rng);
        let mut grads = NetworkGrads::zeros_like(&network);
        network.backward(&pass, 2.0 * (pass.output - target), &mut grads);

        let loss = |net: &LstmNetwork| (net.predict(&window).unwrap() - target).powi(2);
        let h = 1e-6;
        for &(row, col) in &[(0, 0), (2, 3), (5, 4)] {
            let mut plus = network.clone();
            plus.layers[0].weights[[row, col]] += h;
            let mut minus = network.clone();
            minus.layers[0].weights[[row, col]] -= h;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * h);
            let analytic = grads.layers[0].weights[[row, col]];
            assert!((numeric - analytic).abs() < 1e-5, "{} vs {}", numeric, analytic);
        }
    }

    #[test]
    fn test_window_shape_checked() {
        let network = LstmNetwork::new(2, &[4], 0.0, &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(network.predict(&Array2::zeros((5, 3))).is_err());
    }
}
