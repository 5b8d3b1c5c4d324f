//! Batched LSTM returning every timestep, with full backpropagation through time.
//!
//! Gate layout along the 4H axis is `[input, forget, candidate, output]`.
//! Gates use a sigmoid; the candidate and the cell output use the configured
//! activation (ReLU in the reference model, tanh in the classic formulation).

use super::activation::sigmoid;
use super::dense::glorot_uniform;
use super::{Activation, Parameters};
use ndarray::{s, Array1, Array2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Gaussian matrix whose shorter axis is orthonormalised (modified Gram-Schmidt).
pub(crate) fn orthogonal<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    let (k, n) = (rows.min(cols), rows.max(cols));
    let mut basis = Array2::<f32>::from_shape_fn((k, n), |_| rng.sample(StandardNormal));
    for i in 0..k {
        let (done, mut rest) = basis.view_mut().split_at(Axis(0), i);
        let mut row = rest.row_mut(0);
        for prev in done.rows() {
            let proj = row.dot(&prev);
            row.scaled_add(-proj, &prev);
        }
        let len = row.dot(&row).sqrt();
        if len > f32::EPSILON {
            row /= len;
        }
    }
    if rows > cols {
        basis.reversed_axes()
    } else {
        basis
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lstm {
    /// (input, 4H)
    pub(crate) w_input: Array2<f32>,
    /// (H, 4H)
    pub(crate) w_hidden: Array2<f32>,
    /// (4H)
    pub(crate) bias: Array1<f32>,
    units: usize,
    activation: Activation,
}

/// Cached activations of one timestep
#[derive(Debug, Clone)]
struct Step {
    input: Array2<f32>,
    input_gate: Array2<f32>,
    forget_gate: Array2<f32>,
    candidate: Array2<f32>,
    output_gate: Array2<f32>,
    cell: Array2<f32>,
    cell_act: Array2<f32>,
    hidden: Array2<f32>,
}

/// Forward-pass cache consumed by [`Lstm::backward`]
#[derive(Debug, Clone)]
pub struct LstmTape {
    steps: Vec<Step>,
}

impl Lstm {
    pub fn new<R: Rng + ?Sized>(input_dim: usize, units: usize, activation: Activation, rng: &mut R) -> Self {
        let mut bias = Array1::zeros(4 * units);
        // unit forget bias
        bias.slice_mut(s![units..2 * units]).fill(1.0);
        Self {
            w_input: glorot_uniform(input_dim, 4 * units, rng),
            w_hidden: orthogonal(units, 4 * units, rng),
            bias,
            units,
            activation,
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            w_input: Array2::zeros(self.w_input.raw_dim()),
            w_hidden: Array2::zeros(self.w_hidden.raw_dim()),
            bias: Array1::zeros(self.bias.raw_dim()),
            units: self.units,
            activation: self.activation,
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn input_dim(&self) -> usize {
        self.w_input.nrows()
    }

    /// Runs the sequence from a zero state. `inputs[t]` is (batch, input);
    /// returns the hidden state of every timestep, each (batch, H).
    pub fn forward(&self, inputs: &[Array2<f32>]) -> (Vec<Array2<f32>>, LstmTape) {
        let h = self.units;
        let act = self.activation;
        let batch = inputs.first().map(|x| x.nrows()).unwrap_or(0);
        let mut hidden = Array2::<f32>::zeros((batch, h));
        let mut cell = Array2::<f32>::zeros((batch, h));
        let mut outputs = Vec::with_capacity(inputs.len());
        let mut steps = Vec::with_capacity(inputs.len());

        for x in inputs {
            debug_assert_eq!(x.dim(), (batch, self.input_dim()));
            let z = x.dot(&self.w_input) + hidden.dot(&self.w_hidden) + &self.bias;
            let input_gate = z.slice(s![.., 0..h]).mapv(sigmoid);
            let forget_gate = z.slice(s![.., h..2 * h]).mapv(sigmoid);
            let candidate = z.slice(s![.., 2 * h..3 * h]).mapv(|v| act.apply(v));
            let output_gate = z.slice(s![.., 3 * h..4 * h]).mapv(sigmoid);

            cell = &forget_gate * &cell + &input_gate * &candidate;
            let cell_act = cell.mapv(|v| act.apply(v));
            hidden = &output_gate * &cell_act;

            outputs.push(hidden.clone());
            steps.push(Step {
                input: x.clone(),
                input_gate,
                forget_gate,
                candidate,
                output_gate,
                cell: cell.clone(),
                cell_act,
                hidden: hidden.clone(),
            });
        }
        (outputs, LstmTape { steps })
    }

    /// Backpropagates `d_hidden[t]` (d loss / d h_t from the layers above)
    /// through time. Accumulates into `grads`, returns d loss / d inputs[t].
    pub fn backward(&self, tape: &LstmTape, d_hidden: &[Array2<f32>], grads: &mut Lstm) -> Vec<Array2<f32>> {
        let h = self.units;
        let act = self.activation;
        let steps = &tape.steps;
        debug_assert_eq!(steps.len(), d_hidden.len());
        let batch = steps.first().map(|st| st.input.nrows()).unwrap_or(0);

        let mut dh_next = Array2::<f32>::zeros((batch, h));
        let mut dc_next = Array2::<f32>::zeros((batch, h));
        let mut d_inputs = vec![Array2::<f32>::zeros((batch, self.input_dim())); steps.len()];
        let zeros = Array2::<f32>::zeros((batch, h));

        for t in (0..steps.len()).rev() {
            let st = &steps[t];
            let (h_prev, c_prev) = if t == 0 {
                (&zeros, &zeros)
            } else {
                (&steps[t - 1].hidden, &steps[t - 1].cell)
            };

            let dh = &d_hidden[t] + &dh_next;
            let d_out = &dh * &st.cell_act * &st.output_gate.mapv(|v| v * (1.0 - v));
            let dc = &dh * &st.output_gate * &st.cell_act.mapv(|v| act.derivative(v)) + &dc_next;
            let d_in = &dc * &st.candidate * &st.input_gate.mapv(|v| v * (1.0 - v));
            let d_forget = &dc * c_prev * &st.forget_gate.mapv(|v| v * (1.0 - v));
            let d_cand = &dc * &st.input_gate * &st.candidate.mapv(|v| act.derivative(v));

            let mut dz = Array2::<f32>::zeros((batch, 4 * h));
            dz.slice_mut(s![.., 0..h]).assign(&d_in);
            dz.slice_mut(s![.., h..2 * h]).assign(&d_forget);
            dz.slice_mut(s![.., 2 * h..3 * h]).assign(&d_cand);
            dz.slice_mut(s![.., 3 * h..4 * h]).assign(&d_out);

            grads.w_input += &st.input.t().dot(&dz);
            grads.w_hidden += &h_prev.t().dot(&dz);
            grads.bias += &dz.sum_axis(Axis(0));

            d_inputs[t] = dz.dot(&self.w_input.t());
            dh_next = dz.dot(&self.w_hidden.t());
            dc_next = dc * &st.forget_gate;
        }
        d_inputs
    }

    pub(crate) fn has_shape(&self, input_dim: usize, units: usize) -> bool {
        self.units == units
            && self.w_input.dim() == (input_dim, 4 * units)
            && self.w_hidden.dim() == (units, 4 * units)
            && self.bias.len() == 4 * units
    }
}

impl Parameters for Lstm {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![
            self.w_input.view().into_dyn(),
            self.w_hidden.view().into_dyn(),
            self.bias.view().into_dyn(),
        ]
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.w_input.view_mut().into_dyn(),
            self.w_hidden.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sequence(batch: usize, len: usize, width: usize) -> Vec<Array2<f32>> {
        (0..len)
            .map(|t| Array2::from_shape_fn((batch, width), |(b, f)| ((b + f + t) % 5) as f32 * 0.2))
            .collect()
    }

    #[test]
    fn forward_shapes() {
        let mut rng = StdRng::seed_from_u64(5);
        let lstm = Lstm::new(3, 8, Activation::Relu, &mut rng);
        let (out, tape) = lstm.forward(&sequence(4, 6, 3));
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(|h| h.dim() == (4, 8)));
        assert_eq!(tape.steps.len(), 6);
    }

    #[test]
    fn recurrent_kernel_has_orthonormal_rows() {
        let mut rng = StdRng::seed_from_u64(11);
        let lstm = Lstm::new(3, 5, Activation::Relu, &mut rng);
        let gram = lstm.w_hidden.dot(&lstm.w_hidden.t());
        for ((i, j), v) in gram.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((v - expected).abs() < 1e-4, "gram[{}, {}] = {}", i, j, v);
        }
        let tall = orthogonal(6, 2, &mut rng);
        let gram = tall.t().dot(&tall);
        assert!((gram[[0, 0]] - 1.0).abs() < 1e-4 && gram[[0, 1]].abs() < 1e-4);
    }

    #[test]
    fn backward_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(6);
        let lstm = Lstm::new(2, 3, Activation::Tanh, &mut rng);
        let inputs = sequence(2, 3, 2);
        // loss = sum of every hidden state
        let loss = |l: &Lstm| -> f32 { l.forward(&inputs).0.iter().map(|h| h.sum()).sum() };

        let (out, tape) = lstm.forward(&inputs);
        let d_hidden: Vec<_> = out.iter().map(|h| Array2::ones(h.raw_dim())).collect();
        let mut grads = lstm.zeros_like();
        lstm.backward(&tape, &d_hidden, &mut grads);

        let eps = 1e-2;
        for (r, c) in [(0, 0), (1, 5), (0, 11)] {
            let mut plus = lstm.clone();
            plus.w_input[[r, c]] += eps;
            let mut minus = lstm.clone();
            minus.w_input[[r, c]] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            let analytic = grads.w_input[[r, c]];
            assert!(
                (numeric - analytic).abs() < 1e-2 + 0.05 * analytic.abs(),
                "w_input[{},{}]: numeric {} analytic {}",
                r,
                c,
                numeric,
                analytic
            );
        }
    }
}
