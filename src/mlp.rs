use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Invalid feature size: expected {expected}, got {actual}")]
    InvalidFeatureSize { expected: usize, actual: usize },

    #[error("Feature and label counts differ: {features} vs {labels}")]
    LengthMismatch { features: usize, labels: usize },

    #[error("No training data")]
    EmptyTrainingSet,

    #[error("Model is not fitted")]
    NotFitted,

    #[error("Non-finite value in model output")]
    NonFinite,

    #[error("Unsupported model blob {kind} v{version}")]
    UnsupportedBlob { kind: String, version: u32 },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Modelo serializado tal como cruza la frontera de persistencia.
/// El almacén no conoce el algoritmo, solo `kind` y `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBlob {
    pub kind: String,
    pub version: u32,
    pub payload: serde_json::Value,
}

/// Interfaz mínima que el almacén de gestos necesita de un clasificador
pub trait ProbabilisticClassifier {
    /// Reentrena desde cero; reemplaza cualquier estado anterior.
    /// Si devuelve error, el ajuste previo (si lo había) sigue vigente.
    fn fit(&mut self, features: &[Vec<f32>], labels: &[String]) -> Result<(), ClassifierError>;

    /// Probabilidades por clase, en el orden de `classes()`
    fn predict_proba(&self, features: &[f32]) -> Result<Vec<f32>, ClassifierError>;

    fn classes(&self) -> &[String];

    fn to_blob(&self) -> Result<ModelBlob, ClassifierError>;

    fn from_blob(blob: &ModelBlob) -> Result<Self, ClassifierError>
    where
        Self: Sized;
}

/// Hiperparámetros del perceptrón
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpParams {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Penalización L2
    pub alpha: f32,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub tol: f32,
    pub n_iter_no_change: usize,
    pub seed: u64,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self {
            hidden_layers: vec![64, 32],
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            alpha: 1e-4,
            batch_size: 200,
            max_epochs: 2000,
            tol: 1e-4,
            n_iter_no_change: 10,
            seed: 42,
        }
    }
}

/// Capa densa; pesos en orden [entrada * salidas + salida]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DenseLayer {
    inputs: usize,
    outputs: usize,
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl DenseLayer {
    /// Inicialización Glorot uniforme
    fn new(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let bound = (6.0 / (inputs + outputs) as f32).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let biases = (0..outputs).map(|_| rng.gen_range(-bound..bound)).collect();
        Self {
            inputs,
            outputs,
            weights,
            biases,
        }
    }

    fn forward(&self, input: &[f32], out: &mut Vec<f32>) {
        out.clear();
        out.extend_from_slice(&self.biases);
        for (i, &x) in input.iter().enumerate() {
            if x == 0.0 {
                continue;
            }
            let row = &self.weights[i * self.outputs..(i + 1) * self.outputs];
            for (o, w) in out.iter_mut().zip(row) {
                *o += x * w;
            }
        }
    }
}

/// Gradientes y momentos de Adam con la misma forma que una capa
#[derive(Debug, Clone)]
struct LayerBuffers {
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl LayerBuffers {
    fn zeros_like(layer: &DenseLayer) -> Self {
        Self {
            weights: vec![0.0; layer.weights.len()],
            biases: vec![0.0; layer.biases.len()],
        }
    }

    fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.biases.iter_mut().for_each(|b| *b = 0.0);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MlpPayload {
    params: MlpParams,
    classes: Vec<String>,
    layers: Vec<DenseLayer>,
}

/// Perceptrón multicapa: ReLU en capas ocultas, softmax a la salida,
/// entrenado con Adam sobre entropía cruzada.
#[derive(Debug, Clone, Default)]
pub struct MlpClassifier {
    params: MlpParams,
    classes: Vec<String>,
    layers: Vec<DenseLayer>,
}

impl MlpClassifier {
    pub const KIND: &'static str = "mlp";
    pub const VERSION: u32 = 1;

    pub fn new(params: MlpParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            layers: Vec::new(),
        }
    }

    pub fn params(&self) -> &MlpParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        !self.layers.is_empty()
    }

    fn input_size(&self) -> usize {
        self.layers.first().map(|l| l.inputs).unwrap_or(0)
    }

    /// Propagación hacia adelante guardando las activaciones de cada capa.
    /// activations[0] es la entrada, la última son las probabilidades.
    fn forward_all(&self, input: &[f32], activations: &mut Vec<Vec<f32>>) {
        activations.resize(self.layers.len() + 1, Vec::new());
        activations[0].clear();
        activations[0].extend_from_slice(input);

        let last = self.layers.len() - 1;
        for (l, layer) in self.layers.iter().enumerate() {
            let (prev, next) = activations.split_at_mut(l + 1);
            let out = &mut next[0];
            layer.forward(&prev[l], out);
            if l < last {
                out.iter_mut().for_each(|v| *v = v.max(0.0));
            } else {
                softmax(out);
            }
        }
    }

    fn l2_norm_sq(&self) -> f32 {
        self.layers
            .iter()
            .map(|l| l.weights.iter().map(|w| w * w).sum::<f32>())
            .sum()
    }
}

impl ProbabilisticClassifier for MlpClassifier {
    fn fit(&mut self, features: &[Vec<f32>], labels: &[String]) -> Result<(), ClassifierError> {
        if features.len() != labels.len() {
            return Err(ClassifierError::LengthMismatch {
                features: features.len(),
                labels: labels.len(),
            });
        }
        let Some(first) = features.first() else {
            return Err(ClassifierError::EmptyTrainingSet);
        };
        let n_inputs = first.len();
        if let Some(bad) = features.iter().find(|f| f.len() != n_inputs) {
            return Err(ClassifierError::InvalidFeatureSize {
                expected: n_inputs,
                actual: bad.len(),
            });
        }
        if features.iter().flatten().any(|x| !x.is_finite()) {
            return Err(ClassifierError::NonFinite);
        }

        let mut classes: Vec<String> = labels.to_vec();
        classes.sort();
        classes.dedup();
        let targets: Vec<usize> = labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or(0))
            .collect();

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let previous = (std::mem::take(&mut self.classes), std::mem::take(&mut self.layers));
        let mut sizes = vec![n_inputs];
        sizes.extend(&self.params.hidden_layers);
        sizes.push(classes.len());
        self.layers = sizes
            .windows(2)
            .map(|w| DenseLayer::new(w[0], w[1], &mut rng))
            .collect();
        self.classes = classes;

        let n_samples = features.len();
        let batch_size = self.params.batch_size.clamp(1, n_samples);
        let mut grads: Vec<LayerBuffers> = self.layers.iter().map(LayerBuffers::zeros_like).collect();
        let mut m: Vec<LayerBuffers> = grads.clone();
        let mut v: Vec<LayerBuffers> = grads.clone();
        let mut activations: Vec<Vec<f32>> = Vec::new();
        let mut deltas: Vec<Vec<f32>> = vec![Vec::new(); self.layers.len()];
        let mut order: Vec<usize> = (0..n_samples).collect();

        let mut step = 0i32;
        let mut best_loss = f32::INFINITY;
        let mut no_improvement = 0usize;

        for epoch in 0..self.params.max_epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0f32;

            for batch in order.chunks(batch_size) {
                grads.iter_mut().for_each(LayerBuffers::reset);
                let mut batch_loss = 0.0f32;

                for &idx in batch {
                    self.forward_all(&features[idx], &mut activations);
                    let probs = &activations[self.layers.len()];
                    batch_loss -= probs[targets[idx]].max(1e-10).ln();

                    // Delta de salida softmax + entropía cruzada: p - y
                    let last = self.layers.len() - 1;
                    deltas[last].clear();
                    deltas[last].extend_from_slice(probs);
                    deltas[last][targets[idx]] -= 1.0;

                    for l in (0..self.layers.len()).rev() {
                        let layer = &self.layers[l];
                        let input = &activations[l];
                        let grad = &mut grads[l];
                        for (i, &x) in input.iter().enumerate() {
                            if x == 0.0 {
                                continue;
                            }
                            let row = &mut grad.weights[i * layer.outputs..(i + 1) * layer.outputs];
                            for (g, d) in row.iter_mut().zip(&deltas[l]) {
                                *g += x * d;
                            }
                        }
                        for (g, d) in grad.biases.iter_mut().zip(&deltas[l]) {
                            *g += d;
                        }

                        if l > 0 {
                            // Retropropagar a través de ReLU
                            let (lower, upper) = deltas.split_at_mut(l);
                            let prev_delta = &mut lower[l - 1];
                            prev_delta.clear();
                            for (i, &a) in input.iter().enumerate() {
                                if a <= 0.0 {
                                    prev_delta.push(0.0);
                                    continue;
                                }
                                let row = &layer.weights[i * layer.outputs..(i + 1) * layer.outputs];
                                let sum: f32 = row.iter().zip(&upper[0]).map(|(w, d)| w * d).sum();
                                prev_delta.push(sum);
                            }
                        }
                    }
                }

                let n = batch.len() as f32;
                batch_loss += 0.5 * self.params.alpha * self.l2_norm_sq();
                epoch_loss += batch_loss;

                // Adam con corrección de sesgo
                step += 1;
                let p = &self.params;
                let lr_t = p.learning_rate * (1.0 - p.beta2.powi(step)).sqrt()
                    / (1.0 - p.beta1.powi(step));
                for l in 0..self.layers.len() {
                    let layer = &mut self.layers[l];
                    let grad = &mut grads[l];
                    for (g, w) in grad.weights.iter_mut().zip(&layer.weights) {
                        *g = (*g + p.alpha * w) / n;
                    }
                    grad.biases.iter_mut().for_each(|g| *g /= n);

                    adam_update(&mut layer.weights, &grad.weights, &mut m[l].weights, &mut v[l].weights, p, lr_t);
                    adam_update(&mut layer.biases, &grad.biases, &mut m[l].biases, &mut v[l].biases, p, lr_t);
                }
            }

            let loss = epoch_loss / n_samples as f32;
            if !loss.is_finite() {
                (self.classes, self.layers) = previous;
                return Err(ClassifierError::NonFinite);
            }

            if loss > best_loss - self.params.tol {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            if loss < best_loss {
                best_loss = loss;
            }
            if no_improvement > self.params.n_iter_no_change {
                debug!("MLP convergió en la época {} (loss {:.5})", epoch + 1, loss);
                break;
            }
        }

        Ok(())
    }

    fn predict_proba(&self, features: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        if !self.is_fitted() {
            return Err(ClassifierError::NotFitted);
        }
        if features.len() != self.input_size() {
            return Err(ClassifierError::InvalidFeatureSize {
                expected: self.input_size(),
                actual: features.len(),
            });
        }

        let mut activations = Vec::new();
        self.forward_all(features, &mut activations);
        let probs = activations.pop().unwrap_or_default();
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(ClassifierError::NonFinite);
        }
        Ok(probs)
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn to_blob(&self) -> Result<ModelBlob, ClassifierError> {
        let payload = MlpPayload {
            params: self.params.clone(),
            classes: self.classes.clone(),
            layers: self.layers.clone(),
        };
        Ok(ModelBlob {
            kind: Self::KIND.to_string(),
            version: Self::VERSION,
            payload: serde_json::to_value(payload)?,
        })
    }

    fn from_blob(blob: &ModelBlob) -> Result<Self, ClassifierError> {
        if blob.kind != Self::KIND || blob.version != Self::VERSION {
            return Err(ClassifierError::UnsupportedBlob {
                kind: blob.kind.clone(),
                version: blob.version,
            });
        }
        let payload: MlpPayload = serde_json::from_value(blob.payload.clone())?;
        Ok(Self {
            params: payload.params,
            classes: payload.classes,
            layers: payload.layers,
        })
    }
}

fn adam_update(
    params: &mut [f32],
    grads: &[f32],
    m: &mut [f32],
    v: &mut [f32],
    p: &MlpParams,
    lr_t: f32,
) {
    for (((w, g), mi), vi) in params.iter_mut().zip(grads).zip(m.iter_mut()).zip(v.iter_mut()) {
        *mi = p.beta1 * *mi + (1.0 - p.beta1) * g;
        *vi = p.beta2 * *vi + (1.0 - p.beta2) * g * g;
        *w -= lr_t * *mi / (vi.sqrt() + p.epsilon);
    }
}

fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(center: &[f32], n: usize, jitter: f32) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                center
                    .iter()
                    .enumerate()
                    .map(|(j, c)| c + jitter * (((i * 7 + j * 3) % 5) as f32 - 2.0))
                    .collect()
            })
            .collect()
    }

    fn labels(name: &str, n: usize) -> Vec<String> {
        vec![name.to_string(); n]
    }

    #[test]
    fn softmax_sums_to_one() {
        let mut v = vec![1.0, 2.0, 3.0];
        softmax(&mut v);
        assert!((v.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(v[2] > v[1] && v[1] > v[0]);
    }

    #[test]
    fn fit_rejects_empty_set() {
        let mut mlp = MlpClassifier::default();
        assert!(matches!(mlp.fit(&[], &[]), Err(ClassifierError::EmptyTrainingSet)));
    }

    #[test]
    fn fit_rejects_mismatched_lengths() {
        let mut mlp = MlpClassifier::default();
        let err = mlp.fit(&[vec![0.0; 4]], &[]).unwrap_err();
        assert!(matches!(err, ClassifierError::LengthMismatch { .. }));
    }

    #[test]
    fn predict_before_fit_fails() {
        let mlp = MlpClassifier::default();
        assert!(matches!(mlp.predict_proba(&[0.0; 4]), Err(ClassifierError::NotFitted)));
    }

    #[test]
    fn single_class_has_full_confidence() {
        let mut mlp = MlpClassifier::default();
        let x = cluster(&[0.3, -0.2, 0.5, 0.1], 5, 0.0);
        mlp.fit(&x, &labels("A", 5)).unwrap();
        assert_eq!(mlp.classes(), &["A".to_string()]);
        let probs = mlp.predict_proba(&x[0]).unwrap();
        assert_eq!(probs.len(), 1);
        assert!((probs[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn separates_two_clusters() {
        let mut x = cluster(&[0.8, 0.1, -0.3, 0.5, 0.0, 0.2], 10, 0.02);
        x.extend(cluster(&[-0.1, 0.9, 0.4, -0.6, 0.3, -0.2], 10, 0.02));
        let mut y = labels("fist", 10);
        y.extend(labels("palm", 10));

        let mut mlp = MlpClassifier::default();
        mlp.fit(&x, &y).unwrap();

        let p_fist = mlp.predict_proba(&x[0]).unwrap();
        let p_palm = mlp.predict_proba(&x[15]).unwrap();
        assert_eq!(mlp.classes(), &["fist".to_string(), "palm".to_string()]);
        assert!(p_fist[0] > 0.5);
        assert!(p_palm[1] > 0.5);
    }

    #[test]
    fn training_is_deterministic() {
        let x = cluster(&[0.5, -0.5, 0.2], 6, 0.05);
        let mut y = labels("a", 3);
        y.extend(labels("b", 3));

        let mut first = MlpClassifier::default();
        let mut second = MlpClassifier::default();
        first.fit(&x, &y).unwrap();
        second.fit(&x, &y).unwrap();
        assert_eq!(first.predict_proba(&x[1]).unwrap(), second.predict_proba(&x[1]).unwrap());
    }

    #[test]
    fn blob_restores_same_model() {
        let mut x = cluster(&[0.2, 0.4], 4, 0.01);
        x.extend(cluster(&[-0.4, 0.1], 4, 0.01));
        let mut y = labels("up", 4);
        y.extend(labels("down", 4));

        let mut mlp = MlpClassifier::default();
        mlp.fit(&x, &y).unwrap();
        let blob = mlp.to_blob().unwrap();
        assert_eq!(blob.kind, "mlp");

        let restored = MlpClassifier::from_blob(&blob).unwrap();
        assert_eq!(restored.classes(), mlp.classes());
        assert_eq!(restored.predict_proba(&x[0]).unwrap(), mlp.predict_proba(&x[0]).unwrap());
    }

    #[test]
    fn failed_fit_keeps_previous_model() {
        let x = cluster(&[0.1, 0.7, -0.2], 4, 0.01);
        let mut mlp = MlpClassifier::default();
        mlp.fit(&x, &labels("ok", 4)).unwrap();
        let before = mlp.predict_proba(&x[0]).unwrap();

        let mut poisoned = x.clone();
        poisoned[2][1] = f32::NAN;
        assert!(matches!(
            mlp.fit(&poisoned, &labels("bad", 4)),
            Err(ClassifierError::NonFinite)
        ));
        assert_eq!(mlp.classes(), &["ok".to_string()]);
        assert_eq!(mlp.predict_proba(&x[0]).unwrap(), before);
    }

    #[test]
    fn blob_with_unknown_kind_is_rejected() {
        let blob = ModelBlob {
            kind: "svm".to_string(),
            version: 1,
            payload: serde_json::Value::Null,
        };
        assert!(matches!(
            MlpClassifier::from_blob(&blob),
            Err(ClassifierError::UnsupportedBlob { .. })
        ));
    }
}
