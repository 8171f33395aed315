use crate::feature_extractor::{euclidean_distance, mirror};
use crate::mlp::{ClassifierError, MlpClassifier, ModelBlob, ProbabilisticClassifier};
use crate::types::{FeatureVector, GestureSample, FEATURE_LEN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Distancia máxima (espacio normalizado) a la muestra más cercana
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 1.5;
/// Probabilidad mínima para aceptar una predicción
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
/// Umbral a partir del cual se registra el detalle de la predicción
const LOG_CONFIDENCE: f32 = 0.4;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid feature size: expected {expected}, got {actual}")]
    InvalidFeatureSize { expected: usize, actual: usize },

    #[error("Empty gesture label")]
    EmptyLabel,

    #[error("Non-finite value in feature vector")]
    NonFinite,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Umbrales de aceptación de predicciones
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionPolicy {
    pub similarity_threshold: f32,
    pub confidence_threshold: f32,
}

impl Default for PredictionPolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Resultado detallado de una predicción aceptada
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    /// Distancia a la muestra de entrenamiento más cercana
    pub similarity: f32,
    /// La orientación espejada ganó la inferencia
    pub mirrored: bool,
}

/// Formato en disco: muestras, bandera de entrenado y modelo opaco
#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    samples: Vec<GestureSample>,
    #[serde(default)]
    is_trained: bool,
    #[serde(default)]
    model: Option<ModelBlob>,
}

/// Almacén de gestos grabados + clasificador reentrenable.
///
/// Las muestras se entrenan junto a su versión espejada para que un gesto
/// grabado con una mano se reconozca también con la otra.
pub struct GestureStore<C = MlpClassifier> {
    samples: Vec<GestureSample>,
    classifier: C,
    /// Matriz original (sin espejar) del último entrenamiento
    train_cache: Vec<FeatureVector>,
    is_trained: bool,
    policy: PredictionPolicy,
    path: Option<PathBuf>,
}

impl GestureStore<MlpClassifier> {
    /// Almacén sin persistencia
    pub fn in_memory() -> Self {
        Self::with_classifier(MlpClassifier::default(), None)
    }

    /// Abre (o crea) el almacén persistido en `path`
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::with_classifier(MlpClassifier::default(), Some(path.into()));
        store.load();
        store
    }
}

impl<C: ProbabilisticClassifier> GestureStore<C> {
    pub fn with_classifier(classifier: C, path: Option<PathBuf>) -> Self {
        Self {
            samples: Vec::new(),
            classifier,
            train_cache: Vec::new(),
            is_trained: false,
            policy: PredictionPolicy::default(),
            path,
        }
    }

    pub fn with_policy(mut self, policy: PredictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &PredictionPolicy {
        &self.policy
    }

    pub fn is_trained(&self) -> bool {
        self.is_trained
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Añade una muestra sin reentrenar
    pub fn add_sample(&mut self, features: FeatureVector, label: &str) -> Result<(), StoreError> {
        if features.len() != FEATURE_LEN {
            return Err(StoreError::InvalidFeatureSize {
                expected: FEATURE_LEN,
                actual: features.len(),
            });
        }
        if features.iter().any(|x| !x.is_finite()) {
            return Err(StoreError::NonFinite);
        }
        if label.is_empty() {
            return Err(StoreError::EmptyLabel);
        }
        self.samples.push(GestureSample {
            features,
            label: label.to_string(),
        });
        Ok(())
    }

    /// Elimina todas las muestras de una etiqueta y reentrena si queda algo
    pub fn remove_label(&mut self, label: &str) {
        let before = self.samples.len();
        self.samples.retain(|s| s.label != label);
        info!(
            "Gesto '{}' eliminado ({} muestras)",
            label,
            before - self.samples.len()
        );

        if self.samples.is_empty() {
            self.is_trained = false;
            self.train_cache.clear();
            self.persist();
        } else {
            self.train();
        }
    }

    /// Etiquetas distintas, ordenadas
    pub fn get_labels(&self) -> Vec<String> {
        self.samples
            .iter()
            .map(|s| s.label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Entrena desde cero con aumento por espejado. Devuelve false si no hay datos.
    pub fn train(&mut self) -> bool {
        if self.samples.is_empty() {
            self.is_trained = false;
            return false;
        }

        match self.fit_augmented() {
            Ok(()) => {
                info!(
                    "Modelo entrenado: {} muestras, clases {:?}",
                    self.samples.len(),
                    self.classifier.classes()
                );
                self.persist();
                true
            }
            Err(e) => {
                // El clasificador conserva el ajuste anterior y la caché sigue siendo la suya
                warn!(
                    "Error entrenando el clasificador (se mantiene el modelo anterior, entrenado={}): {}",
                    self.is_trained, e
                );
                false
            }
        }
    }

    fn fit_augmented(&mut self) -> Result<(), ClassifierError> {
        let original: Vec<FeatureVector> = self.samples.iter().map(|s| s.features.clone()).collect();
        let labels: Vec<String> = self.samples.iter().map(|s| s.label.clone()).collect();

        // Original + espejado; las etiquetas se duplican, no cambian
        let mut features = original.clone();
        features.extend(original.iter().map(|f| mirror(f)));
        let mut targets = labels.clone();
        targets.extend(labels);

        self.classifier.fit(&features, &targets)?;
        self.train_cache = original;
        self.is_trained = true;
        Ok(())
    }

    /// Predicción con doble orientación; None si no supera los umbrales.
    /// Nunca propaga errores: la predicción es solo orientativa.
    pub fn predict(&self, features: &[f32]) -> Option<String> {
        match self.evaluate(features) {
            Ok(prediction) => prediction.map(|p| p.label),
            Err(e) => {
                warn!("Error de predicción: {}", e);
                None
            }
        }
    }

    /// Igual que `predict` pero con el detalle de confianza y similitud
    pub fn evaluate(&self, features: &[f32]) -> Result<Option<Prediction>, ClassifierError> {
        if !self.is_trained || self.samples.is_empty() || self.train_cache.is_empty() {
            return Ok(None);
        }
        if features.len() != FEATURE_LEN {
            return Err(ClassifierError::InvalidFeatureSize {
                expected: FEATURE_LEN,
                actual: features.len(),
            });
        }

        let mirrored = mirror(features);

        // 1. Chequeo de similitud contra las muestras originales
        let min_orig = self.nearest_distance(features);
        let min_mirrored = self.nearest_distance(&mirrored);
        let similarity = min_orig.min(min_mirrored);
        if similarity.is_nan() || similarity > self.policy.similarity_threshold {
            debug!("Gesto descartado por similitud ({:.2})", similarity);
            return Ok(None);
        }

        // 2. Inferencia en ambas orientaciones, gana la de mayor confianza
        let probs_orig = self.classifier.predict_proba(features)?;
        let probs_mirrored = self.classifier.predict_proba(&mirrored)?;
        let (idx_orig, conf_orig) = argmax(&probs_orig).ok_or(ClassifierError::NotFitted)?;
        let (idx_mirr, conf_mirr) = argmax(&probs_mirrored).ok_or(ClassifierError::NotFitted)?;

        let (idx, confidence, mirrored_won) = if conf_orig >= conf_mirr {
            (idx_orig, conf_orig, false)
        } else {
            (idx_mirr, conf_mirr, true)
        };
        let label = self
            .classifier
            .classes()
            .get(idx)
            .cloned()
            .ok_or(ClassifierError::NotFitted)?;

        if confidence > LOG_CONFIDENCE {
            debug!(
                "Predicción: {} | Match: {} | Conf: {:.2} | Sim: {:.2}",
                label,
                if min_mirrored < min_orig { "MIRRORED" } else { "ORIGINAL" },
                confidence,
                similarity
            );
        }

        // 3. Umbral de confianza
        if confidence < self.policy.confidence_threshold {
            return Ok(None);
        }

        Ok(Some(Prediction {
            label,
            confidence,
            similarity,
            mirrored: mirrored_won,
        }))
    }

    fn nearest_distance(&self, features: &[f32]) -> f32 {
        self.train_cache
            .iter()
            .map(|row| euclidean_distance(row, features))
            .fold(f32::INFINITY, f32::min)
    }

    /// Guarda el snapshot; un fallo de escritura no es fatal
    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!("No se pudo guardar el modelo: {}", e);
        }
    }

    /// Escribe el snapshot completo (archivo temporal + rename)
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let model = if self.is_trained {
            Some(self.classifier.to_blob()?)
        } else {
            None
        };
        let snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            samples: self.samples.clone(),
            is_trained: self.is_trained,
            model,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;
        fs::rename(&tmp, path)?;
        debug!("Snapshot guardado en {}", path.display());
        Ok(())
    }

    /// Carga el snapshot. Un archivo ausente o corrupto deja el almacén vacío.
    pub fn load(&mut self) -> bool {
        let Some(path) = self.path.clone() else {
            return false;
        };
        if !path.exists() {
            return false;
        }

        let snapshot = match read_snapshot(&path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Error cargando el modelo {}: {}", path.display(), e);
                self.samples.clear();
                self.train_cache.clear();
                self.is_trained = false;
                return false;
            }
        };

        self.samples = snapshot
            .samples
            .into_iter()
            .filter(|s| {
                s.features.len() == FEATURE_LEN
                    && s.features.iter().all(|x| x.is_finite())
                    && !s.label.is_empty()
            })
            .collect();
        self.train_cache.clear();
        self.is_trained = false;

        if let Some(blob) = &snapshot.model {
            match C::from_blob(blob) {
                Ok(_) => debug!("Modelo guardado {} v{} legible", blob.kind, blob.version),
                Err(e) => info!("Modelo guardado descartado ({}), se reentrena igualmente", e),
            }
        }

        // Siempre se reentrena: el modelo guardado puede venir de otro esquema de aumento
        if snapshot.is_trained && snapshot.model.is_some() && !self.samples.is_empty() {
            info!("Reentrenando al cargar para aplicar el aumento por espejado...");
            self.train();
        }
        info!(
            "Almacén cargado: {} muestras, etiquetas {:?}",
            self.samples.len(),
            self.get_labels()
        );
        true
    }
}

fn read_snapshot(path: &Path) -> Result<StoreSnapshot, StoreError> {
    let content = fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

/// Índice del mayor valor; ante empate gana el primero
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
}
