use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dispatcher::DispatchPolicy;
use crate::gesture_classifier::PredictionPolicy;

/// Configuración del daemon. Todos los campos tienen valor por defecto,
/// así que un JSON vacío (`{}`) es válido.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Snapshot del almacén de gestos
    pub model_path: PathBuf,
    /// Mapa etiqueta → acción
    pub actions_path: PathBuf,
    pub prediction: PredictionPolicy,
    pub dispatch: DispatchPolicy,
    /// Frames por grabación si no se indica otra cosa
    pub recording_frames: usize,
    /// Capacidad del canal detector → motor
    pub frame_queue: usize,
    /// Cada cuánto se publica el estado (ms)
    pub status_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/gesture_model.json"),
            actions_path: PathBuf::from("actions_config.json"),
            prediction: PredictionPolicy::default(),
            dispatch: DispatchPolicy::default(),
            recording_frames: 50,
            frame_queue: 100,
            status_interval_ms: 100,
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("No se pudo leer la configuración {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Configuración inválida en {:?}", path))
    }

    /// Carga `path` si se indicó, si no usa los valores por defecto
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.prediction.similarity_threshold, 1.5);
        assert_eq!(settings.dispatch.debounce_ms, 500);
    }

    #[test]
    fn partial_dispatch_section_keeps_other_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"dispatch": {"discrete_cooldown_ms": 800}}"#).unwrap();
        assert_eq!(settings.dispatch.discrete_cooldown_ms, 800);
        assert_eq!(settings.dispatch.continuous_cooldown_ms, 200);
        assert_eq!(settings.dispatch.continuous_commands.len(), 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join("gestureflow_settings_does_not_exist.json");
        assert!(Settings::load(&path).is_err());
    }
}
