//! Contexto del bucle principal: normalizador → almacén/clasificador → despachador.
//!
//! Reemplaza el estado global del sistema: todo lo que el bucle necesita
//! vive en un `GestureEngine` que se llama una vez por frame procesado.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::actions::{ActionConfig, ActionExecutor};
use crate::config::Settings;
use crate::dispatcher::ActionDispatcher;
use crate::feature_extractor::normalize;
use crate::gesture_classifier::GestureStore;
use crate::recorder::RecordingSession;
use crate::types::LandmarkFrame;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EngineError {
    #[error("Already recording '{0}'")]
    AlreadyRecording(String),

    #[error("Empty gesture label")]
    EmptyLabel,

    #[error("A recording needs at least one frame")]
    ZeroFrames,
}

/// Qué pasó en un tick (también es el texto de estado que ve el usuario)
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Recording { label: String, frames_left: usize },
    TrainingComplete { label: String, trained: bool },
    Detected(String),
    Action(String),
    UnknownGesture,
    Untrained,
    NoHand,
}

impl fmt::Display for FrameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameOutcome::Recording { label, frames_left } => {
                write!(f, "Recording: {} ({})", label, frames_left)
            }
            FrameOutcome::TrainingComplete { trained: true, .. } => write!(f, "Training Complete"),
            FrameOutcome::TrainingComplete { trained: false, .. } => write!(f, "Training Failed"),
            FrameOutcome::Detected(label) => write!(f, "Detected: {}", label),
            FrameOutcome::Action(label) => write!(f, "Action: {}", label),
            FrameOutcome::UnknownGesture => write!(f, "Unknown Gesture"),
            FrameOutcome::Untrained => write!(f, "Model Untrained"),
            FrameOutcome::NoHand => write!(f, "No Hand"),
        }
    }
}

/// Estado publicado periódicamente hacia la interfaz
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub prediction: String,
    pub is_recording: bool,
    pub recording_progress: f32,
}

pub struct GestureEngine<E> {
    store: GestureStore,
    dispatcher: ActionDispatcher<E>,
    recording: Option<RecordingSession>,
    current_prediction: String,
}

impl<E: ActionExecutor> GestureEngine<E> {
    pub fn new(store: GestureStore, dispatcher: ActionDispatcher<E>) -> Self {
        Self {
            store,
            dispatcher,
            recording: None,
            current_prediction: "Initializing...".to_string(),
        }
    }

    /// Abre el snapshot y la configuración de acciones indicados en `settings`
    pub fn from_settings(settings: &Settings, executor: E) -> Result<Self> {
        let store = GestureStore::open(&settings.model_path).with_policy(settings.prediction);
        let actions = ActionConfig::load(&settings.actions_path).with_context(|| {
            format!(
                "No se pudo cargar la configuración de acciones {:?}",
                settings.actions_path
            )
        })?;
        let dispatcher = ActionDispatcher::new(actions, executor, settings.dispatch.clone());
        Ok(Self::new(store, dispatcher))
    }

    pub fn store(&self) -> &GestureStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut GestureStore {
        &mut self.store
    }

    pub fn dispatcher(&self) -> &ActionDispatcher<E> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut ActionDispatcher<E> {
        &mut self.dispatcher
    }

    pub fn is_recording(&self) -> bool {
        self.recording.as_ref().is_some_and(RecordingSession::is_active)
    }

    pub fn start_recording(&mut self, label: &str, num_frames: usize) -> Result<(), EngineError> {
        if let Some(session) = self.recording.as_ref().filter(|s| s.is_active()) {
            return Err(EngineError::AlreadyRecording(session.label().to_string()));
        }
        if label.is_empty() {
            return Err(EngineError::EmptyLabel);
        }
        if num_frames == 0 {
            return Err(EngineError::ZeroFrames);
        }
        info!("Grabando '{}' ({} frames)", label, num_frames);
        self.recording = Some(RecordingSession::new(label, num_frames));
        Ok(())
    }

    pub fn train(&mut self) -> bool {
        self.store.train()
    }

    pub fn labels(&self) -> Vec<String> {
        self.store.get_labels()
    }

    /// Borra las muestras del gesto y su acción asociada
    pub fn remove_gesture(&mut self, label: &str) {
        self.store.remove_label(label);
        self.dispatcher.config_mut().remove_action(label);
    }

    /// Un tick del bucle. `frame` es None cuando el detector no vio ninguna mano.
    pub fn process(&mut self, frame: Option<&LandmarkFrame>, now: Instant) -> FrameOutcome {
        let Some(frame) = frame else {
            self.current_prediction = "None".to_string();
            self.dispatcher.dispatch_at(None, now);
            return FrameOutcome::NoHand;
        };

        let features = normalize(&frame.landmarks, frame.width, frame.height);

        // 1. Modo grabación: cada frame con mano es una muestra
        if let Some(session) = self.recording.as_mut().filter(|s| s.is_active()) {
            if let Err(e) = self.store.add_sample(features, session.label()) {
                warn!("Muestra descartada: {}", e);
                return FrameOutcome::Recording {
                    label: session.label().to_string(),
                    frames_left: session.frames_left(),
                };
            }

            let finished = session.record_frame();
            let label = session.label().to_string();
            if !finished {
                return FrameOutcome::Recording {
                    frames_left: session.frames_left(),
                    label,
                };
            }

            // Entrenamiento automático al terminar
            self.recording = None;
            let trained = self.store.train();
            return FrameOutcome::TrainingComplete { label, trained };
        }

        // 2. Modo predicción
        if !self.store.is_trained() {
            return FrameOutcome::Untrained;
        }

        match self.store.predict(&features) {
            Some(label) => {
                self.current_prediction = label.clone();
                if self.dispatcher.dispatch_at(Some(&label), now) {
                    FrameOutcome::Action(label)
                } else {
                    FrameOutcome::Detected(label)
                }
            }
            None => {
                self.current_prediction = "None".to_string();
                self.dispatcher.dispatch_at(None, now);
                FrameOutcome::UnknownGesture
            }
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            prediction: self.current_prediction.clone(),
            is_recording: self.is_recording(),
            recording_progress: self
                .recording
                .as_ref()
                .map(RecordingSession::progress)
                .unwrap_or(0.0),
        }
    }
}
