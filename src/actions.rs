use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Unknown predefined command: {0}")]
    UnknownCommand(String),

    #[error("HID error: {0}")]
    Hid(String),

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Tipo de acción: efecto integrado o comando externo opaco
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Predefined,
    Custom,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Predefined => write!(f, "predefined"),
            ActionType::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "predefined" => Ok(ActionType::Predefined),
            "custom" => Ok(ActionType::Custom),
            other => Err(format!("tipo de acción desconocido: {other}")),
        }
    }
}

/// Acción asociada a una etiqueta de gesto
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionBinding {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub command: String,
}

impl ActionBinding {
    pub fn predefined(command: &str) -> Self {
        Self {
            action_type: ActionType::Predefined,
            command: command.to_string(),
        }
    }

    pub fn custom(command: &str) -> Self {
        Self {
            action_type: ActionType::Custom,
            command: command.to_string(),
        }
    }
}

/// Efectos integrados que entiende el ejecutor HID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredefinedAction {
    VolumeUp,
    VolumeDown,
    Mute,
    Unmute,
    NextTrack,
    PreviousTrack,
    PlayPause,
    Play,
    Pause,
    Screenshot,
    TabSwitch,
    NoOp,
}

impl FromStr for PredefinedAction {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PredefinedAction::*;

        Ok(match s {
            "volume_up" => VolumeUp,
            "volume_down" => VolumeDown,
            "mute" => Mute,
            "unmute" => Unmute,
            "next_track" => NextTrack,
            "previous_track" => PreviousTrack,
            "play_pause" => PlayPause,
            "play" => Play,
            "pause" => Pause,
            "screenshot" => Screenshot,
            "tab_switch" => TabSwitch,
            "none" => NoOp,
            other => return Err(ExecutorError::UnknownCommand(other.to_string())),
        })
    }
}

/// Quien realiza efectivamente la acción (teclado virtual, shell, ...)
pub trait ActionExecutor {
    fn perform(&mut self, binding: &ActionBinding) -> Result<(), ExecutorError>;
}

/// Ejecutor que solo registra lo que se habría hecho
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    performed: Vec<ActionBinding>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn performed(&self) -> &[ActionBinding] {
        &self.performed
    }
}

impl ActionExecutor for DryRunExecutor {
    fn perform(&mut self, binding: &ActionBinding) -> Result<(), ExecutorError> {
        if binding.action_type == ActionType::Predefined {
            binding.command.parse::<PredefinedAction>()?;
        }
        info!("[dry-run] {} {}", binding.action_type, binding.command);
        self.performed.push(binding.clone());
        Ok(())
    }
}

/// Mapa etiqueta → acción, persistido como JSON
#[derive(Debug, Clone, Default)]
pub struct ActionConfig {
    bindings: BTreeMap<String, ActionBinding>,
    path: Option<PathBuf>,
}

impl ActionConfig {
    /// Mapeos por defecto cuando no existe archivo de configuración
    pub fn defaults() -> Self {
        let bindings = [
            ("Volume Up", "volume_up"),
            ("Volume Down", "volume_down"),
            ("Mute", "mute"),
            ("Unmute", "unmute"),
            ("Next Track", "next_track"),
            ("Play", "play"),
            ("Pause", "pause"),
            ("Previous Track", "previous_track"),
            ("Screenshot", "screenshot"),
            ("Tab Switch", "tab_switch"),
            ("Neutral", "none"),
        ]
        .into_iter()
        .map(|(label, cmd)| (label.to_string(), ActionBinding::predefined(cmd)))
        .collect();

        Self {
            bindings,
            path: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Carga desde `path`; si no existe, escribe los valores por defecto
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let bindings: BTreeMap<String, ActionBinding> = serde_json::from_str(&content)?;
            info!("{} acciones cargadas de {}", bindings.len(), path.display());
            return Ok(Self {
                bindings,
                path: Some(path),
            });
        }

        let config = Self {
            path: Some(path),
            ..Self::defaults()
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.bindings)?)?;
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!("No se pudo guardar la configuración de acciones: {}", e);
        }
    }

    pub fn get_action(&self, label: &str) -> Option<&ActionBinding> {
        self.bindings.get(label)
    }

    pub fn set_action(&mut self, label: &str, binding: ActionBinding) {
        self.bindings.insert(label.to_string(), binding);
        self.persist();
    }

    pub fn remove_action(&mut self, label: &str) -> Option<ActionBinding> {
        let removed = self.bindings.remove(label);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ActionBinding)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
