use crate::actions::{ActionConfig, ActionExecutor};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Parámetros de temporización del despachador
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchPolicy {
    /// Intervalo mínimo entre disparos de acciones continuas (default: 200ms)
    pub continuous_cooldown_ms: u64,
    /// Intervalo mínimo entre disparos de acciones discretas (default: 500ms)
    pub discrete_cooldown_ms: u64,
    /// Tiempo sin ver ningún gesto para olvidar el último disparado (default: 500ms)
    pub debounce_ms: u64,
    /// Comandos que se repiten mientras el gesto se mantiene
    pub continuous_commands: Vec<String>,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            continuous_cooldown_ms: 200,
            discrete_cooldown_ms: 500,
            debounce_ms: 500,
            continuous_commands: vec!["volume_up".to_string(), "volume_down".to_string()],
        }
    }
}

impl DispatchPolicy {
    fn continuous_cooldown(&self) -> Duration {
        Duration::from_millis(self.continuous_cooldown_ms)
    }

    fn discrete_cooldown(&self) -> Duration {
        Duration::from_millis(self.discrete_cooldown_ms)
    }

    fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn is_continuous(&self, command: &str) -> bool {
        self.continuous_commands.iter().any(|c| c == command)
    }
}

/// Estado de la política; solo lo modifica `dispatch_at`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionPolicyState {
    pub last_action_time: Option<Instant>,
    pub last_gesture_label: Option<String>,
    pub last_gesture_seen_time: Option<Instant>,
}

/// Máquina de estados que convierte el flujo de etiquetas por frame
/// en disparos de acciones sin rebotes.
///
/// - Acciones discretas: una vez por cada vez que se muestra el gesto.
/// - Acciones continuas: se repiten mientras se mantiene, como mucho
///   una vez por `continuous_cooldown`.
pub struct ActionDispatcher<E> {
    policy: DispatchPolicy,
    config: ActionConfig,
    executor: E,
    state: ActionPolicyState,
}

impl<E: ActionExecutor> ActionDispatcher<E> {
    pub fn new(config: ActionConfig, executor: E, policy: DispatchPolicy) -> Self {
        Self {
            policy,
            config,
            executor,
            state: ActionPolicyState::default(),
        }
    }

    pub fn config(&self) -> &ActionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ActionConfig {
        &mut self.config
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    pub fn state(&self) -> &ActionPolicyState {
        &self.state
    }

    /// Procesa un tick con la hora actual
    pub fn dispatch(&mut self, label: Option<&str>) -> bool {
        self.dispatch_at(label, Instant::now())
    }

    /// Procesa un tick. `None` es un latido: no hay mano o el clasificador se abstuvo.
    /// Devuelve true si se ejecutó una acción.
    pub fn dispatch_at(&mut self, label: Option<&str>, now: Instant) -> bool {
        // Sin gestos durante el debounce: el mismo gesto discreto puede volver a disparar
        let released = self
            .state
            .last_gesture_seen_time
            .map_or(true, |seen| elapsed(now, seen) > self.policy.debounce());
        if released && self.state.last_gesture_label.take().is_some() {
            debug!("Gesto liberado, se rearma el disparo");
        }

        let Some(label) = label else {
            return false;
        };
        let Some(binding) = self.config.get_action(label).cloned() else {
            return false;
        };

        self.state.last_gesture_seen_time = Some(now);

        let is_continuous = self.policy.is_continuous(&binding.command);
        let cooldown = if is_continuous {
            self.policy.continuous_cooldown()
        } else {
            self.policy.discrete_cooldown()
        };
        if let Some(last) = self.state.last_action_time {
            if elapsed(now, last) < cooldown {
                return false;
            }
        }

        // Una sola vez por gesto mantenido
        if !is_continuous && self.state.last_gesture_label.as_deref() == Some(label) {
            return false;
        }

        info!(
            "Ejecutando: {} ({}) | Cmd: {}",
            label, binding.action_type, binding.command
        );
        match self.executor.perform(&binding) {
            Ok(()) => {
                self.state.last_action_time = Some(now);
                self.state.last_gesture_label = Some(label.to_string());
                true
            }
            Err(e) => {
                warn!("Error ejecutando la acción de '{}': {}", label, e);
                false
            }
        }
    }
}

fn elapsed(now: Instant, earlier: Instant) -> Duration {
    now.saturating_duration_since(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionBinding, DryRunExecutor, ExecutorError};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn dispatcher() -> ActionDispatcher<DryRunExecutor> {
        let mut config = ActionConfig::empty();
        config.set_action("X", ActionBinding::predefined("screenshot"));
        config.set_action("Y", ActionBinding::predefined("tab_switch"));
        config.set_action("Up", ActionBinding::predefined("volume_up"));
        ActionDispatcher::new(config, DryRunExecutor::new(), DispatchPolicy::default())
    }

    struct FailingExecutor;

    impl ActionExecutor for FailingExecutor {
        fn perform(&mut self, binding: &ActionBinding) -> Result<(), ExecutorError> {
            Err(ExecutorError::Hid(format!("sin dispositivo para {}", binding.command)))
        }
    }

    #[test]
    fn discrete_fires_once_per_hold() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        assert!(d.dispatch_at(Some("X"), t0));
        assert!(!d.dispatch_at(Some("X"), t0 + ms(100)));
        assert_eq!(d.executor().performed().len(), 1);
    }

    #[test]
    fn held_discrete_never_refires() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        let fired = (0..40)
            .filter(|i| d.dispatch_at(Some("X"), t0 + ms(i * 50)))
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn discrete_refires_after_release() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        assert!(d.dispatch_at(Some("X"), t0));
        assert!(!d.dispatch_at(Some("X"), t0 + ms(100)));

        // Latidos sin gesto hasta superar el debounce
        for i in 1..=6 {
            assert!(!d.dispatch_at(None, t0 + ms(100 + i * 100)));
        }
        assert!(d.state().last_gesture_label.is_none());
        assert!(d.dispatch_at(Some("X"), t0 + ms(750)));
        assert_eq!(d.executor().performed().len(), 2);
    }

    #[test]
    fn brief_dropout_does_not_rearm() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        assert!(d.dispatch_at(Some("X"), t0));
        assert!(!d.dispatch_at(None, t0 + ms(200)));
        // Sigue dentro del debounce: cuenta como el mismo gesto mantenido
        assert!(!d.dispatch_at(Some("X"), t0 + ms(450)));
        assert!(!d.dispatch_at(Some("X"), t0 + ms(900)));
    }

    #[test]
    fn different_discrete_gesture_waits_for_cooldown() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        assert!(d.dispatch_at(Some("X"), t0));
        assert!(!d.dispatch_at(Some("Y"), t0 + ms(300)));
        assert!(d.dispatch_at(Some("Y"), t0 + ms(500)));
    }

    #[test]
    fn continuous_repeats_at_cooldown() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        let fired: Vec<u64> = (0..=20)
            .map(|i| i * 50)
            .filter(|&t| d.dispatch_at(Some("Up"), t0 + ms(t)))
            .collect();
        assert_eq!(fired, vec![0, 200, 400, 600, 800, 1000]);
    }

    #[test]
    fn none_tick_never_fires() {
        let mut d = dispatcher();
        assert!(!d.dispatch_at(None, Instant::now()));
        assert!(d.executor().performed().is_empty());
    }

    #[test]
    fn unmapped_label_is_ignored() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        assert!(!d.dispatch_at(Some("Unknown"), t0));
        assert!(d.state().last_gesture_seen_time.is_none());
    }

    #[test]
    fn executor_failure_does_not_advance_state() {
        let mut config = ActionConfig::empty();
        config.set_action("X", ActionBinding::predefined("screenshot"));
        let mut d = ActionDispatcher::new(config, FailingExecutor, DispatchPolicy::default());
        let t0 = Instant::now();

        assert!(!d.dispatch_at(Some("X"), t0));
        assert!(d.state().last_action_time.is_none());
        assert!(d.state().last_gesture_label.is_none());
    }

    #[test]
    fn last_action_time_only_moves_forward() {
        let mut d = dispatcher();
        let t0 = Instant::now();
        d.dispatch_at(Some("Up"), t0 + ms(1000));
        d.dispatch_at(Some("Up"), t0 + ms(500));
        assert_eq!(d.state().last_action_time, Some(t0 + ms(1000)));
    }
}
