use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};
use uinput::device::Device;
use uinput::event::keyboard;

use crate::actions::{ActionBinding, ActionExecutor, ActionType, ExecutorError, PredefinedAction};

/// Teclado virtual en /dev/uinput que ejecuta las acciones predefinidas.
/// Los comandos personalizados se lanzan con `sh -c` sin esperar.
pub struct HidOutput {
    dev: Device,
}

impl HidOutput {
    pub fn new() -> Result<Self, uinput::Error> {
        let dev = uinput::default()?
            .name("gestureflow-hid")?
            .event(uinput::event::Keyboard::All)?
            .create()?;

        Ok(HidOutput { dev })
    }

    fn sync(&mut self) -> Result<(), uinput::Error> {
        self.dev.synchronize()
    }

    fn tap(&mut self, key: keyboard::Keyboard) -> Result<(), uinput::Error> {
        self.dev.press(&key)?;
        self.sync()?;
        std::thread::sleep(Duration::from_millis(10));
        self.dev.release(&key)?;
        self.sync()
    }

    fn misc_tap(&mut self, key: keyboard::Misc) -> Result<(), uinput::Error> {
        self.tap(keyboard::Keyboard::Misc(key))
    }

    fn alt_tab(&mut self) -> Result<(), uinput::Error> {
        let alt = keyboard::Keyboard::Key(keyboard::Key::LeftAlt);
        self.dev.press(&alt)?;
        self.sync()?;
        std::thread::sleep(Duration::from_millis(10));
        self.tap(keyboard::Keyboard::Key(keyboard::Key::Tab))?;
        self.dev.release(&alt)?;
        self.sync()
    }

    /// Ejecuta un efecto integrado.
    /// uinput no puede leer el estado del mezclador: mute/unmute envían la tecla de silencio.
    pub fn send(&mut self, action: PredefinedAction) -> Result<(), uinput::Error> {
        use keyboard::Misc;

        match action {
            PredefinedAction::VolumeUp => self.misc_tap(Misc::VolumeUp),
            PredefinedAction::VolumeDown => self.misc_tap(Misc::VolumeDown),
            PredefinedAction::Mute | PredefinedAction::Unmute => self.misc_tap(Misc::Mute),
            PredefinedAction::NextTrack => self.misc_tap(Misc::NextSong),
            PredefinedAction::PreviousTrack => self.misc_tap(Misc::PreviousSong),
            PredefinedAction::PlayPause => self.misc_tap(Misc::PlayPause),
            PredefinedAction::Play => self.misc_tap(Misc::Play),
            PredefinedAction::Pause => self.misc_tap(Misc::Pause),
            PredefinedAction::Screenshot => self.tap(keyboard::Keyboard::Key(keyboard::Key::SysRq)),
            PredefinedAction::TabSwitch => self.alt_tab(),
            PredefinedAction::NoOp => Ok(()),
        }
    }
}

impl ActionExecutor for HidOutput {
    fn perform(&mut self, binding: &ActionBinding) -> Result<(), ExecutorError> {
        match binding.action_type {
            ActionType::Predefined => {
                let action: PredefinedAction = binding.command.parse()?;
                self.send(action)
                    .map_err(|e| ExecutorError::Hid(e.to_string()))
            }
            ActionType::Custom => spawn_custom(&binding.command),
        }
    }
}

/// Lanza un comando de shell del usuario sin bloquear el bucle de frames.
/// Un hilo aparte espera al hijo para que no quede zombi.
pub fn spawn_custom(command: &str) -> Result<(), ExecutorError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .spawn()
        .map_err(|source| ExecutorError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let command = command.to_string();
    std::thread::spawn(move || match child.wait() {
        Ok(status) if !status.success() => debug!("'{}' terminó con {}", command, status),
        Ok(_) => {}
        Err(e) => warn!("No se pudo esperar a '{}': {}", command, e),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Hijos de este proceso en estado Z según /proc
    fn zombie_children() -> usize {
        let me = std::process::id().to_string();
        let Ok(entries) = fs::read_dir("/proc") else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| fs::read_to_string(e.path().join("stat")).ok())
            .filter(|stat| {
                // pid (comm) estado ppid ...
                let Some(rest) = stat.rfind(')').map(|i| &stat[i + 1..]) else {
                    return false;
                };
                let mut fields = rest.split_whitespace();
                let state = fields.next();
                let ppid = fields.next();
                state == Some("Z") && ppid == Some(me.as_str())
            })
            .count()
    }

    #[test]
    fn custom_command_spawns() {
        assert!(spawn_custom("true").is_ok());
    }

    #[test]
    fn finished_commands_are_reaped() {
        for _ in 0..5 {
            spawn_custom("true").unwrap();
        }

        let mut zombies = usize::MAX;
        for _ in 0..40 {
            std::thread::sleep(Duration::from_millis(50));
            zombies = zombie_children();
            if zombies == 0 {
                break;
            }
        }
        assert_eq!(zombies, 0);
    }
}
