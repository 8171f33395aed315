/*
gestureflow - reconocimiento de gestos de mano en tiempo real

Sistema que:
1. Lee landmarks de mano (21 puntos) desde un detector externo por stdin, en JSON por líneas
2. Graba muestras etiquetadas y entrena un clasificador MLP local
3. Predice el gesto de cada frame con doble orientación (mano izquierda/derecha)
4. Dispara acciones (teclado virtual o comandos de shell) sin rebotes

Formato de cada línea del detector:
    {"width":320,"height":240,"hands":[[[x,y,z], ... 21 puntos]]}

Para grabar un gesto y después usarlo:
    detector | ./target/release/gestureflow run --record Peace --frames 50
    detector | ./target/release/gestureflow run

Sin permisos sobre /dev/uinput:
    detector | ./target/release/gestureflow run --dry-run
*/

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, select, tick};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use gestureflow::actions::{ActionBinding, ActionConfig, ActionExecutor, ActionType, DryRunExecutor};
use gestureflow::config::Settings;
use gestureflow::engine::{FrameOutcome, GestureEngine};
use gestureflow::gesture_classifier::GestureStore;
use gestureflow::hid::HidOutput;
use gestureflow::landmark_source::{get_stats, stream_landmarks, SourceMessage};

#[derive(Parser, Debug)]
#[command(name = "gestureflow", version, about = "Hand gesture recognition daemon")]
struct Cli {
    /// Settings JSON file (all fields optional)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Gesture snapshot path (overrides settings)
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Action configuration path (overrides settings)
    #[arg(long, global = true)]
    actions: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read landmarks from stdin, predict and dispatch actions (default)
    Run {
        /// Record this label before switching to prediction
        #[arg(long)]
        record: Option<String>,

        /// Frames to record (default: settings.recording_frames)
        #[arg(long)]
        frames: Option<usize>,

        /// Log actions instead of touching /dev/uinput
        #[arg(long)]
        dry_run: bool,
    },
    /// List recorded gesture labels
    Labels,
    /// Retrain the classifier from the stored samples
    Train,
    /// Delete a gesture's samples and its action mapping
    Remove { label: String },
    /// Show the action configuration
    Actions,
    /// Bind a gesture label to an action
    SetAction {
        label: String,
        command: String,
        #[arg(long = "type", default_value = "predefined")]
        action_type: ActionType,
    },
    /// Remove the action bound to a label
    RemoveAction { label: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gestureflow=info".into()),
        )
        .init();

    let mut settings = Settings::load_or_default(cli.settings.as_deref())?;
    if let Some(model) = cli.model {
        settings.model_path = model;
    }
    if let Some(actions) = cli.actions {
        settings.actions_path = actions;
    }

    match cli.command.unwrap_or(Command::Run {
        record: None,
        frames: None,
        dry_run: false,
    }) {
        Command::Run {
            record,
            frames,
            dry_run,
        } => {
            let frames = frames.unwrap_or(settings.recording_frames);
            if dry_run {
                run(&settings, DryRunExecutor::new(), record, frames)
            } else {
                let hid = HidOutput::new()
                    .context("No se pudo inicializar /dev/uinput (prueba con --dry-run)")?;
                info!("HID inicializado (/dev/uinput)");
                run(&settings, hid, record, frames)
            }
        }
        Command::Labels => {
            let store = GestureStore::open(&settings.model_path);
            for label in store.get_labels() {
                println!("{}", label);
            }
            Ok(())
        }
        Command::Train => {
            let mut store = GestureStore::open(&settings.model_path);
            if !store.train() {
                bail!("No hay muestras en {:?}", settings.model_path);
            }
            println!("Modelo entrenado: {:?}", store.get_labels());
            Ok(())
        }
        Command::Remove { label } => {
            let mut engine = GestureEngine::from_settings(&settings, DryRunExecutor::new())?;
            engine.remove_gesture(&label);
            println!("Gesto '{}' eliminado", label);
            Ok(())
        }
        Command::Actions => {
            let config = ActionConfig::load(&settings.actions_path)?;
            for (label, binding) in config.iter() {
                println!(
                    "{:<20} {:<11} {}",
                    label,
                    binding.action_type.to_string(),
                    binding.command
                );
            }
            Ok(())
        }
        Command::SetAction {
            label,
            command,
            action_type,
        } => {
            let mut config = ActionConfig::load(&settings.actions_path)?;
            let binding = ActionBinding {
                action_type,
                command,
            };
            config.set_action(&label, binding);
            Ok(())
        }
        Command::RemoveAction { label } => {
            let mut config = ActionConfig::load(&settings.actions_path)?;
            if config.remove_action(&label).is_none() {
                warn!("'{}' no tenía ninguna acción", label);
            }
            Ok(())
        }
    }
}

/// Bucle principal: un hilo lee stdin y el motor consume los frames
fn run<E: ActionExecutor>(
    settings: &Settings,
    executor: E,
    record: Option<String>,
    frames: usize,
) -> Result<()> {
    let mut engine = GestureEngine::from_settings(settings, executor)?;
    info!(
        "Motor listo: {} gestos {:?}, entrenado={}",
        engine.labels().len(),
        engine.labels(),
        engine.store().is_trained()
    );

    if let Some(label) = record {
        engine.start_recording(&label, frames)?;
    }

    let (tx, rx) = bounded::<SourceMessage>(settings.frame_queue.max(1));
    std::thread::spawn(move || {
        let stdin = io::stdin();
        stream_landmarks(stdin.lock(), tx);
    });

    let status_ticker = tick(Duration::from_millis(settings.status_interval_ms.max(1)));
    let mut last_status = String::new();

    info!("Esperando landmarks en stdin...");

    loop {
        select! {
            recv(rx) -> msg => {
                let Ok(frame) = msg else {
                    let stats = get_stats();
                    info!(
                        "Detector cerrado ({} frames, {} inválidos)",
                        stats.frames, stats.malformed
                    );
                    return Ok(());
                };

                match engine.process(frame.as_ref(), Instant::now()) {
                    outcome @ FrameOutcome::TrainingComplete { .. } => {
                        info!("{} ({:?})", outcome, engine.labels());
                    }
                    outcome => debug!("{}", outcome),
                }
            }
            recv(status_ticker) -> _ => {
                // Solo se publica cuando el estado cambia
                let status = serde_json::to_string(&engine.status())?;
                if status != last_status {
                    info!(target: "gestureflow::status", "{}", status);
                    last_status = status;
                }
            }
        }
    }
}
