use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use clap::Parser;

use gestureflow::actions::{ActionConfig, DryRunExecutor};
use gestureflow::config::Settings;
use gestureflow::csv_loader::load_landmarks_from_csv;
use gestureflow::dispatcher::ActionDispatcher;
use gestureflow::engine::GestureEngine;
use gestureflow::feature_extractor::normalize;
use gestureflow::gesture_classifier::GestureStore;
use gestureflow::types::LandmarkFrame;

/// Reproduce una grabación de landmarks contra el modelo guardado sin ejecutar acciones
#[derive(Parser, Debug)]
#[command(name = "replay_csv")]
struct ReplayOptions {
    /// CSV con columnas frame,landmark,x,y,z
    csv_path: PathBuf,

    /// Settings JSON file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Gesture snapshot (overrides settings)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Action configuration (overrides settings); defaults are used if omitted
    #[arg(long)]
    actions: Option<PathBuf>,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    /// Frame rate used to build synthetic timestamps
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Print the 63 normalized values of each frame
    #[arg(long)]
    dump_features: bool,
}

fn main() -> Result<()> {
    let opts = ReplayOptions::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gestureflow=warn".into()),
        )
        .init();

    ensure!(opts.fps > 0.0, "--fps debe ser positivo");
    ensure!(opts.width > 0 && opts.height > 0, "--width y --height deben ser positivos");

    let mut settings = Settings::load_or_default(opts.settings.as_deref())?;
    if let Some(model) = opts.model {
        settings.model_path = model;
    }

    println!("🎞️  Reproduciendo landmarks desde {:?}", opts.csv_path);
    let frames = load_landmarks_from_csv(&opts.csv_path)?;
    println!("ℹ️  {} frames a {} fps", frames.len(), opts.fps);

    // Sin tocar el fichero de acciones del usuario salvo que se indique
    let actions = match opts.actions {
        Some(path) => ActionConfig::load(&path)
            .with_context(|| format!("No se pudo cargar {:?}", path))?,
        None => ActionConfig::defaults(),
    };

    let store = GestureStore::open(&settings.model_path).with_policy(settings.prediction);
    ensure!(
        store.is_trained(),
        "El modelo {:?} no está entrenado",
        settings.model_path
    );
    println!("🧠 Gestos: {:?}", store.get_labels());

    let dispatcher = ActionDispatcher::new(actions, DryRunExecutor::new(), settings.dispatch.clone());
    let mut engine = GestureEngine::new(store, dispatcher);

    let start = Instant::now();
    let frame_period = Duration::from_secs_f64(1.0 / opts.fps);

    for (idx, landmarks) in frames.into_iter().enumerate() {
        let frame = LandmarkFrame {
            landmarks,
            width: opts.width,
            height: opts.height,
        };
        let now = start + frame_period * idx as u32;

        if opts.dump_features {
            let features = normalize(&frame.landmarks, frame.width, frame.height);
            println!("\n📊 Frame {:04}: {} features", idx, features.len());
            for (i, value) in features.iter().enumerate() {
                println!("  {:02}: {:>12.6}", i, value);
            }
        }

        let detail = engine.store().evaluate(&normalize(&frame.landmarks, frame.width, frame.height));
        let outcome = engine.process(Some(&frame), now);
        match detail {
            Ok(Some(p)) => println!(
                "{:04} {:<30} conf={:.2} sim={:.3}{}",
                idx,
                outcome.to_string(),
                p.confidence,
                p.similarity,
                if p.mirrored { " (espejo)" } else { "" }
            ),
            _ => println!("{:04} {}", idx, outcome),
        }
    }

    let performed = engine.dispatcher().executor().performed();
    println!("\n🎮 {} acciones disparadas", performed.len());
    for binding in performed {
        println!("  {} {}", binding.action_type, binding.command);
    }

    Ok(())
}
