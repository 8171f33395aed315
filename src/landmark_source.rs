use crossbeam_channel::Sender;
use serde::Deserialize;
use std::io::BufRead;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

use crate::types::{Landmark, LandmarkFrame, NUM_LANDMARKS};

/// Lo que llega por el canal: `None` es un frame procesado sin mano
pub type SourceMessage = Option<LandmarkFrame>;

/// Estadísticas de recepción del detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames: u32,
    pub empty_frames: u32,
    pub malformed: u32,
}

// Contadores globales para el hilo de estado
static FRAMES: AtomicU32 = AtomicU32::new(0);
static EMPTY_FRAMES: AtomicU32 = AtomicU32::new(0);
static MALFORMED: AtomicU32 = AtomicU32::new(0);

/// Una línea del detector: `{"width":320,"height":240,"hands":[[[x,y,z], ...]]}`
#[derive(Debug, Deserialize)]
struct WireFrame {
    width: u32,
    height: u32,
    #[serde(default)]
    hands: Vec<Vec<[f32; 3]>>,
}

/// Decodifica una línea. Devuelve Err con el motivo si no es válida.
pub fn parse_line(line: &str) -> Result<SourceMessage, String> {
    let wire: WireFrame = serde_json::from_str(line).map_err(|e| e.to_string())?;
    if wire.width == 0 || wire.height == 0 {
        return Err(format!("dimensiones de imagen inválidas: {}x{}", wire.width, wire.height));
    }

    // Solo se usa la primera mano
    let Some(hand) = wire.hands.into_iter().next() else {
        return Ok(None);
    };
    if hand.len() != NUM_LANDMARKS {
        return Err(format!(
            "se esperaban {} landmarks, llegaron {}",
            NUM_LANDMARKS,
            hand.len()
        ));
    }

    Ok(Some(LandmarkFrame {
        landmarks: hand.into_iter().map(Landmark::from).collect(),
        width: wire.width,
        height: wire.height,
    }))
}

/// Lee el flujo del detector línea a línea y envía cada frame por el canal.
/// Termina al llegar a EOF o cuando el receptor se cierra.
pub fn stream_landmarks<R: BufRead>(reader: R, tx: Sender<SourceMessage>) -> SourceStats {
    let mut stats = SourceStats::default();

    for (line_idx, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Error leyendo del detector: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = match parse_line(&line) {
            Ok(message) => message,
            Err(reason) => {
                stats.malformed += 1;
                MALFORMED.fetch_add(1, Ordering::Relaxed);
                debug!("Línea {} descartada: {}", line_idx + 1, reason);
                continue;
            }
        };

        stats.frames += 1;
        FRAMES.fetch_add(1, Ordering::Relaxed);
        if message.is_none() {
            stats.empty_frames += 1;
            EMPTY_FRAMES.fetch_add(1, Ordering::Relaxed);
        }

        if tx.send(message).is_err() {
            debug!("Receptor cerrado, fin de la lectura");
            break;
        }
    }

    info!(
        "Fin del flujo del detector: {} frames ({} sin mano, {} inválidos)",
        stats.frames, stats.empty_frames, stats.malformed
    );
    stats
}

/// Totales acumulados de todos los flujos del proceso
pub fn get_stats() -> SourceStats {
    SourceStats {
        frames: FRAMES.load(Ordering::Relaxed),
        empty_frames: EMPTY_FRAMES.load(Ordering::Relaxed),
        malformed: MALFORMED.load(Ordering::Relaxed),
    }
}
