use crate::types::{FeatureVector, Landmark, NUM_AXES, WRIST};

/// Normaliza los 21 puntos de una mano a un vector de 63 valores
/// invariante a traslación (relativo a la muñeca), a la relación de aspecto
/// de la cámara y a la escala (el punto más lejano queda a distancia 1).
///
/// Layout: [x0, y0, z0, x1, y1, z1, ...]. El espejado depende de que
/// la coordenada x quede en los índices 0, 3, 6, ...
pub fn normalize(landmarks: &[Landmark], frame_width: u32, frame_height: u32) -> FeatureVector {
    let Some(wrist) = landmarks.get(WRIST).copied() else {
        return Vec::new();
    };
    let aspect = frame_width as f32 / frame_height as f32;

    // Primera pasada: deltas respecto a la muñeca corregidos por aspecto
    let mut deltas = Vec::with_capacity(landmarks.len());
    let mut max_dist = 0.0f32;
    for lm in landmarks {
        let dx = (lm.x - wrist.x) * aspect;
        let dy = lm.y - wrist.y;
        let dz = (lm.z - wrist.z) * aspect;

        let dist = (dx * dx + dy * dy + dz * dz).sqrt();
        if dist > max_dist {
            max_dist = dist;
        }
        deltas.push([dx, dy, dz]);
    }

    // Segunda pasada: invarianza de escala
    let scale = if max_dist > 0.0 { max_dist } else { 1.0 };
    let mut features = Vec::with_capacity(deltas.len() * NUM_AXES);
    for [dx, dy, dz] in deltas {
        features.extend([dx / scale, dy / scale, dz / scale]);
    }
    features
}

/// Refleja el vector sobre el eje horizontal (niega cada x).
/// Sintetiza la pose de la mano contraria. Aplicarlo dos veces devuelve el original.
pub fn mirror(features: &[f32]) -> FeatureVector {
    let mut mirrored = features.to_vec();
    for value in mirrored.iter_mut().step_by(NUM_AXES) {
        *value = -*value;
    }
    mirrored
}

/// Distancia euclídea entre dos vectores de características
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
