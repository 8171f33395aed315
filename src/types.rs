use serde::{Deserialize, Serialize};

/// Un punto 3D de la mano tal como lo entrega el detector (coordenadas normalizadas de imagen)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<[f32; 3]> for Landmark {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Los 21 puntos de una mano en un frame. Vive un solo tick.
pub type LandmarkSet = Vec<Landmark>;

/// Vector de 63 valores: 21 puntos x (x, y, z) relativos a la muñeca
pub type FeatureVector = Vec<f32>;

/// Un frame procesado por el detector: una mano y las dimensiones de la imagen
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    pub landmarks: LandmarkSet,
    pub width: u32,
    pub height: u32,
}

/// Muestra etiquetada grabada por el usuario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureSample {
    pub features: FeatureVector,
    pub label: String,
}

/// Constantes del sistema
pub const NUM_LANDMARKS: usize = 21;
pub const NUM_AXES: usize = 3; // x, y, z
pub const FEATURE_LEN: usize = NUM_LANDMARKS * NUM_AXES; // 63
pub const WRIST: usize = 0;
