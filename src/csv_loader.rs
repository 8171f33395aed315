use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use csv::ReaderBuilder;

use crate::types::{Landmark, LandmarkSet, NUM_LANDMARKS};

/// Carga una secuencia de manos desde un CSV en el formato
/// frame,landmark,x,y,z (con cabecera). Los frames se ordenan por índice;
/// los landmarks que falten en un frame se copian del frame anterior.
pub fn load_landmarks_from_csv(path: impl AsRef<Path>) -> Result<Vec<LandmarkSet>> {
    let path = path.as_ref();
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;
    read_landmarks(reader).with_context(|| format!("CSV inválido: {:?}", path))
}

fn read_landmarks<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<LandmarkSet>> {
    let mut frames: BTreeMap<usize, [Option<Landmark>; NUM_LANDMARKS]> = BTreeMap::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.with_context(|| format!("Fila {} ilegible", row))?;
        if record.len() < 5 {
            bail!("La fila {} no tiene 5 columnas", row);
        }

        let frame: usize = record[0]
            .parse()
            .with_context(|| format!("frame inválido en fila {}", row))?;
        let landmark: usize = record[1]
            .parse()
            .with_context(|| format!("landmark inválido en fila {}", row))?;
        ensure!(
            landmark < NUM_LANDMARKS,
            "Landmark {} fuera de rango (fila {})",
            landmark,
            row
        );

        let x: f32 = record[2].parse().with_context(|| format!("x inválido en fila {}", row))?;
        let y: f32 = record[3].parse().with_context(|| format!("y inválido en fila {}", row))?;
        let z: f32 = record[4].parse().with_context(|| format!("z inválido en fila {}", row))?;

        frames.entry(frame).or_insert([None; NUM_LANDMARKS])[landmark] = Some(Landmark::new(x, y, z));
    }

    ensure!(!frames.is_empty(), "El CSV no contiene datos");

    let mut last = [Landmark::default(); NUM_LANDMARKS];
    let sets = frames
        .into_values()
        .map(|points| {
            // Rellenar huecos repitiendo el último valor conocido de cada punto
            for (slot, point) in last.iter_mut().zip(points) {
                if let Some(point) = point {
                    *slot = point;
                }
            }
            last.to_vec()
        })
        .collect();

    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Vec<LandmarkSet>> {
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        read_landmarks(reader)
    }

    fn full_frame(frame: usize, offset: f32) -> String {
        (0..NUM_LANDMARKS)
            .map(|i| format!("{},{},{},{},0\n", frame, i, offset + i as f32, offset))
            .collect()
    }

    #[test]
    fn loads_frames_in_order() {
        let content = format!("frame,landmark,x,y,z\n{}{}", full_frame(1, 10.0), full_frame(0, 0.0));
        let frames = parse(&content).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][3], Landmark::new(3.0, 0.0, 0.0));
        assert_eq!(frames[1][3], Landmark::new(13.0, 10.0, 0.0));
    }

    #[test]
    fn missing_landmarks_come_from_previous_frame() {
        let content = format!(
            "frame,landmark,x,y,z\n{}1,0,9,9,9\n",
            full_frame(0, 0.0)
        );
        let frames = parse(&content).unwrap();
        assert_eq!(frames[1][0], Landmark::new(9.0, 9.0, 9.0));
        assert_eq!(frames[1][5], frames[0][5]);
        assert_eq!(frames[1].len(), NUM_LANDMARKS);
    }

    #[test]
    fn rejects_bad_rows() {
        assert!(parse("frame,landmark,x,y,z\n0,21,0,0,0\n").is_err());
        assert!(parse("frame,landmark,x,y,z\n0,1,abc,0,0\n").is_err());
        assert!(parse("frame,landmark,x,y,z\n").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join("gestureflow_missing_landmarks.csv");
        assert!(load_landmarks_from_csv(path).is_err());
    }
}
