/// Sesión de grabación: acumula N frames con mano para una etiqueta
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSession {
    label: String,
    total_frames: usize,
    frames_left: usize,
}

impl RecordingSession {
    pub fn new(label: &str, num_frames: usize) -> Self {
        Self {
            label: label.to_string(),
            total_frames: num_frames,
            frames_left: num_frames,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn frames_left(&self) -> usize {
        self.frames_left
    }

    pub fn is_active(&self) -> bool {
        self.frames_left > 0
    }

    /// Cuenta un frame grabado. Devuelve true si era el último.
    pub fn record_frame(&mut self) -> bool {
        self.frames_left = self.frames_left.saturating_sub(1);
        self.frames_left == 0
    }

    /// Progreso entre 0 y 1
    pub fn progress(&self) -> f32 {
        if self.total_frames == 0 {
            return 0.0;
        }
        1.0 - self.frames_left as f32 / self.total_frames as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_to_completion() {
        let mut session = RecordingSession::new("Peace", 3);
        assert!(session.is_active());
        assert!(!session.record_frame());
        assert!(!session.record_frame());
        assert!(session.record_frame());
        assert!(!session.is_active());
        assert_eq!(session.progress(), 1.0);
    }

    #[test]
    fn progress_is_fractional() {
        let mut session = RecordingSession::new("Fist", 4);
        session.record_frame();
        assert!((session.progress() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn empty_session_reports_zero_progress() {
        let session = RecordingSession::new("Empty", 0);
        assert!(!session.is_active());
        assert_eq!(session.progress(), 0.0);
    }
}
