use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct FrameMetrics {
    pub cpu_frame_ms: f64,
    pub draw_calls: u32,
    pub sprites_submitted: u32,
    pub logic_steps: u32,
}

/// Per-frame performance collection with a short rolling history for p99
/// reporting. Reported through `tracing` every few seconds by the engine.
pub struct MetricsCollector {
    current_frame: FrameMetrics,
    frame_start: Option<Instant>,
    frame_history: Vec<FrameMetrics>,
    max_history: usize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            current_frame: FrameMetrics::default(),
            frame_start: None,
            frame_history: Vec::new(),
            // 5 seconds of history at 60 FPS.
            max_history: 300,
        }
    }

    pub fn begin_frame(&mut self) {
        self.frame_start = Some(Instant::now());
        self.current_frame = FrameMetrics::default();
    }

    pub fn record_logic_steps(&mut self, steps: u32) {
        self.current_frame.logic_steps += steps;
    }

    pub fn record_draw(&mut self, draw_calls: u32, sprites: u32) {
        self.current_frame.draw_calls = draw_calls;
        self.current_frame.sprites_submitted = sprites;
    }

    pub fn end_frame(&mut self) {
        if let Some(start) = self.frame_start.take() {
            self.current_frame.cpu_frame_ms = start.elapsed().as_secs_f64() * 1000.0;
        }
        self.frame_history.push(self.current_frame.clone());
        if self.frame_history.len() > self.max_history {
            self.frame_history.remove(0);
        }
    }

    pub fn current_metrics(&self) -> &FrameMetrics {
        &self.current_frame
    }

    pub fn performance_stats(&self) -> HashMap<String, f64> {
        let mut stats = HashMap::new();
        if self.frame_history.is_empty() {
            return stats;
        }
        let cpu_times: Vec<f64> = self.frame_history.iter().map(|f| f.cpu_frame_ms).collect();
        stats.insert("cpu_frame_mean_ms".to_string(), mean(&cpu_times));
        stats.insert("cpu_frame_p99_ms".to_string(), percentile(&cpu_times, 0.99));
        let draw_calls: Vec<f64> = self
            .frame_history
            .iter()
            .map(|f| f.draw_calls as f64)
            .collect();
        stats.insert(
            "draw_calls_max".to_string(),
            draw_calls.iter().copied().fold(0.0, f64::max),
        );
        stats
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("frame times are finite"));
    let index = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}
