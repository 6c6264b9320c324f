//! Loop throughput

use tokio::time::Instant;

/// Frames-per-second over fixed windows of frames
#[derive(Debug)]
pub struct FpsCounter {
    window: u32,
    frames: u32,
    window_start: Instant,
    fps: f64,
}

impl FpsCounter {
    pub fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            frames: 0,
            window_start: Instant::now(),
            fps: 0.0,
        }
    }

    /// Count one frame; yields the new rate each time a window completes
    pub fn tick(&mut self) -> Option<f64> {
        self.frames += 1;
        if self.frames < self.window {
            return None;
        }

        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.fps = self.frames as f64 / elapsed;
        }
        self.frames = 0;
        self.window_start = Instant::now();
        Some(self.fps)
    }

    /// Rate measured over the last complete window
    pub fn fps(&self) -> f64 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_rate_per_window() {
        let mut counter = FpsCounter::new(10);
        for _ in 0..9 {
            tokio::time::advance(Duration::from_millis(50)).await;
            assert!(counter.tick().is_none());
        }
        tokio::time::advance(Duration::from_millis(50)).await;
        let fps = counter.tick().unwrap();
        assert!((fps - 20.0).abs() < 1e-6);
        assert_eq!(counter.fps(), fps);

        // Next window starts over
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(counter.tick().is_none());
    }
}
