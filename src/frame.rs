use std::time::Instant;

/// Frame metadata handed to every per-frame hook
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub number: u64,
    pub time: f32,
    pub delta: f32,
}

impl FrameInfo {
    pub fn new(number: u64, time: f32, delta: f32) -> Self {
        Self { number, time, delta }
    }
}

/// Source of frame timing: wall clock for windowed playback, fixed step for headless runs
#[derive(Debug)]
pub enum FrameClock {
    Wall { start: Instant, last: Instant, number: u64 },
    Fixed { step: f32, number: u64 },
}

impl FrameClock {
    pub fn wall() -> Self {
        let now = Instant::now();
        Self::Wall {
            start: now,
            last: now,
            number: 0,
        }
    }

    /// Deterministic clock advancing `1 / hz` seconds per frame
    pub fn fixed(hz: f32) -> Self {
        Self::Fixed {
            step: 1.0 / hz,
            number: 0,
        }
    }

    pub fn frame_number(&self) -> u64 {
        match self {
            Self::Wall { number, .. } | Self::Fixed { number, .. } => *number,
        }
    }
}

impl Iterator for FrameClock {
    type Item = FrameInfo;

    fn next(&mut self) -> Option<FrameInfo> {
        let info = match self {
            Self::Wall { start, last, number } => {
                let now = Instant::now();
                let info = FrameInfo::new(
                    *number,
                    now.duration_since(*start).as_secs_f32(),
                    now.duration_since(*last).as_secs_f32(),
                );
                *last = now;
                *number += 1;
                info
            }
            Self::Fixed { step, number } => {
                let info = FrameInfo::new(*number, *number as f32 * *step, *step);
                *number += 1;
                info
            }
        };
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_steps() {
        let frames: Vec<_> = FrameClock::fixed(50.0).take(3).collect();
        assert_eq!(frames[0].number, 0);
        assert_eq!(frames[2].number, 2);
        assert!((frames[2].time - 0.04).abs() < 1e-6);
        assert!((frames[1].delta - 0.02).abs() < 1e-6);
    }

    #[test]
    fn wall_clock_counts_frames() {
        let mut clock = FrameClock::wall();
        clock.next();
        let second = clock.next().unwrap();
        assert_eq!(second.number, 1);
        assert!(second.delta >= 0.0);
        assert_eq!(clock.frame_number(), 2);
    }
}
