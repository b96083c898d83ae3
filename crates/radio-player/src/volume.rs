//! Volume stage.
//!
//! Volume is a base-2 logarithmic level: effective gain is `2^level`, or `0` when muted.
//! The level is not clamped. [`VolumeControl`] is the only way to read or change the
//! state, so the render thread and control thread always see both fields together.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::frame::FrameSource;

/// Snapshot of a session's volume.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VolumeState {
    /// Gain exponent (log2 units).
    pub level: f64,
    /// Forces silence without touching `level`.
    pub muted: bool,
}

impl VolumeState {
    pub fn new(level: f64) -> Self {
        Self {
            level,
            muted: false,
        }
    }

    /// Multiplicative gain for this state.
    pub fn gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            2f64.powf(self.level) as f32
        }
    }
}

/// Shared handle to one session's [`VolumeState`].
#[derive(Clone, Debug, Default)]
pub struct VolumeControl {
    state: Arc<Mutex<VolumeState>>,
}

impl VolumeControl {
    pub fn new(initial: VolumeState) -> Self {
        Self {
            state: Arc::new(Mutex::new(initial)),
        }
    }

    fn guard(&self) -> MutexGuard<'_, VolumeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> VolumeState {
        *self.guard()
    }

    /// Add `delta` to the level; returns the new level.
    pub fn adjust(&self, delta: f64) -> f64 {
        let mut st = self.guard();
        st.level += delta;
        st.level
    }

    /// Set the level back to 0 (unity gain).
    pub fn reset(&self) {
        self.guard().level = 0.0;
    }

    /// Flip the mute flag; returns the new value.
    pub fn toggle_mute(&self) -> bool {
        let mut st = self.guard();
        st.muted = !st.muted;
        st.muted
    }
}

/// Applies a [`VolumeControl`] to every frame pulled from `inner`.
pub struct Volume<S> {
    inner: S,
    control: VolumeControl,
}

impl<S: FrameSource> Volume<S> {
    pub fn new(inner: S, control: VolumeControl) -> Self {
        Self { inner, control }
    }
}

impl<S: FrameSource> FrameSource for Volume<S> {
    fn channels(&self) -> usize {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn fill(&mut self, out: &mut [f32]) -> usize {
        let frames = self.inner.fill(out);
        let gain = self.control.snapshot().gain();
        if gain != 1.0 {
            for s in &mut out[..frames * self.inner.channels()] {
                *s *= gain;
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ConstSource;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn gain_is_power_of_two() {
        assert_eq!(VolumeState::new(0.0).gain(), 1.0);
        assert_eq!(VolumeState::new(1.0).gain(), 2.0);
        assert_eq!(VolumeState::new(-2.0).gain(), 0.25);
    }

    #[test]
    fn muted_gain_is_zero_and_keeps_level() {
        let control = VolumeControl::new(VolumeState::new(1.5));
        assert!(control.toggle_mute());
        assert_eq!(control.snapshot().gain(), 0.0);
        assert_eq!(control.snapshot().level, 1.5);
        assert!(!control.toggle_mute());
        assert_eq!(control.snapshot(), VolumeState::new(1.5));
    }

    #[test]
    fn adjust_accumulates_and_reset_zeroes() {
        let control = VolumeControl::default();
        for _ in 0..3 {
            control.adjust(0.5);
        }
        assert_eq!(control.adjust(-0.5), 1.0);
        control.reset();
        assert_eq!(control.snapshot().level, 0.0);
    }

    #[test]
    fn level_is_not_clamped() {
        let control = VolumeControl::default();
        for _ in 0..40 {
            control.adjust(-0.5);
        }
        assert_eq!(control.snapshot().level, -20.0);
        assert!(control.snapshot().gain() > 0.0);
    }

    #[test]
    fn volume_stage_scales_samples() {
        let control = VolumeControl::new(VolumeState::new(-1.0));
        let mut stage = Volume::new(ConstSource::new(2, 44_100, 0.8, None), control.clone());
        let mut out = [0.0; 8];
        assert_eq!(stage.fill(&mut out), 4);
        assert!(out.iter().all(|s| (*s - 0.4).abs() < 1e-6));

        control.toggle_mute();
        stage.fill(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn volume_stage_reports_exhaustion() {
        let mut stage = Volume::new(
            ConstSource::new(1, 44_100, 1.0, Some(3)),
            VolumeControl::default(),
        );
        let mut out = [0.0; 8];
        assert_eq!(stage.fill(&mut out), 3);
        assert_eq!(stage.fill(&mut out), 0);
    }

    #[test]
    fn concurrent_changes_never_tear_a_pull() {
        let control = VolumeControl::default();
        let mut stage = Volume::new(ConstSource::new(2, 44_100, 1.0, None), control.clone());
        let stop = std::sync::Arc::new(AtomicBool::new(false));

        let writer = {
            let control = control.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut i = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    match i % 4 {
                        0 => {
                            control.adjust(0.5);
                        }
                        1 => {
                            control.toggle_mute();
                        }
                        2 => {
                            control.adjust(-0.5);
                        }
                        _ => control.reset(),
                    }
                    i += 1;
                }
            })
        };

        let mut out = vec![0.0; 2 * 256];
        for _ in 0..2_000 {
            let frames = stage.fill(&mut out);
            assert_eq!(frames, 256);
            let first = out[0];
            assert!(out.iter().all(|s| *s == first));
            // The writer only ever leaves the level at 0 or 0.5.
            assert!(first == 0.0 || first == 1.0 || first == 2f64.powf(0.5) as f32);
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }
}
