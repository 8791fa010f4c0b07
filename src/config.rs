//! Session description for the demo binary

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::RENDER_QUANTUM_FRAMES;
use crate::element::ElementKind;
use crate::param::{ParameterChange, PARAMETER_RECORD_SIZE};
use crate::segment::SharedSegment;

/// Parameter index the synth reads as oscillator frequency (Hz).
pub const PARAM_FREQUENCY: u8 = 0;
/// Parameter index the synth reads as output amplitude.
pub const PARAM_AMPLITUDE: u8 = 1;

/// A parameter change sent `at_ms` after the session starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledChange {
    pub at_ms: u64,
    pub index: u8,
    pub value: f32,
}

impl ScheduledChange {
    pub fn change(&self) -> ParameterChange {
        ParameterChange::new(self.index, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Audio ring capacity, in render quanta.
    pub buffer_quanta: usize,
    /// Parameter ring capacity, in whole records.
    pub parameter_records: usize,
    /// 0 runs until Ctrl+C.
    pub duration_ms: u64,
    pub frequency: f32,
    pub amplitude: f32,
    pub automation: Vec<ScheduledChange>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            buffer_quanta: 8,
            parameter_records: 64,
            duration_ms: 2000,
            frequency: 440.0,
            amplitude: 0.2,
            automation: vec![
                ScheduledChange {
                    at_ms: 500,
                    index: PARAM_FREQUENCY,
                    value: 660.0,
                },
                ScheduledChange {
                    at_ms: 1000,
                    index: PARAM_AMPLITUDE,
                    value: 0.1,
                },
                ScheduledChange {
                    at_ms: 1500,
                    index: PARAM_FREQUENCY,
                    value: 330.0,
                },
            ],
        }
    }
}

impl SessionConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(anyhow!("sample_rate must be positive"));
        }
        if self.channels == 0 {
            return Err(anyhow!("channels must be positive"));
        }
        if RENDER_QUANTUM_FRAMES % self.channels as usize != 0 {
            return Err(anyhow!(
                "channels ({}) must evenly divide the {}-frame render quantum",
                self.channels,
                RENDER_QUANTUM_FRAMES
            ));
        }
        if self.buffer_quanta == 0 {
            return Err(anyhow!("buffer_quanta must be positive"));
        }
        if self.parameter_records == 0 {
            return Err(anyhow!("parameter_records must be positive"));
        }
        let audio_capacity = self
            .buffer_quanta
            .checked_mul(self.quantum_samples())
            .ok_or_else(|| anyhow!("buffer_quanta ({}) is too large", self.buffer_quanta))?;
        SharedSegment::storage_size(audio_capacity, ElementKind::F32)
            .with_context(|| format!("buffer_quanta ({}) is too large", self.buffer_quanta))?;
        let parameter_bytes = self
            .parameter_records
            .checked_mul(PARAMETER_RECORD_SIZE)
            .ok_or_else(|| {
                anyhow!("parameter_records ({}) is too large", self.parameter_records)
            })?;
        SharedSegment::storage_size(parameter_bytes, ElementKind::U8).with_context(|| {
            format!("parameter_records ({}) is too large", self.parameter_records)
        })?;
        if !self.frequency.is_finite() || !self.amplitude.is_finite() {
            return Err(anyhow!("frequency and amplitude must be finite"));
        }
        if let Some(bad) = self.automation.iter().find(|c| !c.value.is_finite()) {
            return Err(anyhow!("automation value at {}ms is not finite", bad.at_ms));
        }
        Ok(())
    }

    /// Interleaved samples in one render quantum.
    pub fn quantum_samples(&self) -> usize {
        RENDER_QUANTUM_FRAMES * self.channels as usize
    }

    /// Audio ring capacity in samples. Saturates on configs that
    /// [`SessionConfig::validate`] rejects.
    pub fn audio_capacity(&self) -> usize {
        self.buffer_quanta.saturating_mul(self.quantum_samples())
    }

    /// Wall-clock length of one render quantum.
    pub fn quantum_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(RENDER_QUANTUM_FRAMES as f64 / self.sample_rate as f64)
    }
}
