//! Energy-based speech segmentation
//!
//! Cuts a stream of 16 kHz mono frames into utterance segments: speech
//! opens a segment, a run of silence closes it.

use serde::Deserialize;

use super::capture::calculate_energy;

/// Segmentation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SegmenterSettings {
    /// RMS energy above which a frame counts as speech
    pub energy_threshold: f32,
    /// Minimum segment length (in samples) worth transcribing
    pub min_speech_samples: usize,
    /// Silence (in samples) that closes a segment
    pub silence_samples: usize,
    /// Segments are cut at this length even without a pause
    pub max_segment_samples: usize,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            min_speech_samples: 4800, // 0.3 seconds
            silence_samples: 8000,    // 0.5 seconds
            max_segment_samples: 16_000 * 15,
        }
    }
}

/// What one frame did to the segmenter
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    /// No segment open
    Silence,
    /// A segment is open and accumulating
    Speech,
    /// A segment closed; holds its samples
    Complete(Vec<f32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Listening,
}

/// Splits audio into speech segments
#[derive(Debug)]
pub struct SpeechSegmenter {
    settings: SegmenterSettings,
    state: State,
    buffer: Vec<f32>,
    speech_samples: usize,
    silence_counter: usize,
}

impl SpeechSegmenter {
    #[must_use]
    pub const fn new(settings: SegmenterSettings) -> Self {
        Self {
            settings,
            state: State::Idle,
            buffer: Vec::new(),
            speech_samples: 0,
            silence_counter: 0,
        }
    }

    /// Feed one frame
    pub fn process(&mut self, samples: &[f32]) -> Activity {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.settings.energy_threshold;

        match self.state {
            State::Idle => {
                if !is_speech {
                    return Activity::Silence;
                }
                self.state = State::Listening;
                self.buffer.clear();
                self.buffer.extend_from_slice(samples);
                self.speech_samples = samples.len();
                self.silence_counter = 0;
                tracing::trace!(energy, "speech detected, listening");
                Activity::Speech
            }
            State::Listening => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.speech_samples += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                let long_enough = self.speech_samples > self.settings.min_speech_samples;

                if (self.silence_counter > self.settings.silence_samples && long_enough)
                    || self.buffer.len() >= self.settings.max_segment_samples
                {
                    tracing::debug!(samples = self.buffer.len(), "speech segment complete");
                    let segment = std::mem::take(&mut self.buffer);
                    self.reset();
                    return Activity::Complete(segment);
                }

                // Too much silence without enough speech: a click or a cough
                if self.silence_counter > self.settings.silence_samples * 2 {
                    tracing::trace!("timeout - resetting");
                    self.reset();
                    return Activity::Silence;
                }

                if is_speech {
                    Activity::Speech
                } else {
                    Activity::Silence
                }
            }
        }
    }

    /// Whether a segment is currently open
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state == State::Listening
    }

    /// Drop any open segment
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.buffer.clear();
        self.speech_samples = 0;
        self.silence_counter = 0;
    }
}
