//! Voice processing module
//!
//! Handles microphone ownership, speech capture with silence endpointing,
//! streaming recognition and wake word detection.

mod capture;
mod session;
mod stt;
mod vad;
mod wake_word;

pub use capture::{
    AudioHandle, AudioSource, AudioStream, CpalSource, DeviceGuard, MicLease, MicOwner,
    Microphone, calculate_energy, classify_device_error, samples_to_wav,
};
pub use session::{CaptureOutcome, SpeechCaptureSession, UtteranceCapture};
pub use stt::{
    RecognitionEvent, RecognitionPipeline, SpeechRecognizer, SpeechToText, WhisperRecognizer,
};
pub use vad::{Activity, SegmenterSettings, SpeechSegmenter};
pub use wake_word::{
    DetectionSubscription, KeywordSpotter, PhraseSpotter, PhraseSpotterBackend, SpotterBackend,
    WakeWordDetection, WakeWordDetector, WakeWordStatus,
};
