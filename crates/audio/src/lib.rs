//! Crate audio pour le relais vocal temps réel
//!
//! Ce crate gère toute la chaîne audio :
//! - Capture microphone avec cpal, découpée en frames fixes
//! - Conversion PCM16 et encodage base64 pour le fil
//! - Lecture planifiée sans trou avec cpal
//! - Périphériques simulés pour les tests

pub mod config;      // Configuration audio
pub mod types;       // Types de données (SampleFrame, Pcm16Buffer, etc.)
pub mod traits;      // Traits abstraits
pub mod capture;     // Découpage en frames + capture cpal
pub mod playback;    // Planification de lecture + sortie cpal
pub mod codec;       // PCM16 et base64
pub mod error;       // Gestion d'erreurs

// Réexports pour faciliter l'utilisation
pub use config::*;
pub use types::*;
pub use traits::*;
pub use error::*;

// Réexports des implémentations principales
pub use capture::{CaptureFramer, CpalCapture, FrameForwarder, SimulatedCapture, SimulatedMicrophone};
pub use playback::{
    CpalOutput, CpalOutputFactory, OutputTimeline, PlaybackScheduler, ScheduledBuffer, SimulatedOutput,
    SimulatedOutputFactory, SimulatedOutputHandle,
};
