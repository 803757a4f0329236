//! Types de données pour le système audio
//!
//! Ce module définit les structures principales pour manipuler l'audio :
//! - SampleFrame : frame de capture (échantillons flottants, taille fixe)
//! - Pcm16Buffer : échantillons entiers 16 bits, le format du fil
//! - CaptureEvent : message du callback temps réel vers le contexte de contrôle
//! - PlaybackStatus : état lisible du planificateur de lecture

use crate::{AudioError, AudioResult};

/// Type pour un échantillon audio
///
/// Un échantillon représente l'amplitude du son à un instant donné.
/// - Valeurs entre -1.0 et +1.0
/// - 0.0 = silence
pub type Sample = f32;

/// Frame de capture complète
///
/// Contient exactement `frame_size` échantillons mono consécutifs, dans
/// l'ordre d'arrivée. Une fois remplie, la frame n'est plus modifiable :
/// les champs sont privés et seuls des accès en lecture sont exposés.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleFrame {
    samples: Vec<Sample>,
    sequence_number: u64,
}

impl SampleFrame {
    /// Crée une frame à partir d'échantillons déjà accumulés
    ///
    /// # Example
    /// ```rust
    /// use audio::SampleFrame;
    ///
    /// let frame = SampleFrame::new(vec![0.1, 0.2, -0.1, 0.0], 42);
    /// assert_eq!(frame.len(), 4);
    /// ```
    pub fn new(samples: Vec<Sample>, sequence_number: u64) -> Self {
        Self {
            samples,
            sequence_number,
        }
    }

    /// Les échantillons de la frame
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Numéro de séquence (0 pour la première frame d'une capture)
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Buffer d'échantillons PCM 16 bits signés
///
/// C'est la représentation échangée avec le service distant : un `i16` par
/// échantillon, sérialisé en little-endian puis encodé en base64.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pcm16Buffer {
    samples: Vec<i16>,
}

impl Pcm16Buffer {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Durée du buffer en secondes à la fréquence donnée
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.samples.len() as f64 / sample_rate as f64
    }

    /// Représentation brute little-endian (2 bytes par échantillon)
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    /// Reconstruit un buffer depuis des bytes little-endian
    ///
    /// # Erreurs
    /// - `AudioError::MalformedPayload` si la longueur n'est pas un multiple de 2
    pub fn from_le_bytes(bytes: &[u8]) -> AudioResult<Self> {
        if bytes.len() % 2 != 0 {
            return Err(AudioError::MalformedPayload(format!(
                "longueur impaire: {} bytes",
                bytes.len()
            )));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(Self { samples })
    }
}

impl From<Vec<i16>> for Pcm16Buffer {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

/// Message émis par le contexte temps réel de capture
///
/// Le callback audio ne renvoie jamais d'erreur directement : tout passe par
/// ce message, traité ensuite par le contexte de contrôle.
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureEvent {
    /// Frame complète déjà convertie en PCM16
    Frame { sequence_number: u64, pcm: Pcm16Buffer },

    /// Le périphérique a signalé une erreur (débranché, flux interrompu...)
    DeviceError(String),
}

/// État du planificateur de lecture, en lecture seule
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackStatus {
    /// Un buffer planifié n'a pas encore fini d'être joué
    pub active: bool,

    /// Prochaine position de planification (horloge du périphérique, secondes)
    pub next_start_time: f64,

    /// Nombre de buffers planifiés depuis l'ouverture
    pub buffers_scheduled: u64,

    /// Nombre de buffers jetés parce que la capture était active
    pub buffers_discarded: u64,
}
