//! Traits abstraits pour le système audio
//!
//! Ce module définit les interfaces (traits) que doivent implémenter
//! les périphériques audio. Cela permet de brancher cpal en production et
//! des implémentations simulées dans les tests, sans changer le pipeline.

use tokio::sync::mpsc;

use crate::{AudioConfig, AudioResult, CaptureEvent, Sample};

/// Trait pour capturer l'audio depuis un périphérique d'entrée
///
/// Ce trait abstrait permet d'utiliser différentes implémentations :
/// - CpalCapture : microphone réel via cpal
/// - SimulatedCapture : échantillons injectés par les tests
///
/// Le contexte temps réel n'envoie que des messages `CaptureEvent` dans le
/// channel fourni : il ne bloque jamais et ne remonte aucune erreur directement.
pub trait AudioCapture: Send {
    /// Démarre la capture et branche les frames sur `frames`
    ///
    /// Un appel alors que la capture est déjà active ne fait rien.
    ///
    /// # Erreurs
    /// - `AudioError::CaptureUnavailable` : permission refusée, micro occupé,
    ///   format non supporté. Aucune frame n'est émise dans ce cas.
    fn start(&mut self, frames: mpsc::Sender<CaptureEvent>) -> AudioResult<()>;

    /// Arrête la capture et libère le périphérique
    ///
    /// Idempotent : peut être appelé plusieurs fois, dans n'importe quel état.
    fn stop(&mut self);

    /// Vérifie si la capture est active
    fn is_capturing(&self) -> bool;

    /// Nombre de frames jetées car la file vers le contrôle était pleine
    fn dropped_frames(&self) -> u64 {
        0
    }

    /// Retourne des informations sur le périphérique utilisé
    fn device_info(&self) -> String {
        "Périphérique inconnu".to_string()
    }
}

/// Trait pour un périphérique de sortie capable de lecture planifiée
///
/// L'horloge du périphérique (`current_time`) est monotone et exprimée en
/// secondes. Un buffer planifié à `start_time` commence exactement à cet
/// instant de l'horloge ; si l'instant est déjà passé, la partie échue est
/// perdue.
pub trait OutputDevice: Send {
    /// Horloge courante du périphérique, en secondes
    fn current_time(&self) -> f64;

    /// Planifie des échantillons mono à jouer à partir de `start_time`
    ///
    /// # Erreurs
    /// - `AudioError::BufferOverflow` : file vers le callback pleine
    /// - `AudioError::DeviceDisconnected` : flux de sortie fermé
    fn schedule(&mut self, samples: Vec<Sample>, start_time: f64) -> AudioResult<()>;

    /// Abandonne tous les buffers planifiés pas encore joués
    fn clear(&mut self);

    /// Ferme le périphérique. Idempotent.
    fn close(&mut self);

    fn device_info(&self) -> String {
        "Périphérique de sortie inconnu".to_string()
    }
}

impl<T: OutputDevice + ?Sized> OutputDevice for Box<T> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn schedule(&mut self, samples: Vec<Sample>, start_time: f64) -> AudioResult<()> {
        (**self).schedule(samples, start_time)
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn device_info(&self) -> String {
        (**self).device_info()
    }
}

/// Fabrique de périphériques de sortie
///
/// La session ouvre un périphérique de sortie à la connexion et le garde
/// jusqu'au démontage complet.
pub trait OutputFactory: Send + Sync {
    fn open(&self, config: &AudioConfig) -> AudioResult<Box<dyn OutputDevice>>;
}
