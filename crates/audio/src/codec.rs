//! Codec du fil : conversion PCM16 et encodage base64
//!
//! Ce module remplace la compression par une conversion simple et sans état :
//! - `quantize` / `dequantize` : flottants [-1, 1] ↔ entiers 16 bits
//! - `encode` / `decode` : PCM16 ↔ texte base64 (bytes little-endian)
//!
//! L'échelle est volontairement asymétrique : les valeurs négatives sont
//! multipliées par 32768 et les positives par 32767, ce qui couvre toute la
//! plage d'un `i16`. La sortie doit rester identique bit à bit pour le
//! service distant, il ne faut donc pas "simplifier" cette formule.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::{AudioError, AudioResult, Pcm16Buffer, Sample, SampleFrame};

/// Convertit un échantillon flottant en entier 16 bits
///
/// L'échantillon est d'abord écrêté à [-1, 1] : une valeur hors plage sature
/// et n'est jamais "enroulée". Un NaN donne 0.
#[inline]
pub fn quantize_sample(sample: Sample) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Convertit un entier 16 bits en échantillon flottant (inverse de `quantize_sample`)
#[inline]
pub fn dequantize_sample(value: i16) -> Sample {
    if value < 0 {
        value as f32 / 32768.0
    } else {
        value as f32 / 32767.0
    }
}

/// Quantifie une frame complète en PCM16
///
/// La longueur du buffer produit est toujours celle de la frame.
pub fn quantize(frame: &SampleFrame) -> Pcm16Buffer {
    quantize_samples(frame.samples())
}

/// Quantifie une tranche d'échantillons quelconque
pub fn quantize_samples(samples: &[Sample]) -> Pcm16Buffer {
    Pcm16Buffer::new(samples.iter().map(|&s| quantize_sample(s)).collect())
}

/// Reconvertit un buffer PCM16 en échantillons flottants pour la lecture
pub fn dequantize(buffer: &Pcm16Buffer) -> Vec<Sample> {
    buffer.samples().iter().map(|&v| dequantize_sample(v)).collect()
}

/// Encode un buffer PCM16 en base64 standard
///
/// # Example
/// ```rust
/// use audio::{codec, Pcm16Buffer};
///
/// let encoded = codec::encode(&Pcm16Buffer::new(vec![1, 2]));
/// assert_eq!(encoded, "AQACAA==");
/// ```
pub fn encode(buffer: &Pcm16Buffer) -> String {
    STANDARD.encode(buffer.to_le_bytes())
}

/// Décode une chaîne base64 en buffer PCM16
///
/// # Erreurs
/// - `AudioError::MalformedPayload` si le texte n'est pas du base64 valide
///   ou si la longueur décodée n'est pas un multiple de 2
pub fn decode(encoded: &str) -> AudioResult<Pcm16Buffer> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| AudioError::MalformedPayload(format!("base64 invalide: {}", e)))?;

    Pcm16Buffer::from_le_bytes(&bytes)
}

/// Longueur décodée (en bytes) d'une charge utile base64
pub fn decoded_len(encoded: &str) -> AudioResult<usize> {
    STANDARD
        .decode(encoded)
        .map(|bytes| bytes.len())
        .map_err(|e| AudioError::MalformedPayload(format!("base64 invalide: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_asymmetric_scaling() {
        assert_eq!(quantize_sample(0.0), 0);
        assert_eq!(quantize_sample(1.0), 32767);
        assert_eq!(quantize_sample(-1.0), -32768);
        assert_eq!(quantize_sample(0.5), 16384); // round(16383.5)
        assert_eq!(quantize_sample(-0.5), -16384);
    }

    #[test]
    fn test_quantize_saturates() {
        assert_eq!(quantize_sample(3.0), 32767);
        assert_eq!(quantize_sample(-7.5), -32768);
        assert_eq!(quantize_sample(f32::INFINITY), 32767);
        assert_eq!(quantize_sample(f32::NAN), 0);
    }

    #[test]
    fn test_quantize_preserves_length() {
        let frame = SampleFrame::new(vec![0.25; 4096], 0);
        assert_eq!(quantize(&frame).len(), 4096);
    }

    #[test]
    fn test_quantization_error_bound() {
        // Balaye toute la plage [-1, 1] plus quelques valeurs hors plage
        let samples: Vec<f32> = (-20_000..=20_000)
            .map(|i| i as f32 / 20_000.0)
            .chain([0.999_99, -0.999_99, 1e-6, -1e-6])
            .collect();
        let frame = SampleFrame::new(samples.clone(), 0);

        let restored = dequantize(&quantize(&frame));

        for (original, restored) in samples.iter().zip(restored.iter()) {
            let error = (original - restored).abs();
            assert!(
                error <= 1.0 / 32768.0,
                "erreur {} trop grande pour {}",
                error,
                original
            );
        }
    }

    #[test]
    fn test_extremes_round_trip_exactly() {
        for value in [i16::MIN, -1, 0, 1, i16::MAX] {
            assert_eq!(quantize_sample(dequantize_sample(value)), value);
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let buffer = Pcm16Buffer::new(vec![0, 1, -1, 12345, -12345, i16::MAX, i16::MIN]);
        let encoded = encode(&buffer);

        assert_eq!(decode(&encoded).unwrap(), buffer);
    }

    #[test]
    fn test_encode_empty_buffer() {
        let encoded = encode(&Pcm16Buffer::default());
        assert_eq!(encoded, "");
        assert!(decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(matches!(decode("pas du base64 !"), Err(AudioError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_rejects_odd_byte_length() {
        // "AQID" = 3 bytes
        assert!(matches!(decode("AQID"), Err(AudioError::MalformedPayload(_))));
    }

    #[test]
    fn test_full_frame_is_8192_bytes() {
        let frame = SampleFrame::new(vec![-0.3; 4096], 0);
        let encoded = encode(&quantize(&frame));

        assert_eq!(decoded_len(&encoded).unwrap(), 8192);
    }
}
