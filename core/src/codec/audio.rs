//! Audio callback normalization
//!
//! Both sample callbacks end up as one [`AudioData`] batch of interleaved
//! stereo samples.

use retrohost_shared::AudioData;

/// Batch from the single-sample callback
pub fn sample_pair(left: i16, right: i16, sample_rate: f64) -> AudioData {
    AudioData {
        sample_rate,
        samples: vec![left, right],
    }
}

/// Batch from the batch callback; `interleaved` holds `frames * 2` samples
pub fn sample_batch(interleaved: &[i16], sample_rate: f64) -> AudioData {
    AudioData {
        sample_rate,
        samples: interleaved.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sample_is_one_stereo_frame() {
        let batch = sample_pair(-5, 7, 44100.0);
        assert_eq!(batch.samples, vec![-5, 7]);
        assert_eq!(batch.frames(), 1);
        assert_eq!(batch.sample_rate, 44100.0);
    }

    #[test]
    fn test_batch_keeps_interleaving() {
        let raw = [1, -1, 2, -2, 3, -3];
        let batch = sample_batch(&raw, 32000.0);
        assert_eq!(batch.frames(), 3);
        assert_eq!(batch.samples, raw);
    }
}
