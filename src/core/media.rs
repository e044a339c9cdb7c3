//! Multimodal inputs attached to a slot.
//!
//! Media buffers hold decoded payloads (RGB images, mono PCM audio) that the
//! external vision/audio encoder turns into embeddings. A slot owns its
//! buffers for as long as the request occupies it.

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};

/// A decoded multimodal input.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaBuffer {
    /// Packed RGB8 image, row-major.
    Image {
        id: Option<String>,
        width: usize,
        height: usize,
        rgb: Vec<u8>,
    },
    /// Mono PCM samples in `[-1.0, 1.0]`.
    Audio {
        id: Option<String>,
        samples: Vec<f32>,
    },
}

impl MediaBuffer {
    /// Create an image buffer from packed RGB8 pixels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Media`] if the image is empty or the payload length
    /// is not `width * height * 3`.
    ///
    /// # Example
    ///
    /// ```
    /// use nano_slots::core::media::MediaBuffer;
    ///
    /// let image = MediaBuffer::image(Some("cam0".into()), 2, 1, vec![0; 6]).unwrap();
    /// assert_eq!(image.id(), Some("cam0"));
    ///
    /// assert!(MediaBuffer::image(None, 2, 2, vec![0; 6]).is_err());
    /// ```
    pub fn image(id: Option<String>, width: usize, height: usize, rgb: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Media(format!("empty image {width}x{height}")));
        }
        let expected = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(3))
            .ok_or_else(|| Error::Media(format!("image {width}x{height} is too large")))?;
        if rgb.len() != expected {
            return Err(Error::Media(format!(
                "image {width}x{height} needs {expected} bytes, got {}",
                rgb.len()
            )));
        }
        Ok(Self::Image {
            id,
            width,
            height,
            rgb,
        })
    }

    /// Create an audio buffer from mono samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Media`] if `samples` is empty.
    pub fn audio(id: Option<String>, samples: Vec<f32>) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::Media("empty audio buffer".to_string()));
        }
        Ok(Self::Audio { id, samples })
    }

    /// Get the caller-supplied identifier (used for KV cache reuse keys).
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Image { id, .. } | Self::Audio { id, .. } => id.as_deref(),
        }
    }

    /// Check whether this is an audio buffer.
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio { .. })
    }

    /// Payload size in bytes.
    pub fn num_bytes(&self) -> usize {
        match self {
            Self::Image { rgb, .. } => rgb.len(),
            Self::Audio { samples, .. } => samples.len() * std::mem::size_of::<f32>(),
        }
    }

    /// Convert the payload into a tensor for the encoder.
    ///
    /// Images become `[height, width, 3]` u8 tensors, audio a `[n_samples]`
    /// f32 tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let tensor = match self {
            Self::Image {
                width, height, rgb, ..
            } => Tensor::from_slice(rgb.as_slice(), (*height, *width, 3), device)?,
            Self::Audio { samples, .. } => {
                Tensor::from_slice(samples.as_slice(), samples.len(), device)?
            }
        };
        Ok(tensor)
    }
}
