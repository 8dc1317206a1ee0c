use crate::error::IngestError;

pub const DEFAULT_WINDOW_CHARS: usize = 1_500;
pub const DEFAULT_STRIDE_CHARS: usize = 1_200;

/// Fixed-size character windows. Consecutive chunks overlap by `window - stride` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub window: usize,
    pub stride: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW_CHARS,
            stride: DEFAULT_STRIDE_CHARS,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.stride == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "stride must be greater than zero".to_string(),
            ));
        }
        if self.stride > self.window {
            return Err(IngestError::InvalidChunkConfig(format!(
                "stride {} exceeds window {}",
                self.stride, self.window
            )));
        }
        Ok(())
    }

    pub fn overlap(&self) -> usize {
        self.window.saturating_sub(self.stride)
    }
}

/// Splits `text` into windows starting at character offsets `0, stride, 2*stride, ...`.
/// The last window is cut short by the end of the text.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let boundaries = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect::<Vec<_>>();
    let char_count = boundaries.len() - 1;

    let mut chunks = Vec::with_capacity(char_count.div_ceil(config.stride));
    let mut start = 0;
    while start < char_count {
        let end = (start + config.window).min(char_count);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        start += config.stride;
    }

    Ok(chunks)
}
