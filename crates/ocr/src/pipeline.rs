use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

use crate::extract::FieldExtractor;
use crate::preprocess::{self, PreprocessError};
use crate::recognizer::{OcrBackend, OcrError};
use crate::types::{DocumentKind, ExtractionResult, OcrOptions, Upload};

/// 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 << 20;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid file format: {0}")]
    UnsupportedFormat(String),
    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
}

impl PipelineError {
    /// Whether the request itself was at fault (as opposed to the server).
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::UnsupportedFormat(_) | PipelineError::TooLarge { .. })
    }

    /// Short name of the stage that failed, for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedFormat(_) | PipelineError::TooLarge { .. } => "validate",
            PipelineError::Io(_) => "io",
            PipelineError::Preprocess(_) => "preprocess",
            PipelineError::Ocr(_) => "recognize",
        }
    }
}

/// Which document kinds a caller accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Any,
    ImagesOnly,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_upload_bytes: usize,
    /// Directory under which per-request scratch directories are created.
    pub scratch_root: PathBuf,
    pub ocr: OcrOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            scratch_root: std::env::temp_dir(),
            ocr: OcrOptions::default(),
        }
    }
}

/// Orchestrates: validate → scratch dir → (normalize) → OCR → extract.
///
/// Every call is independent. Scratch files live in a directory unique to the
/// call and are removed when it returns, whatever the outcome.
pub struct ReceiptPipeline<R: OcrBackend> {
    recognizer: R,
    extractor: FieldExtractor,
    config: PipelineConfig,
}

impl<R: OcrBackend> ReceiptPipeline<R> {
    pub fn new(recognizer: R, extractor: FieldExtractor, config: PipelineConfig) -> Self {
        Self { recognizer, extractor, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Recognize the upload and return its raw text.
    pub fn recognize_upload(&self, upload: &Upload, accept: Accept) -> Result<String, PipelineError> {
        let (kind, text) = self.recognize(upload, accept)?;
        info!(filename = %upload.filename, kind = %kind, chars = text.len(), "Extracted text");
        Ok(text)
    }

    /// Recognize the upload and pull structured receipt fields from the text.
    pub fn extract_receipt(&self, upload: &Upload) -> Result<ExtractionResult, PipelineError> {
        let (kind, text) = self.recognize(upload, Accept::Any)?;
        let data = self.extractor.extract(&text);
        info!(
            filename = %upload.filename,
            kind = %kind,
            chars = text.len(),
            shop_name = data.shop_name.is_some(),
            total = data.total.is_some(),
            change = data.change.is_some(),
            date = data.date.is_some(),
            "Extracted receipt data"
        );
        Ok(ExtractionResult { text, data })
    }

    fn recognize(&self, upload: &Upload, accept: Accept) -> Result<(DocumentKind, String), PipelineError> {
        let kind = self.validate(upload, accept)?;
        let scratch = self.scratch_dir()?;
        debug!(kind = %kind, scratch = %scratch.path().display(), "Scratch directory created");

        let target = match kind {
            DocumentKind::Pdf => {
                let path = scratch.path().join("upload.pdf");
                std::fs::write(&path, &upload.data)?;
                path
            }
            DocumentKind::Image => {
                let path = scratch.path().join("normalized.png");
                let (w, h) = preprocess::prepare_for_ocr(&upload.data, &path)?;
                debug!(width = w, height = h, "Image binarized");
                path
            }
        };

        let text = self.recognize_path(&target)?;
        debug!(chars = text.len(), "Recognition finished");
        Ok((kind, text))
    }

    fn validate(&self, upload: &Upload, accept: Accept) -> Result<DocumentKind, PipelineError> {
        let kind = DocumentKind::from_filename(&upload.filename)
            .filter(|k| accept == Accept::Any || *k == DocumentKind::Image)
            .ok_or_else(|| PipelineError::UnsupportedFormat(upload.filename.clone()))?;
        let limit = self.config.max_upload_bytes;
        if upload.data.len() > limit {
            return Err(PipelineError::TooLarge { size: upload.data.len(), limit });
        }
        Ok(kind)
    }

    fn scratch_dir(&self) -> std::io::Result<TempDir> {
        tempfile::Builder::new()
            .prefix(&format!("slipscan-{}-", uuid::Uuid::new_v4().simple()))
            .tempdir_in(&self.config.scratch_root)
    }

    fn recognize_path(&self, path: &Path) -> Result<String, PipelineError> {
        Ok(self.recognizer.recognize(path, &self.config.ocr)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
