use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::types::OcrOptions;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("OCR engine returned non-UTF-8 text")]
    InvalidOutput,
    #[error("Tesseract not available, build with `tesseract` feature")]
    NotAvailable,
}

/// Abstraction over an OCR backend.
///
/// Implementations receive the path of a prepared file (a binarized PNG, or
/// the stored upload for PDFs) and return the recognized text. Each call must
/// use its own engine instance.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image: &Path, options: &OcrOptions) -> Result<String, OcrError>;
}

impl<T: OcrBackend + ?Sized> OcrBackend for Box<T> {
    fn recognize(&self, image: &Path, options: &OcrOptions) -> Result<String, OcrError> {
        (**self).recognize(image, options)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string. Useful for testing the pipeline and HTTP layer
/// without requiring Tesseract to be installed.
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image: &Path, _options: &OcrOptions) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

// ── Tesseract CLI backend ─────────────────────────────────────────────────────

/// Runs the `tesseract` executable, one child process per call.
pub struct TesseractCli {
    program: PathBuf,
    tessdata: Option<PathBuf>,
}

impl TesseractCli {
    pub fn new(program: impl Into<PathBuf>, tessdata: Option<PathBuf>) -> Self {
        Self { program: program.into(), tessdata }
    }

    fn command(&self, image: &Path, options: &OcrOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&options.language)
            .arg("--psm")
            .arg(options.mode.psm().to_string());
        if let Some(dir) = &self.tessdata {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        cmd
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new("tesseract", None)
    }
}

impl OcrBackend for TesseractCli {
    fn recognize(&self, image: &Path, options: &OcrOptions) -> Result<String, OcrError> {
        let output = self
            .command(image, options)
            .output()
            .map_err(|e| OcrError::Engine(format!("cannot run {}: {e}", self.program.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        String::from_utf8(output.stdout).map_err(|_| OcrError::InvalidOutput)
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError};
    use crate::types::OcrOptions;
    use leptess::{LepTess, Variable};
    use std::path::Path;

    pub struct TesseractRecognizer {
        data_path: Option<String>,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>) -> Self {
            Self { data_path }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, image: &Path, options: &OcrOptions) -> Result<String, OcrError> {
            // Fresh engine per call; dropped on every return path.
            let mut lt = LepTess::new(self.data_path.as_deref(), &options.language)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(Variable::TesseditPagesegMode, &options.mode.psm().to_string())
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image(image).map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.get_utf8_text().map_err(|_| OcrError::InvalidOutput)
        }
    }
}

/// Stand-in used when the server is configured for the in-process engine but
/// the crate was built without the `tesseract` feature.
pub struct Unavailable;

impl OcrBackend for Unavailable {
    fn recognize(&self, _image: &Path, _options: &OcrOptions) -> Result<String, OcrError> {
        Err(OcrError::NotAvailable)
    }
}
