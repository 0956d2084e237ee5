use serde::{Deserialize, Serialize, Serializer};
use std::path::Path;

/// Kind of document an upload is routed as, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// `.png`, `.jpg`, `.jpeg`: decoded and binarized before recognition.
    Image,
    /// `.pdf`: handed to the engine as stored, no pixel preprocessing.
    Pdf,
}

impl DocumentKind {
    /// Classify a declared filename. Returns `None` for unsupported extensions.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" => Some(DocumentKind::Image),
            "pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::Image => write!(f, "image"),
            DocumentKind::Pdf => write!(f, "pdf"),
        }
    }
}

/// Tesseract page segmentation modes this service can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    /// Automatic page segmentation with orientation and script detection.
    #[default]
    AutoOsd,
    Auto,
    SingleBlock,
    SingleLine,
    SparseText,
}

impl SegmentationMode {
    /// Numeric PSM value as understood by Tesseract.
    pub fn psm(self) -> u8 {
        match self {
            SegmentationMode::AutoOsd => 1,
            SegmentationMode::Auto => 3,
            SegmentationMode::SingleBlock => 6,
            SegmentationMode::SingleLine => 7,
            SegmentationMode::SparseText => 11,
        }
    }
}

impl std::str::FromStr for SegmentationMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_osd" => Ok(SegmentationMode::AutoOsd),
            "auto" => Ok(SegmentationMode::Auto),
            "single_block" => Ok(SegmentationMode::SingleBlock),
            "single_line" => Ok(SegmentationMode::SingleLine),
            "sparse_text" => Ok(SegmentationMode::SparseText),
            other => Err(format!("Unknown segmentation mode: '{other}'")),
        }
    }
}

/// Language and layout settings passed to every recognition call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrOptions {
    pub language: String,
    pub mode: SegmentationMode,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self { language: "eng".to_string(), mode: SegmentationMode::AutoOsd }
    }
}

/// A file received from a client, owned for the duration of one request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self { filename: filename.into(), data: data.into() }
    }
}

/// Structured fields pulled out of a receipt's OCR text.
///
/// Each field is independently present or absent. Absent fields go over the
/// wire as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReceiptFields {
    #[serde(serialize_with = "empty_if_none")]
    pub shop_name: Option<String>,
    /// Total as printed, not parsed.
    #[serde(serialize_with = "empty_if_none")]
    pub total: Option<String>,
    #[serde(serialize_with = "empty_if_none")]
    pub change: Option<String>,
    #[serde(serialize_with = "empty_if_none")]
    pub date: Option<String>,
}

impl ReceiptFields {
    pub fn is_empty(&self) -> bool {
        self.shop_name.is_none() && self.total.is_none() && self.change.is_none() && self.date.is_none()
    }
}

fn empty_if_none<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(value.as_deref().unwrap_or(""))
}

/// Terminal output of the receipt pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtractionResult {
    pub text: String,
    pub data: ReceiptFields,
}

/// Recognized text plus its byte length, for the status-reporting text endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextResult {
    pub text: String,
    pub text_count: usize,
}

impl From<String> for TextResult {
    fn from(text: String) -> Self {
        let text_count = text.len();
        Self { text, text_count }
    }
}
