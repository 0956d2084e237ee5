pub mod extract;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod types;

pub use extract::{FieldExtractor, FieldRule, ReceiptField, RulesError};
pub use pipeline::{Accept, PipelineConfig, PipelineError, ReceiptPipeline, DEFAULT_MAX_UPLOAD_BYTES};
pub use preprocess::{binarize, normalize, prepare_for_ocr, to_grayscale, PreprocessError};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError, TesseractCli, Unavailable};
pub use types::{
    DocumentKind, ExtractionResult, OcrOptions, ReceiptFields, SegmentationMode, TextResult, Upload,
};

#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_backend::TesseractRecognizer;
