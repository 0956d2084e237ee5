use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use slipscan_ocr::{
    FieldExtractor, MockRecognizer, OcrBackend, OcrOptions, PipelineConfig, SegmentationMode,
    TesseractCli, DEFAULT_MAX_UPLOAD_BYTES,
};

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV: &str = "SLIPSCAN_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// The `tesseract` executable, one process per request.
    #[default]
    Cli,
    /// In-process libtesseract via leptess (`tesseract` feature).
    Leptess,
    /// Always returns empty text. For smoke-testing the HTTP surface.
    Mock,
}

impl std::str::FromStr for EngineKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cli" => Ok(EngineKind::Cli),
            "leptess" => Ok(EngineKind::Leptess),
            "mock" => Ok(EngineKind::Mock),
            other => Err(format!("Unknown OCR engine: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// Bunyan-style JSON lines.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("Unknown log format: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub max_upload_bytes: usize,
    pub language: String,
    pub segmentation_mode: SegmentationMode,
    pub engine: EngineKind,
    pub tesseract_bin: PathBuf,
    pub tessdata: Option<PathBuf>,
    /// Root for per-request scratch directories. System temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Extra field rules, see `FieldExtractor::from_toml`.
    pub rules_file: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            language: "eng".to_string(),
            segmentation_mode: SegmentationMode::AutoOsd,
            engine: EngineKind::Cli,
            tesseract_bin: PathBuf::from("tesseract"),
            tessdata: None,
            scratch_dir: None,
            rules_file: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl ServerConfig {
    /// Defaults, then the file named by `SLIPSCAN_CONFIG`, then `SLIPSCAN_*` overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = get("SLIPSCAN_BIND") {
            self.bind = v.parse().with_context(|| format!("SLIPSCAN_BIND={v}"))?;
        }
        if let Some(v) = get("SLIPSCAN_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = v.parse().with_context(|| format!("SLIPSCAN_MAX_UPLOAD_BYTES={v}"))?;
        }
        if let Some(v) = get("SLIPSCAN_LANGUAGE") {
            self.language = v;
        }
        if let Some(v) = get("SLIPSCAN_SEGMENTATION_MODE") {
            self.segmentation_mode = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = get("SLIPSCAN_ENGINE") {
            self.engine = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = get("SLIPSCAN_LOG_FORMAT") {
            self.log_format = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = get("SLIPSCAN_TESSDATA") {
            self.tessdata = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SLIPSCAN_SCRATCH_DIR") {
            self.scratch_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SLIPSCAN_RULES") {
            self.rules_file = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_upload_bytes: self.max_upload_bytes,
            scratch_root: self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir),
            ocr: OcrOptions { language: self.language.clone(), mode: self.segmentation_mode },
        }
    }

    pub fn extractor(&self) -> Result<FieldExtractor> {
        match &self.rules_file {
            Some(path) => FieldExtractor::from_file(path)
                .with_context(|| format!("loading field rules from {}", path.display())),
            None => Ok(FieldExtractor::default()),
        }
    }

    pub fn backend(&self) -> Box<dyn OcrBackend> {
        match self.engine {
            EngineKind::Cli => Box::new(TesseractCli::new(self.tesseract_bin.clone(), self.tessdata.clone())),
            EngineKind::Leptess => leptess_backend(self.tessdata.as_deref()),
            EngineKind::Mock => Box::new(MockRecognizer::new("")),
        }
    }
}

#[cfg(feature = "tesseract")]
fn leptess_backend(tessdata: Option<&Path>) -> Box<dyn OcrBackend> {
    let data_path = tessdata.map(|p| p.to_string_lossy().into_owned());
    Box::new(slipscan_ocr::TesseractRecognizer::new(data_path))
}

#[cfg(not(feature = "tesseract"))]
fn leptess_backend(_tessdata: Option<&Path>) -> Box<dyn OcrBackend> {
    tracing::warn!("engine = \"leptess\" but built without the `tesseract` feature; recognition will fail");
    Box::new(slipscan_ocr::Unavailable)
}
