use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::ReceiptFields;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("Failed to read rules file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse rules TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid pattern for {field}: {source}")]
    Pattern {
        field: ReceiptField,
        #[source]
        source: regex::Error,
    },
}

/// The receipt attribute a rule fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptField {
    ShopName,
    Total,
    Change,
    Date,
}

impl std::fmt::Display for ReceiptField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiptField::ShopName => write!(f, "shop_name"),
            ReceiptField::Total => write!(f, "total"),
            ReceiptField::Change => write!(f, "change"),
            ReceiptField::Date => write!(f, "date"),
        }
    }
}

/// A pattern bound to one field. Capture group 1 is the value when present,
/// otherwise the whole match.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: ReceiptField,
    pattern: Regex,
}

impl FieldRule {
    pub fn new(field: ReceiptField, pattern: &str) -> Result<Self, RulesError> {
        let pattern = Regex::new(pattern).map_err(|source| RulesError::Pattern { field, source })?;
        Ok(Self { field, pattern })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// First non-empty value this rule finds in `text`. Matches that trim to
    /// nothing are skipped in favour of later ones.
    pub fn apply<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.pattern.captures_iter(text).find_map(|caps| {
            let m = caps.get(1).or_else(|| caps.get(0))?;
            let value = m.as_str().trim_end();
            (!value.is_empty()).then_some(value)
        })
    }
}

// ── Default rule table ───────────────────────────────────────────────────────

const SHOP_NAME: &str = r"\A([^\r\n]*)\r?\n";
const TOTAL: &str = r"\bTOTAL[ \t]+([^\r\n]+)";
const CHANGE: &str = r"\bCHANGE\s+(\d+(?:\.\d+)?)";
const DATE: &str = r"\b(\d{2}/\d{2}/\d{4}[ \t]+\d{2}:\d{2}\b|\d{2}:\d{2}:\d{2}[ \t]*\d{6}\b)";

fn default_rules() -> &'static [FieldRule] {
    static RULES: OnceLock<Vec<FieldRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (ReceiptField::ShopName, SHOP_NAME),
            (ReceiptField::Total, TOTAL),
            (ReceiptField::Change, CHANGE),
            (ReceiptField::Date, DATE),
        ]
        .into_iter()
        .map(|(field, pat)| FieldRule::new(field, pat).expect("invalid built-in regex"))
        .collect()
    })
}

// ── TOML rules file ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    replace_defaults: bool,
    #[serde(default, rename = "rule")]
    rules: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    field: ReceiptField,
    pattern: String,
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Ordered policy table of field rules.
///
/// Per field, the earliest rule in the table that yields a value wins. Rules
/// for different fields never interact, so a miss on one field leaves the
/// others untouched.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    rules: Vec<FieldRule>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self { rules: default_rules().to_vec() }
    }
}

impl FieldExtractor {
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    /// Build from TOML. Rules are appended after the built-in table unless
    /// `replace_defaults = true`.
    ///
    /// ```toml
    /// [[rule]]
    /// field = "total"
    /// pattern = '\bAMOUNT DUE[ \t]+([^\r\n]+)'
    /// ```
    pub fn from_toml(toml_content: &str) -> Result<Self, RulesError> {
        let file: RulesFile = toml::from_str(toml_content)?;
        let mut rules = if file.replace_defaults { Vec::new() } else { default_rules().to_vec() };
        for entry in file.rules {
            rules.push(FieldRule::new(entry.field, &entry.pattern)?);
        }
        Ok(Self { rules })
    }

    pub fn from_file(path: &Path) -> Result<Self, RulesError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// Extract structured fields from raw OCR text. Never fails; unmatched
    /// fields stay `None`.
    pub fn extract(&self, text: &str) -> ReceiptFields {
        let mut fields = ReceiptFields::default();
        for rule in &self.rules {
            let slot = match rule.field {
                ReceiptField::ShopName => &mut fields.shop_name,
                ReceiptField::Total => &mut fields.total,
                ReceiptField::Change => &mut fields.change,
                ReceiptField::Date => &mut fields.date,
            };
            if slot.is_some() {
                continue;
            }
            *slot = rule.apply(text).map(str::to_string);
        }
        fields
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
