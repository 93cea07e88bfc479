#![deny(warnings)]

//! Configuration layering for funding-sim.
//!
//! This crate provides:
//! - The sparse configuration document shared by installation-wide definition
//!   files and per-save overrides, with raw values preserved verbatim
//! - The declarative field schema (labels, decimals, edit minimums) for both
//!   calculator kinds
//! - [`ConfigStore`], which merges definitions and overrides into an
//!   effective configuration and enforces the one-way settings lock
//! - Discovery of definition files from a directory

use funding_core::{CalculatorKind, FundingCalculator, FundingConfig};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One six-hour day; the smallest pay period an interactive edit may set.
pub const MIN_INTERACTIVE_PAY_PERIOD: f64 = 21_600.0;

/// A raw override value.
///
/// Accepts any scalar on deserialization and serializes back as a string, so
/// the exact text a player typed round-trips through the save unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamValue(String);

impl ParamValue {
    pub fn new(raw: impl Into<String>) -> Self {
        ParamValue(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse as a finite number. Non-finite values are treated as unparseable.
    pub fn parse_f64(&self) -> Option<f64> {
        self.0.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Scalar {
            Bool(bool),
            Int(i64),
            UInt(u64),
            Float(f64),
            Text(String),
        }

        // Non-finite floats stringify to values parse_f64 rejects, so they
        // fall out at field-application time like any other bad value.
        let raw = match Scalar::deserialize(deserializer)? {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::UInt(u) => u.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s,
        };
        Ok(ParamValue(raw))
    }
}

/// Sparse configuration document shared by definition files and per-save
/// overrides: an optional mode, an optional lock flag, and one raw-value map
/// per calculator kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, rename = "BasicFunding", skip_serializing_if = "BTreeMap::is_empty")]
    pub basic: BTreeMap<String, ParamValue>,
    #[serde(default, rename = "RepFunding", skip_serializing_if = "BTreeMap::is_empty")]
    pub rep: BTreeMap<String, ParamValue>,
}

impl ConfigDoc {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none() && self.locked.is_none() && self.basic.is_empty() && self.rep.is_empty()
    }

    /// Raw values for one calculator kind.
    pub fn section(&self, kind: CalculatorKind) -> &BTreeMap<String, ParamValue> {
        match kind {
            CalculatorKind::Basic => &self.basic,
            CalculatorKind::Rep => &self.rep,
        }
    }

    fn section_mut(&mut self, kind: CalculatorKind) -> &mut BTreeMap<String, ParamValue> {
        match kind {
            CalculatorKind::Basic => &mut self.basic,
            CalculatorKind::Rep => &mut self.rep,
        }
    }
}

/// Display and validation metadata for one editable parameter.
#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
    /// Document key, e.g. "payPeriod".
    pub key: &'static str,
    /// Row label for settings displays.
    pub label: &'static str,
    /// Decimal places shown for the value.
    pub decimals: u8,
    /// Smallest value an interactive edit may set.
    pub minimum: Option<f64>,
}

const PAY_PERIOD: FieldSpec = FieldSpec {
    key: "payPeriod",
    label: "Pay Period:",
    decimals: 0,
    minimum: Some(MIN_INTERACTIVE_PAY_PERIOD),
};
const PAYMENT_NUMBER_MULTIPLIER: FieldSpec = FieldSpec {
    key: "paymentNumberMultiplier",
    label: "Payment # Multiplier:",
    decimals: 4,
    minimum: None,
};
const PAYMENT_NUMBER_OFFSET: FieldSpec = FieldSpec {
    key: "paymentNumberOffset",
    label: "Payment # Offset:",
    decimals: 4,
    minimum: None,
};
const BASE_PAY: FieldSpec = FieldSpec {
    key: "basePay",
    label: "Base Pay:",
    decimals: 2,
    minimum: None,
};
const LINEAR_PAY: FieldSpec = FieldSpec {
    key: "linearPay",
    label: "Linear Pay:",
    decimals: 2,
    minimum: None,
};
const SQRT_PAY: FieldSpec = FieldSpec {
    key: "sqrtPay",
    label: "Square Root Pay:",
    decimals: 2,
    minimum: None,
};
const LOGARITHMIC_PAY: FieldSpec = FieldSpec {
    key: "logarithmicPay",
    label: "Logarithmic Pay:",
    decimals: 2,
    minimum: None,
};
const REP_BONUS_PAYMENT_RATE: FieldSpec = FieldSpec {
    key: "repBonusPaymentRate",
    label: "Rep Bonus Payment Rate:",
    decimals: 2,
    minimum: None,
};
const REP_BONUS_PAYMENT_THRESHOLD: FieldSpec = FieldSpec {
    key: "repBonusPaymentThreshold",
    label: "Rep Bonus Payment Threshold:",
    decimals: 2,
    minimum: None,
};
const REP_COST_RATE: FieldSpec = FieldSpec {
    key: "repCostRate",
    label: "Rep Cost Rate:",
    decimals: 4,
    minimum: None,
};

/// Editable fields of the basic calculator, in display order.
pub const BASIC_FIELDS: [FieldSpec; 7] = [
    PAY_PERIOD,
    PAYMENT_NUMBER_MULTIPLIER,
    PAYMENT_NUMBER_OFFSET,
    BASE_PAY,
    LINEAR_PAY,
    SQRT_PAY,
    LOGARITHMIC_PAY,
];

/// Editable fields of the reputation calculator, in display order.
pub const REP_FIELDS: [FieldSpec; 10] = [
    PAY_PERIOD,
    PAYMENT_NUMBER_MULTIPLIER,
    PAYMENT_NUMBER_OFFSET,
    BASE_PAY,
    LINEAR_PAY,
    SQRT_PAY,
    LOGARITHMIC_PAY,
    REP_BONUS_PAYMENT_RATE,
    REP_BONUS_PAYMENT_THRESHOLD,
    REP_COST_RATE,
];

/// Editable fields for a calculator kind, in display order.
pub fn fields(kind: CalculatorKind) -> &'static [FieldSpec] {
    match kind {
        CalculatorKind::Basic => &BASIC_FIELDS,
        CalculatorKind::Rep => &REP_FIELDS,
    }
}

/// Look up one field of a calculator kind by document key.
pub fn field_spec(kind: CalculatorKind, key: &str) -> Option<&'static FieldSpec> {
    fields(kind).iter().find(|spec| spec.key == key)
}

/// Rejected configuration edits.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The settings are locked; no further edits are accepted.
    #[error("configuration is locked")]
    Locked,
    /// The current mode names no defined calculator kind.
    #[error("unknown funding mode: {0}")]
    UnknownMode(String),
    /// The field is not editable on the active kind.
    #[error("unknown field '{field}' for mode {mode}")]
    UnknownField { mode: String, field: String },
    /// The raw value did not parse as a finite number.
    #[error("cannot parse '{value}' for field '{field}'")]
    Parse { field: String, value: String },
    /// The parsed value is below the field's edit minimum.
    #[error("value {value} for field '{field}' is below minimum {minimum}")]
    BelowMinimum {
        field: String,
        value: f64,
        minimum: f64,
    },
}

/// Layered funding configuration for one save: merged install defaults
/// underneath, a sparse override document on top.
///
/// The override document is kept verbatim so it can be written back to the
/// save byte-for-byte, and the base configuration stays untouched for
/// "reset to default" comparisons.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    base: FundingConfig,
    active: FundingConfig,
    doc: ConfigDoc,
}

impl ConfigStore {
    /// Merge definition documents (later wins per field) and overlay the
    /// per-save override document.
    ///
    /// The canonical override document is the given one when non-empty,
    /// otherwise a minimal document; either way it is seeded with the active
    /// mode so a save/reload round-trips to the same configuration.
    pub fn load(definitions: &[ConfigDoc], overrides: Option<&ConfigDoc>) -> Self {
        debug!(count = definitions.len(), "merging funding definitions");
        let mut base = FundingConfig::default();
        for doc in definitions {
            apply_doc(&mut base, doc);
        }

        let mut active = base.clone();
        let mut canonical = match overrides {
            Some(doc) if !doc.is_empty() => {
                debug!("per-save funding overrides found");
                apply_doc(&mut active, doc);
                doc.clone()
            }
            _ => ConfigDoc::default(),
        };
        if canonical.mode.is_none() {
            canonical.mode = Some(active.mode.clone());
        }

        active.log_summary();
        ConfigStore {
            base,
            active,
            doc: canonical,
        }
    }

    /// The merged configuration with overrides applied.
    pub fn effective(&self) -> &FundingConfig {
        &self.active
    }

    /// The merged install defaults, without overrides.
    pub fn base(&self) -> &FundingConfig {
        &self.base
    }

    /// The canonical override document to persist.
    pub fn override_doc(&self) -> &ConfigDoc {
        &self.doc
    }

    pub fn is_locked(&self) -> bool {
        self.active.locked
    }

    /// The active calculator, if the mode names a defined kind.
    pub fn calculator(&self) -> Option<FundingCalculator<'_>> {
        self.active.calculator()
    }

    /// Record an override for one field of the active kind, keeping the raw
    /// text verbatim in the override document.
    pub fn set_override(&mut self, field: &str, raw_value: &str) -> Result<(), ConfigError> {
        if self.active.locked {
            return Err(ConfigError::Locked);
        }
        let kind = self.active_kind()?;
        let spec = field_spec(kind, field).ok_or_else(|| ConfigError::UnknownField {
            mode: self.active.mode.clone(),
            field: field.to_string(),
        })?;
        let value = ParamValue::new(raw_value);
        let parsed = value.parse_f64().ok_or_else(|| ConfigError::Parse {
            field: field.to_string(),
            value: raw_value.to_string(),
        })?;
        if let Some(minimum) = spec.minimum {
            if parsed < minimum {
                return Err(ConfigError::BelowMinimum {
                    field: field.to_string(),
                    value: parsed,
                    minimum,
                });
            }
        }
        self.doc.section_mut(kind).insert(field.to_string(), value);
        self.set_active_field(kind, field, parsed);
        debug!(mode = kind.as_str(), field, value = parsed, "override set");
        Ok(())
    }

    /// Drop an override for one field of the active kind, restoring the
    /// base value. Clearing a field with no override is a no-op.
    pub fn clear_override(&mut self, field: &str) -> Result<(), ConfigError> {
        if self.active.locked {
            return Err(ConfigError::Locked);
        }
        let kind = self.active_kind()?;
        field_spec(kind, field).ok_or_else(|| ConfigError::UnknownField {
            mode: self.active.mode.clone(),
            field: field.to_string(),
        })?;
        self.doc.section_mut(kind).remove(field);
        let base_value = match kind {
            CalculatorKind::Basic => self.base.basic.field(field),
            CalculatorKind::Rep => self.base.rep.field(field),
        };
        if let Some(value) = base_value {
            self.set_active_field(kind, field, value);
        }
        debug!(mode = kind.as_str(), field, "override cleared");
        Ok(())
    }

    /// Lock the settings. Idempotent, and one-way: no unlock exists.
    pub fn lock(&mut self) {
        if !self.active.locked {
            info!("funding configuration locked");
        }
        self.active.locked = true;
        self.base.locked = true;
        self.doc.locked = Some(true);
    }

    /// Cycle the active calculator kind by `direction` (+1 or -1) and record
    /// the new mode in the override document. Silently ignored when locked.
    ///
    /// An unrecognized current mode enters the cycle at the first kind going
    /// forward and the last going backward.
    pub fn switch_mode(&mut self, direction: i32) {
        if self.active.locked {
            return;
        }
        let modes = &CalculatorKind::ALL;
        let current = modes
            .iter()
            .position(|kind| kind.as_str() == self.active.mode)
            .map(|index| index as i32)
            .unwrap_or(-1);
        let mut next = current + direction;
        if next < 0 {
            next = modes.len() as i32 - 1;
        }
        if next >= modes.len() as i32 {
            next = 0;
        }
        let mode = modes[next as usize].as_str();
        self.active.mode = mode.to_string();
        self.doc.mode = Some(mode.to_string());
        info!(mode, "funding mode switched");
    }

    fn active_kind(&self) -> Result<CalculatorKind, ConfigError> {
        CalculatorKind::from_mode(&self.active.mode)
            .ok_or_else(|| ConfigError::UnknownMode(self.active.mode.clone()))
    }

    fn set_active_field(&mut self, kind: CalculatorKind, field: &str, value: f64) {
        match kind {
            CalculatorKind::Basic => self.active.basic.set_field(field, value),
            CalculatorKind::Rep => self.active.rep.set_field(field, value),
        };
    }
}

/// Apply one document to a configuration: mode and lock if present, then
/// every whitelisted field of each section. Unknown keys and unparseable
/// values are skipped. The pay-period floor is re-applied afterwards.
fn apply_doc(config: &mut FundingConfig, doc: &ConfigDoc) {
    if let Some(mode) = &doc.mode {
        config.mode = mode.clone();
    }
    if let Some(locked) = doc.locked {
        config.locked = locked;
    }
    apply_section(&doc.basic, &BASIC_FIELDS, |key, value| {
        config.basic.set_field(key, value)
    });
    apply_section(&doc.rep, &REP_FIELDS, |key, value| {
        config.rep.set_field(key, value)
    });
    config.basic.normalize();
    config.rep.normalize();
}

fn apply_section(
    section: &BTreeMap<String, ParamValue>,
    specs: &[FieldSpec],
    mut set: impl FnMut(&str, f64) -> bool,
) {
    for (key, value) in section {
        if !specs.iter().any(|spec| spec.key == key.as_str()) {
            debug!(field = %key, "ignoring unknown configuration key");
            continue;
        }
        match value.parse_f64() {
            Some(parsed) => {
                set(key, parsed);
            }
            None => debug!(
                field = %key,
                value = %value.as_str(),
                "ignoring unparseable configuration value"
            ),
        }
    }
}

/// A named block of install-wide defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefinitionBlock {
    pub name: String,
    #[serde(rename = "FundingConfig")]
    pub config: ConfigDoc,
}

/// Errors from definition discovery.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DefinitionError {
    fn from(e: std::io::Error) -> Self {
        DefinitionError::Io(e.to_string())
    }
}

/// Load definition blocks from a directory of YAML files, in file-name
/// order. Files that fail to read or parse are skipped with a warning.
pub fn load_definitions(dir: &Path) -> Result<Vec<DefinitionBlock>, DefinitionError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| DefinitionError::Io(format!("{}: {e}", dir.display())))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => paths.push(path),
            _ => continue,
        }
    }
    paths.sort();

    let mut blocks = Vec::new();
    for path in paths {
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable definition file");
                continue;
            }
        };
        match serde_yaml::from_str::<DefinitionBlock>(&text) {
            Ok(block) => {
                info!(name = %block.name, path = %path.display(), "loaded funding definition");
                blocks.push(block);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping malformed definition file");
            }
        }
    }
    Ok(blocks)
}
