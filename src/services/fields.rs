//! Data-driven extraction of the fields we need from lookup API responses.
//!
//! The API has shipped several response shapes over time. Each logical field is
//! described by an ordered list of candidate JSON paths; the first usable value
//! wins. Supporting a new shape means editing [`FieldRules`], not the code.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::models::lookup::Flag;

/// A path of object keys from the response root, e.g. `["company", "name"]`.
pub type FieldPath = Vec<String>;

const YES_TOKENS: &[&str] = &["sim", "s", "yes", "true", "1", "optante"];
const NO_TOKENS: &[&str] = &[
    "nao",
    "não",
    "n",
    "no",
    "false",
    "0",
    "nao optante",
    "não optante",
];
const NEGATIONS: &[&str] = &["nao", "não"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRules {
    /// Candidate paths for the company's legal (or, failing that, trade) name.
    pub display_name: Vec<FieldPath>,
    /// Candidate paths for the Simples Nacional enrollment object.
    pub simples_nacional: Vec<FieldPath>,
    /// Candidate paths for the SIMEI enrollment object.
    pub simei: Vec<FieldPath>,
    /// Keys checked, in order, inside an enrollment object.
    pub flag_keys: Vec<String>,
    /// Keys whose string value is an OPTANT / NON_OPTANT style status.
    pub status_keys: Vec<String>,
}

impl Default for FieldRules {
    fn default() -> Self {
        let company = |keys: &[&str]| -> Vec<FieldPath> {
            keys.iter().map(|k| path(&["company", *k])).collect()
        };

        let mut display_name = company(&[
            "name",
            "legal_name",
            "corporate_name",
            "razao_social",
            "company_name",
            "social_reason",
        ]);
        display_name.extend(company(&["alias", "trade_name", "fantasy_name", "nome_fantasia"]));

        Self {
            display_name,
            simples_nacional: vec![
                path(&["company", "simples"]),
                path(&["company", "simples_nacional"]),
                path(&["simples"]),
            ],
            simei: vec![
                path(&["company", "simei"]),
                path(&["company", "mei"]),
                path(&["simei"]),
                path(&["mei"]),
            ],
            flag_keys: [
                "optant",
                "opted",
                "is_optant",
                "isOptant",
                "is_opted",
                "option",
                "enabled",
                "mei",
                "active",
                "status",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
            status_keys: vec!["status".to_string()],
        }
    }
}

impl FieldRules {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a rules file replacing the built-in candidate lists.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FieldRulesError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }

    /// First non-blank string among the display name candidates, trimmed.
    pub fn display_name(&self, body: &Value) -> String {
        self.display_name
            .iter()
            .filter_map(|p| resolve(body, p))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_default()
    }

    pub fn simples_nacional(&self, body: &Value) -> Flag {
        self.flag_at(body, &self.simples_nacional)
    }

    pub fn simei(&self, body: &Value) -> Flag {
        self.flag_at(body, &self.simei)
    }

    /// The first truthy candidate wins. When none is, the last candidate
    /// decides, so a trailing `false` still reads as `Não`.
    fn flag_at(&self, body: &Value, candidates: &[FieldPath]) -> Flag {
        let mut last = None;
        for path in candidates {
            last = resolve(body, path);
            if let Some(value) = last.filter(|v| is_truthy(v)) {
                return self.extract_flag(value);
            }
        }
        last.map(|v| self.extract_flag(v)).unwrap_or_default()
    }

    /// Interpret a scalar, or search an enrollment object for a yes/no answer.
    pub fn extract_flag(&self, value: &Value) -> Flag {
        let Value::Object(map) = value else {
            return interpret(value);
        };

        for key in &self.flag_keys {
            let Some(v) = map.get(key) else { continue };

            if self.status_keys.contains(key) {
                if let Some(s) = v.as_str() {
                    let flag = interpret_status(s);
                    if flag != Flag::Unknown {
                        return flag;
                    }
                }
            }

            let flag = interpret(v);
            if flag != Flag::Unknown {
                return flag;
            }
        }

        map.values()
            .map(interpret)
            .find(|f| *f != Flag::Unknown)
            .unwrap_or_default()
    }
}

/// Booleans, numeric 0/1 and yes/no text tokens.
pub fn interpret(value: &Value) -> Flag {
    match value {
        Value::Bool(true) => Flag::Yes,
        Value::Bool(false) => Flag::No,
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Flag::Yes,
            Some(x) if x == 0.0 => Flag::No,
            _ => Flag::Unknown,
        },
        Value::String(s) => interpret_text(s),
        _ => Flag::Unknown,
    }
}

fn interpret_text(raw: &str) -> Flag {
    let s = raw.trim().to_lowercase();
    if YES_TOKENS.contains(&s.as_str()) {
        return Flag::Yes;
    }
    if NO_TOKENS.contains(&s.as_str()) {
        return Flag::No;
    }
    let negated = NEGATIONS.iter().any(|n| s.contains(n));
    if s.contains("optante") && !negated {
        return Flag::Yes;
    }
    if negated {
        return Flag::No;
    }
    Flag::Unknown
}

/// Status strings such as `OPTANT` / `NON_OPTANT`.
fn interpret_status(raw: &str) -> Flag {
    let s = raw.trim().to_lowercase();
    let negated = s.contains("non") || NEGATIONS.iter().any(|n| s.contains(n));
    if s.contains("opt") && !negated {
        Flag::Yes
    } else if negated {
        Flag::No
    } else {
        Flag::Unknown
    }
}

fn path(keys: &[&str]) -> FieldPath {
    keys.iter().map(|k| k.to_string()).collect()
}

fn resolve<'a>(body: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(body, |node, key| node.get(key))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Object(m) => !m.is_empty(),
        Value::Array(a) => !a.is_empty(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FieldRulesError {
    #[error("Failed to read field rules: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid field rules: {0}")]
    Json(#[from] serde_json::Error),
}
