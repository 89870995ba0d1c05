use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::models::cnpj;

/// Tri-state enrollment indicator (Simples Nacional, SIMEI).
///
/// Rendered as the text stored in the cache and written to result files.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum Flag {
    #[strum(serialize = "Sim")]
    #[serde(rename = "Sim")]
    Yes,
    #[strum(serialize = "Não")]
    #[serde(rename = "Não")]
    No,
    #[default]
    #[strum(serialize = "")]
    #[serde(rename = "")]
    Unknown,
}

impl Flag {
    /// Parse stored text; anything unrecognised is `Unknown`.
    pub fn from_stored(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

/// Outcome of looking up one identifier.
///
/// `error` is empty on success. `cached` is transient and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    pub cnpj: String,
    pub razao_social: String,
    pub simples_nacional: Flag,
    pub simei: Flag,
    pub data_consulta: String,
    pub erro: String,
    #[serde(skip)]
    pub cached: bool,
}

impl LookupResult {
    pub fn success(
        cnpj: impl Into<String>,
        razao_social: impl Into<String>,
        simples_nacional: Flag,
        simei: Flag,
    ) -> Self {
        Self {
            cnpj: cnpj.into(),
            razao_social: razao_social.into(),
            simples_nacional,
            simei,
            data_consulta: timestamp_now(),
            erro: String::new(),
            cached: false,
        }
    }

    pub fn failure(cnpj: impl Into<String>, erro: impl Into<String>) -> Self {
        Self {
            cnpj: cnpj.into(),
            razao_social: String::new(),
            simples_nacional: Flag::Unknown,
            simei: Flag::Unknown,
            data_consulta: timestamp_now(),
            erro: erro.into(),
            cached: false,
        }
    }

    /// Synthesized record for a source row with no usable identifier.
    pub fn invalid(raw: &str) -> Self {
        let digits = cnpj::normalize(raw);
        let shown = if digits.is_empty() { raw.trim().to_string() } else { digits };
        Self::failure(shown, cnpj::INVALID_CNPJ_ERROR)
    }

    pub fn is_success(&self) -> bool {
        self.erro.is_empty()
    }
}

/// One row of the persistent lookup cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub cnpj: String,
    pub razao_social: String,
    pub simples_nacional: Flag,
    pub simei: Flag,
    pub data_consulta: String,
    /// Epoch seconds of the successful lookup that produced this row.
    pub fetched_at: i64,
}

impl CacheEntry {
    pub fn from_result(result: &LookupResult, fetched_at: i64) -> Self {
        Self {
            cnpj: result.cnpj.clone(),
            razao_social: result.razao_social.clone(),
            simples_nacional: result.simples_nacional,
            simei: result.simei,
            data_consulta: result.data_consulta.clone(),
            fetched_at,
        }
    }

    pub fn into_result(self) -> LookupResult {
        LookupResult {
            cnpj: self.cnpj,
            razao_social: self.razao_social,
            simples_nacional: self.simples_nacional,
            simei: self.simei,
            data_consulta: self.data_consulta,
            erro: String::new(),
            cached: true,
        }
    }
}

/// Local wall-clock time in the format written to result files.
pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
