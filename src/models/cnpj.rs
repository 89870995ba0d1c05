//! CNPJ (company registry number) normalisation helpers.

/// Number of digits in a valid CNPJ.
pub const CNPJ_LEN: usize = 14;

/// Error recorded for any identifier that does not normalise to 14 digits.
pub const INVALID_CNPJ_ERROR: &str = "CNPJ inválido (precisa ter 14 dígitos)";

/// Strip everything but ASCII digits ("12.345.678/0001-95" -> "12345678000195").
pub fn normalize(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// True when `value` is exactly 14 ASCII digits.
pub fn is_valid(value: &str) -> bool {
    value.len() == CNPJ_LEN && value.bytes().all(|b| b.is_ascii_digit())
}

/// Render an identifier for export: digits only, left-padded with zeros to 14.
///
/// Longer values are kept as-is; an empty value stays empty.
pub fn pad(raw: &str) -> String {
    let digits = normalize(raw);
    if digits.is_empty() {
        return digits;
    }
    format!("{:0>width$}", digits, width = CNPJ_LEN)
}
