use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::models::cnpj;
use crate::models::job::OutputFormat;
use crate::models::lookup::LookupResult;

/// Column order of every result file.
pub const COLUMNS: [&str; 6] = [
    "cnpj",
    "razao_social",
    "simples_nacional",
    "simei",
    "data_consulta",
    "erro",
];

const SHEET_NAME: &str = "resultado";

/// Serialize batch results into the requested file format.
///
/// The CNPJ column is always written as 14-digit text so spreadsheet tools
/// keep the leading zeros.
pub fn build_output(results: &[LookupResult], format: OutputFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        OutputFormat::Csv => to_csv(results),
        OutputFormat::Xlsx => to_xlsx(results),
    }
}

fn row(result: &LookupResult) -> [String; 6] {
    [
        cnpj::pad(&result.cnpj),
        result.razao_social.clone(),
        result.simples_nacional.to_string(),
        result.simei.to_string(),
        result.data_consulta.clone(),
        result.erro.clone(),
    ]
}

fn to_csv(results: &[LookupResult]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(COLUMNS)?;
    for result in results {
        writer.write_record(row(result))?;
    }
    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

fn to_xlsx(results: &[LookupResult]) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, name) in COLUMNS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *name, &header)?;
    }

    for (i, result) in results.iter().enumerate() {
        let line = (i + 1) as u32;
        for (col, value) in row(result).iter().enumerate() {
            worksheet.write_string(line, col as u16, value)?;
        }
    }

    worksheet.autofit();
    Ok(workbook.save_to_buffer()?)
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("CSV serialization failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error while writing output: {0}")]
    Io(#[from] std::io::Error),

    #[error("XLSX serialization failed: {0}")]
    Xlsx(#[from] XlsxError),
}
