//! Parche del bloque `BLOCK SMEFT` de un parameter card.
//!
//! Tras la cabecera, las `window` líneas siguientes se inspeccionan: las que
//! empiezan por un índice entero con valor asignado reescriben su segundo
//! campo en notación científica (`1.234560e+00`) y se normalizan a campos
//! separados por un espacio. El resto del archivo se copia tal cual.
use indexmap::IndexMap;
use thiserror::Error;

pub const SMEFT_HEADER: &str = "BLOCK SMEFT";

#[derive(Debug, Error, PartialEq)]
pub enum ParamCardError {
    #[error("parameter card has no 'BLOCK SMEFT' block")]
    MissingBlock,
}

/// Formato `%.6e` con exponente con signo y al menos dos dígitos.
pub fn format_scientific(value: f64) -> String {
    let raw = format!("{value:.6e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => raw,
    }
}

pub fn patch_smeft_block(card: &str, values: &IndexMap<u32, f64>, window: usize) -> Result<String, ParamCardError> {
    let mut out = String::with_capacity(card.len());
    let mut in_block = false;
    let mut seen = 0usize;
    let mut found = false;

    for line in card.split_inclusive('\n') {
        if line.starts_with(SMEFT_HEADER) {
            in_block = true;
            found = true;
            out.push_str(line);
            continue;
        }
        if in_block && seen < window {
            seen += 1;
            let mut parts: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            let index = parts.first().and_then(|p| p.parse::<u32>().ok());
            if let (Some(index), true) = (index, parts.len() > 1) {
                if let Some(v) = values.get(&index) {
                    parts[1] = format_scientific(*v);
                }
                out.push_str(&parts.join(" "));
                out.push('\n');
                continue;
            }
        }
        out.push_str(line);
    }

    if found {
        Ok(out)
    } else {
        Err(ParamCardError::MissingBlock)
    }
}
