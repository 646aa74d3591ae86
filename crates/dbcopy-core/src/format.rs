//! printf-style formatting of floating point values for CSV output.

use crate::error::{DbcopyError, Result};

pub const DEFAULT_DOUBLE_FORMAT: &str = "%.15g";

/// Parsed `%[flags][width][.precision](g|G|f|F|e|E)` format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleFormat {
    precision: usize,
    conv: char,
}

impl Default for DoubleFormat {
    fn default() -> Self {
        Self { precision: 15, conv: 'g' }
    }
}

impl DoubleFormat {
    /// # Errors
    /// Returns `InvalidArgument` for anything but a single float conversion.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Self::default());
        }
        let bad = || DbcopyError::invalid(format!("invalid double format: {spec}"));
        let body = spec.strip_prefix('%').ok_or_else(bad)?;
        let conv = body.chars().last().ok_or_else(bad)?;
        if !matches!(conv, 'g' | 'G' | 'f' | 'F' | 'e' | 'E') {
            return Err(bad());
        }
        let mods = &body[..body.len() - 1];
        let mods = mods.trim_start_matches(['-', '+', ' ', '#', '0']);
        let precision = match mods.split_once('.') {
            Some((width, prec)) => {
                if !width.chars().all(|c| c.is_ascii_digit()) {
                    return Err(bad());
                }
                if prec.is_empty() {
                    0
                } else {
                    prec.parse::<usize>().map_err(|_| bad())?
                }
            }
            None => {
                if !mods.chars().all(|c| c.is_ascii_digit()) {
                    return Err(bad());
                }
                6
            }
        };
        Ok(Self { precision, conv })
    }

    #[must_use]
    pub fn format(self, value: f64) -> String {
        if value.is_nan() {
            return "NaN".to_string();
        }
        if value.is_infinite() {
            return if value > 0.0 { "+Inf".to_string() } else { "-Inf".to_string() };
        }
        match self.conv {
            'f' | 'F' => format!("{value:.prec$}", prec = self.precision),
            'e' => format_exp(value, self.precision, false),
            'E' => format_exp(value, self.precision, false).to_uppercase(),
            'G' => format_general(value, self.precision).to_uppercase(),
            _ => format_general(value, self.precision),
        }
    }
}

/// C-style `%.{p}e` with a signed two-digit exponent.
fn format_exp(value: f64, precision: usize, strip_zeros: bool) -> String {
    let raw = format!("{value:.precision$e}");
    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let mantissa = if strip_zeros { trim_fraction(mantissa) } else { mantissa.to_string() };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

/// C-style `%.{p}g`: shortest of fixed or exponential, trailing zeros removed.
fn format_general(value: f64, precision: usize) -> String {
    let p = precision.max(1);
    if value == 0.0 {
        return if value.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }
    let raw = format!("{value:.prec$e}", prec = p - 1);
    let exp: i64 = raw.split_once('e').and_then(|(_, e)| e.parse().ok()).unwrap_or(0);
    let p_i = i64::try_from(p).unwrap_or(i64::MAX);
    if exp < -4 || exp >= p_i {
        format_exp(value, p - 1, true)
    } else {
        let decimals = usize::try_from(p_i - 1 - exp).unwrap_or(0);
        trim_fraction(&format!("{value:.decimals$}"))
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_format_matches_printf_g15() {
        let f = DoubleFormat::default();
        assert_eq!(f.format(0.0), "0");
        assert_eq!(f.format(1.5), "1.5");
        assert_eq!(f.format(100.0), "100");
        assert_eq!(f.format(0.1), "0.1");
        assert_eq!(f.format(1e20), "1e+20");
        assert_eq!(f.format(1.25e-7), "1.25e-07");
        assert_eq!(f.format(-2.5), "-2.5");
        assert_eq!(f.format(123_456_789_012_345_680.0), "1.23456789012346e+17");
    }

    #[test]
    fn parses_fixed_and_exponent_formats() -> anyhow::Result<()> {
        assert_eq!(DoubleFormat::parse("%.2f")?.format(3.14159), "3.14");
        assert_eq!(DoubleFormat::parse("%.3e")?.format(1234.56), "1.235e+03");
        assert_eq!(DoubleFormat::parse("%g")?.format(1_234_567.0), "1.23457e+06");
        assert_eq!(DoubleFormat::parse("")?, DoubleFormat::default());
        assert!(DoubleFormat::parse("%d").is_err());
        assert!(DoubleFormat::parse("abc").is_err());
        Ok(())
    }

    proptest! {
        #[test]
        fn general_format_parses_back_close(v in -1.0e12_f64..1.0e12_f64) {
            let text = DoubleFormat::default().format(v);
            let back: f64 = text.parse().map_err(|e| TestCaseError::fail(format!("{text}: {e}")))?;
            prop_assert!((back - v).abs() <= v.abs() * 1e-13 + 1e-300);
        }
    }
}
