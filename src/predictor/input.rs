use crate::error::PredictError;

/// Number of trailing prices the model consumes.
pub const WINDOW_LEN: usize = 100;

/// Exactly `WINDOW_LEN` finite prices, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionWindow(Box<[f64; WINDOW_LEN]>);

impl PredictionWindow {
    pub fn values(&self) -> &[f64; WINDOW_LEN] {
        &self.0
    }
}

impl TryFrom<Vec<f64>> for PredictionWindow {
    type Error = PredictError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        if values.len() != WINDOW_LEN {
            return Err(PredictError::Validation {
                expected: WINDOW_LEN,
                actual: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(PredictError::NonFinite { index });
        }
        let array: Box<[f64; WINDOW_LEN]> = values
            .into_boxed_slice()
            .try_into()
            .map_err(|rest: Box<[f64]>| PredictError::Validation {
                expected: WINDOW_LEN,
                actual: rest.len(),
            })?;
        Ok(Self(array))
    }
}

impl TryFrom<&str> for PredictionWindow {
    type Error = PredictError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        Self::try_from(parse_input(text))
    }
}

/// Splits comma-separated text into numbers, dropping tokens that do not
/// start with a finite decimal number.
pub fn parse_input(text: &str) -> Vec<f64> {
    text.split(',').filter_map(parse_leading_float).collect()
}

/// Parses the longest decimal prefix of `token` after leading whitespace,
/// so `"12abc"` gives 12 and `"abc"` gives nothing.
pub fn parse_leading_float(token: &str) -> Option<f64> {
    let s = token.trim_start().as_bytes();
    let mut end = 0;

    if end < s.len() && (s[end] == b'+' || s[end] == b'-') {
        end += 1;
    }

    let int_start = end;
    while end < s.len() && s[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < s.len() && s[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < s.len() && s[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if digits > 0 || frac_end > frac_start {
            digits += frac_end - frac_start;
            end = frac_end;
        }
    }

    if digits == 0 {
        return None;
    }

    if end < s.len() && (s[end] == b'e' || s[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < s.len() && (s[exp_end] == b'+' || s[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < s.len() && s[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    let literal = std::str::from_utf8(&s[..end]).ok()?;
    literal.parse::<f64>().ok().filter(|v| v.is_finite())
}
