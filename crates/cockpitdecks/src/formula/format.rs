use std::fmt::Write;

use super::{Formula, OperatorTable, VariableResolver, evaluate};
use crate::variables::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
enum Kind {
    #[default]
    General,
    Fixed,
    Integer,
    Percent,
}

/// Python-style numeric format specifier, e.g. `{:.1f}`, `{:05d}`, `{:+.2f}`, `{:.0%}`.
///
/// Braces and the leading colon are optional.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NumberFormat {
    sign: bool,
    zero_pad: bool,
    width: usize,
    precision: Option<usize>,
    kind: Kind,
}

impl NumberFormat {
    /// Parse a specifier; `None` if it is not one
    pub fn parse(spec: &str) -> Option<Self> {
        let inner = spec.trim();
        let inner = inner
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(inner);
        let mut rest = inner.strip_prefix(':').unwrap_or(inner);

        let mut format = NumberFormat::default();
        if let Some(r) = rest.strip_prefix('+') {
            format.sign = true;
            rest = r;
        }
        if let Some(r) = rest.strip_prefix('0') {
            format.zero_pad = true;
            rest = r;
        }
        let width_len = rest.chars().take_while(char::is_ascii_digit).count();
        if width_len > 0 {
            format.width = rest[..width_len].parse().ok()?;
            rest = &rest[width_len..];
        }
        if let Some(r) = rest.strip_prefix('.') {
            let len = r.chars().take_while(char::is_ascii_digit).count();
            format.precision = Some(r[..len].parse().ok()?);
            rest = &r[len..];
        }
        format.kind = match rest {
            "" => Kind::General,
            "f" | "F" => Kind::Fixed,
            "d" => Kind::Integer,
            "%" => Kind::Percent,
            _ => return None,
        };
        Some(format)
    }

    /// Format one number
    pub fn apply(&self, value: f64) -> String {
        let (scaled, suffix) = match self.kind {
            Kind::Percent => (value * 100.0, "%"),
            _ => (value, ""),
        };
        let magnitude = scaled.abs();
        let digits = match (self.kind, self.precision) {
            (Kind::Integer, _) => format!("{}", magnitude.round()),
            (Kind::Fixed, precision) => format!("{:.*}", precision.unwrap_or(6), magnitude),
            (Kind::Percent, precision) => format!("{:.*}", precision.unwrap_or(6), magnitude),
            (Kind::General, Some(precision)) => format!("{:.*}", precision, magnitude),
            (Kind::General, None) => format!("{}", magnitude),
        };

        let negative = scaled < 0.0 && digits.chars().any(|c| c.is_ascii_digit() && c != '0');
        let sign = if negative {
            "-"
        } else if self.sign {
            "+"
        } else {
            ""
        };

        let body_len = sign.len() + digits.len() + suffix.len();
        let pad = self.width.saturating_sub(body_len);
        let mut out = String::with_capacity(body_len + pad);
        if self.zero_pad {
            out.push_str(sign);
            out.extend(std::iter::repeat_n('0', pad));
        } else {
            out.extend(std::iter::repeat_n(' ', pad));
            out.push_str(sign);
        }
        out.push_str(&digits);
        out.push_str(suffix);
        out
    }
}

/// Render a value for display, numbers through `format` when given
pub fn format_value(value: &Value, format: Option<&NumberFormat>) -> String {
    match (value, format) {
        (Value::Number(n), Some(format)) => format.apply(*n),
        (value, _) => value.to_string(),
    }
}

/// Text with `${...}` placeholders.
///
/// `${formula}` stands for the control's formula result, any other name for that
/// variable's value. Both go through the control's number format.
#[derive(Clone, Debug, PartialEq)]
pub struct TextTemplate {
    source: String,
}

/// Placeholder name standing for the control's formula result
pub const FORMULA_PLACEHOLDER: &str = "formula";

impl TextTemplate {
    /// Wrap template text
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Template source
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True if the template refers to the formula result
    pub fn uses_formula(&self) -> bool {
        self.source.contains("${formula}")
    }

    /// Names of variables used directly in the template
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut rest = self.source.as_str();
        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    if name != FORMULA_PLACEHOLDER && !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                    rest = &after[end + 1..];
                }
                None => break,
            }
        }
        names
    }

    /// Substitute every placeholder
    pub fn render<R: VariableResolver + ?Sized>(
        &self,
        resolver: &R,
        formula_value: Option<&Value>,
        format: Option<&NumberFormat>,
    ) -> String {
        let mut out = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };
            let name = &after[..end];
            let value = if name == FORMULA_PLACEHOLDER {
                formula_value.cloned().unwrap_or_default()
            } else {
                resolver.resolve(name)
            };
            let _ = write!(out, "{}", format_value(&value, format));
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// Evaluate `formula` and format the result, `None` when it has no value
pub fn evaluate_formatted<R: VariableResolver + ?Sized>(
    formula: &Formula,
    resolver: &R,
    operators: &OperatorTable,
    format: Option<&NumberFormat>,
) -> Option<String> {
    evaluate(formula, resolver, operators)
        .ok()
        .map(|value| format_value(&value, format))
}
