//! printf-style wire templates such as `SETP %d,%.3f`.
//!
//! Supported placeholders: `%[flags][width][.precision]conv` with flags
//! `-`, `0`, `+` and space, and conversions `s d e f b` in either case.
//! Upper-case conversions upper-case their output. `\%` is a literal percent.

use super::descriptor::{ArgValue, ParamType};
use crate::error::{AppResult, DispatchError};

/// One `%...` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    left_align: bool,
    zero_pad: bool,
    plus_sign: bool,
    space_sign: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conversion: char,
}

impl Placeholder {
    /// Parameter type implied by the conversion letter.
    pub fn param_type(&self) -> ParamType {
        match self.conversion.to_ascii_lowercase() {
            'd' => ParamType::Int,
            'e' | 'f' => ParamType::Float,
            'b' => ParamType::Bool,
            _ => ParamType::String,
        }
    }

    fn render(&self, value: &ArgValue) -> AppResult<String> {
        let upper = self.conversion.is_ascii_uppercase();
        let body = match self.conversion.to_ascii_lowercase() {
            's' => {
                let text = value.to_string();
                match self.precision {
                    Some(p) => text.chars().take(p).collect(),
                    None => text,
                }
            }
            'd' => {
                let n = value.as_i64().ok_or_else(|| mismatch(value, "int"))?;
                self.signed(n < 0, n.unsigned_abs().to_string())
            }
            'f' => {
                let v = value.as_f64().ok_or_else(|| mismatch(value, "float"))?;
                let digits = format!("{:.*}", self.precision.unwrap_or(6), v.abs());
                self.signed(v.is_sign_negative() && v != 0.0, digits)
            }
            'e' => {
                let v = value.as_f64().ok_or_else(|| mismatch(value, "float"))?;
                let digits = scientific(v.abs(), self.precision.unwrap_or(6));
                self.signed(v.is_sign_negative() && v != 0.0, digits)
            }
            'b' => match value {
                ArgValue::Bool(b) => b.to_string(),
                _ => "true".to_string(),
            },
            other => {
                return Err(DispatchError::MalformedDescriptor(format!(
                    "unrecognized conversion '%{other}'"
                )))
            }
        };
        let body = if upper { body.to_uppercase() } else { body };
        Ok(self.pad(body))
    }

    fn signed(&self, negative: bool, digits: String) -> String {
        let sign = if negative {
            "-"
        } else if self.plus_sign {
            "+"
        } else if self.space_sign {
            " "
        } else {
            ""
        };
        match self.width {
            Some(width) if self.zero_pad && !self.left_align => {
                let fill = width.saturating_sub(sign.len() + digits.len());
                format!("{sign}{}{digits}", "0".repeat(fill))
            }
            _ => format!("{sign}{digits}"),
        }
    }

    fn pad(&self, body: String) -> String {
        let Some(width) = self.width else {
            return body;
        };
        let len = body.chars().count();
        if len >= width {
            body
        } else if self.left_align {
            format!("{body}{}", " ".repeat(width - len))
        } else {
            format!("{}{body}", " ".repeat(width - len))
        }
    }
}

/// C-style exponent: at least two digits and an explicit sign.
fn scientific(v: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, v);
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => raw,
    }
}

fn mismatch(value: &ArgValue, expected: &str) -> DispatchError {
    DispatchError::TypeConversion {
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A parsed wire template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireTemplate {
    segments: Vec<Segment>,
}

impl WireTemplate {
    /// Parse `template`; the error text names the offending placeholder.
    pub fn parse(template: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&'%') => {
                    chars.next();
                    literal.push('%');
                }
                '%' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let mut spec = Placeholder {
                        left_align: false,
                        zero_pad: false,
                        plus_sign: false,
                        space_sign: false,
                        width: None,
                        precision: None,
                        conversion: 's',
                    };
                    while let Some(&flag) = chars.peek() {
                        match flag {
                            '-' => spec.left_align = true,
                            '0' => spec.zero_pad = true,
                            '+' => spec.plus_sign = true,
                            ' ' => spec.space_sign = true,
                            _ => break,
                        }
                        chars.next();
                    }
                    spec.width = take_number(&mut chars);
                    if chars.peek() == Some(&'.') {
                        chars.next();
                        spec.precision = Some(take_number(&mut chars).unwrap_or(0));
                    }
                    match chars.next() {
                        Some(conv) if "sSdDeEfFbB".contains(conv) => spec.conversion = conv,
                        Some(conv) => return Err(format!("unrecognized conversion '%{conv}'")),
                        None => return Err("template ends inside a '%' placeholder".to_string()),
                    }
                    segments.push(Segment::Placeholder(spec));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Placeholders in template order.
    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(p) => Some(p),
            Segment::Literal(_) => None,
        })
    }

    /// Number of placeholders.
    pub fn arity(&self) -> usize {
        self.placeholders().count()
    }

    /// Substitute `args` into the template. Extra arguments are ignored.
    pub fn render(&self, args: &[ArgValue]) -> AppResult<String> {
        let mut out = String::new();
        let mut args = args.iter();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(p) => {
                    let value = args.next().ok_or_else(|| {
                        DispatchError::MalformedDescriptor(
                            "more placeholders than arguments".to_string(),
                        )
                    })?;
                    out.push_str(&p.render(value)?);
                }
            }
        }
        Ok(out)
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits.parse().ok()
}
