//! Command descriptors and the generic command-definition parser.
//!
//! A generic definition line looks like
//!
//! ```text
//! setTemp {Set the loop setpoint} | SETP %d,%.3f | Loop {1 or 2} [1,2] (1) | Temperature {K} [0,500]
//! ```
//!
//! The fields are separated by `|`. The first names the command (with an
//! optional `{description}`), the second is the wire template and every
//! further field describes one parameter: its name plus an optional
//! `{tooltip}`, `[min,max]` range and `(default)` in any order. `\|`, `\{`,
//! `\[`, `\(`, `\}`, `\]` and `\)` stand for the literal characters.

use super::wire_format::WireTemplate;
use crate::error::{AppResult, DispatchError};
use serde::Serialize;
use std::fmt;

/// Commands whose name starts with this prefix take a trailing file extension
/// and write the instrument's reply to a file.
pub const SAVE_PREFIX: &str = "save";

/// Commands whose name starts with this prefix return the instrument's reply.
pub const GET_PREFIX: &str = "get";

/// Parameter types a script argument can be converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Passed through verbatim
    String,
    /// 64-bit signed integer; a leading `+` is accepted
    Int,
    /// 64-bit float
    Float,
    /// `true` or `false`, any case
    Bool,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Inclusive numeric range of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamRange {
    /// Range declared on a `%d` parameter
    Int {
        /// Lower bound
        min: i64,
        /// Upper bound
        max: i64,
    },
    /// Range declared on any other parameter
    Float {
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },
}

impl ParamRange {
    fn bounds(&self) -> (f64, f64) {
        match *self {
            Self::Int { min, max } => (min as f64, max as f64),
            Self::Float { min, max } => (min, max),
        }
    }

    fn bound_strings(&self) -> (String, String) {
        match *self {
            Self::Int { min, max } => (min.to_string(), max.to_string()),
            Self::Float { min, max } => (min.to_string(), max.to_string()),
        }
    }
}

/// One parameter of a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    /// Display name
    pub name: String,
    /// Target type of the script argument
    #[serde(rename = "type")]
    pub ty: ParamType,
    /// Help text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    /// Allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<ParamRange>,
    /// Literal used when the script leaves the argument empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ParamSpec {
    /// A parameter without tooltip, range or default.
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            tooltip: None,
            range: None,
            default: None,
        }
    }

    /// Attach an inclusive range.
    pub fn with_range(mut self, range: ParamRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Attach a help text.
    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    /// Convert one script token to this parameter's type.
    pub fn convert(&self, token: &str) -> AppResult<ArgValue> {
        let token = match (&self.default, token.is_empty()) {
            (Some(default), true) => default.as_str(),
            _ => token,
        };
        let failed = || DispatchError::TypeConversion {
            value: token.to_string(),
            expected: self.ty.to_string(),
        };
        match self.ty {
            ParamType::String => Ok(ArgValue::Str(token.to_string())),
            ParamType::Int => token
                .strip_prefix('+')
                .unwrap_or(token)
                .parse::<i64>()
                .map(ArgValue::Int)
                .map_err(|_| failed()),
            ParamType::Float => match token.parse::<f64>() {
                Ok(v) if !v.is_nan() => Ok(ArgValue::Float(v)),
                _ => Err(failed()),
            },
            ParamType::Bool => {
                if token.eq_ignore_ascii_case("true") {
                    Ok(ArgValue::Bool(true))
                } else if token.eq_ignore_ascii_case("false") {
                    Ok(ArgValue::Bool(false))
                } else {
                    Err(failed())
                }
            }
        }
    }

    /// Fail with `RangeViolation` when `value` lies outside the declared range.
    pub fn check_range(&self, value: &ArgValue) -> AppResult<()> {
        let Some(range) = &self.range else {
            return Ok(());
        };
        let (min, max) = range.bounds();
        match value.as_f64() {
            Some(v) if v >= min && v <= max => Ok(()),
            _ => {
                let (min, max) = range.bound_strings();
                Err(DispatchError::RangeViolation {
                    parameter: self.name.clone(),
                    value: value.to_string(),
                    min,
                    max,
                })
            }
        }
    }
}

/// A converted script argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Text, quotes included if the script quoted it
    Str(String),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Boolean
    Bool(bool),
}

impl ArgValue {
    /// Numeric view; strings are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(v) => Some(*v),
            Self::Str(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    /// Integer view.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Text view; surrounding double quotes are removed.
    pub fn as_text(&self) -> String {
        match self {
            Self::Str(s) => s
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(s)
                .to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Where a descriptor came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Provenance {
    /// Implemented in code by the handler itself
    Reflected,
    /// Parsed from a definition file; executed by rendering the template
    Generic {
        /// The wire template as written
        template: String,
    },
}

/// One invocable command of an instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandDescriptor {
    /// Name used in scripts (case-sensitive)
    pub name: String,
    /// Help text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parameters in argument order
    pub params: Vec<ParamSpec>,
    /// Origin of the command
    pub provenance: Provenance,
    /// Runs during the validating pass too; the handler itself skips I/O
    pub self_validating: bool,
}

impl CommandDescriptor {
    /// A descriptor for a command implemented in code.
    pub fn reflected(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            params: Vec::new(),
            provenance: Provenance::Reflected,
            self_validating: false,
        }
    }

    /// Append a parameter.
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Set the help text.
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the command as validating its own arguments.
    pub fn self_validating(mut self) -> Self {
        self.self_validating = true;
        self
    }

    /// Number of script arguments.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// True when any parameter declares a range.
    pub fn range_checked(&self) -> bool {
        self.params.iter().any(|p| p.range.is_some())
    }

    /// Wire template of a generic command.
    pub fn template(&self) -> Option<&str> {
        match &self.provenance {
            Provenance::Generic { template } => Some(template),
            Provenance::Reflected => None,
        }
    }

    /// True for commands that write their reply to a file.
    pub fn is_save(&self) -> bool {
        starts_with_ignore_case(&self.name, SAVE_PREFIX)
    }

    /// True for commands that return the instrument's reply.
    pub fn is_get(&self) -> bool {
        starts_with_ignore_case(&self.name, GET_PREFIX)
    }

    /// Convert script tokens to typed arguments. The caller has matched arity.
    pub fn convert_args(&self, tokens: &[String]) -> AppResult<Vec<ArgValue>> {
        self.params
            .iter()
            .zip(tokens)
            .map(|(param, token)| param.convert(token))
            .collect()
    }

    /// Run every declared range check.
    pub fn check_ranges(&self, args: &[ArgValue]) -> AppResult<()> {
        for (param, value) in self.params.iter().zip(args) {
            param.check_range(value)?;
        }
        Ok(())
    }

    /// One-line summary such as `setTemp(Loop: int [1, 2], T: float)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| match &p.range {
                Some(range) => {
                    let (min, max) = range.bound_strings();
                    format!("{}: {} [{}, {}]", p.name, p.ty, min, max)
                }
                None => format!("{}: {}", p.name, p.ty),
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

// =============================================================================
// Definition-line parser
// =============================================================================

/// Parse one generic command-definition line.
pub fn parse_descriptor(line: &str) -> AppResult<CommandDescriptor> {
    let malformed = |reason: String| DispatchError::MalformedDescriptor(format!("{reason} in '{line}'"));

    let fields = split_fields(line);
    let head = fields.first().map(String::as_str).unwrap_or("");

    let (name, description) = split_head(head).map_err(malformed)?;
    if name.is_empty() {
        return Err(malformed("missing command name".to_string()));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(malformed(format!("command name '{name}' contains whitespace")));
    }

    let template = fields.get(1).map(|t| t.trim()).unwrap_or("");
    if template.is_empty() {
        return Err(malformed("missing wire template".to_string()));
    }
    let wire = WireTemplate::parse(template).map_err(malformed)?;

    let mut types: Vec<ParamType> = wire.placeholders().map(|p| p.param_type()).collect();
    if starts_with_ignore_case(&name, SAVE_PREFIX) {
        types.push(ParamType::String);
    }

    let param_fields = fields.get(2..).unwrap_or(&[]);
    if param_fields.len() < types.len() {
        return Err(malformed(format!(
            "too few parameter names: template needs {}, found {}",
            types.len(),
            param_fields.len()
        )));
    }
    if param_fields.len() > types.len() {
        return Err(malformed(format!(
            "too many parameter names: template needs {}, found {}",
            types.len(),
            param_fields.len()
        )));
    }

    let params = param_fields
        .iter()
        .zip(types)
        .enumerate()
        .map(|(i, (field, ty))| parse_param(field, ty, i))
        .collect::<Result<Vec<_>, String>>()
        .map_err(malformed)?;

    let mut descriptor = CommandDescriptor {
        name,
        description,
        params,
        provenance: Provenance::Generic {
            template: template.to_string(),
        },
        self_validating: false,
    };
    descriptor.self_validating = descriptor.range_checked();
    Ok(descriptor)
}

/// Split on unescaped `|` and restore `\|`.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                chars.next();
                current.push('|');
            }
            '|' => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

fn split_head(head: &str) -> Result<(String, Option<String>), String> {
    let mut text = head.to_string();
    let description = take_group(&mut text, '{', '}')?;
    Ok((text.trim().to_string(), description.map(|d| restore_escapes(d.trim()))))
}

fn parse_param(field: &str, ty: ParamType, index: usize) -> Result<ParamSpec, String> {
    let mut text = field.to_string();
    let tooltip = take_group(&mut text, '{', '}')?;
    let range = take_group(&mut text, '[', ']')?;
    let default = take_group(&mut text, '(', ')')?;

    let name = restore_escapes(text.trim());
    let mut spec = ParamSpec::new(
        if name.is_empty() {
            format!("arg{}", index + 1)
        } else {
            name
        },
        ty,
    );
    spec.tooltip = tooltip.map(|t| restore_escapes(t.trim()));
    spec.default = default.map(|d| restore_escapes(d.trim()));
    if let Some(range) = range {
        spec.range = Some(parse_range(&range, ty)?);
    }
    Ok(spec)
}

fn parse_range(text: &str, ty: ParamType) -> Result<ParamRange, String> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let (min, max) = compact
        .split_once(',')
        .ok_or_else(|| format!("range '[{text}]' needs two comma-separated bounds"))?;
    let range = if ty == ParamType::Int {
        let parse = |s: &str| {
            s.strip_prefix('+')
                .unwrap_or(s)
                .parse::<i64>()
                .map_err(|_| format!("range bound '{s}' is not an integer"))
        };
        let (min, max) = (parse(min)?, parse(max)?);
        if min > max {
            return Err(format!("range [{min},{max}] is empty"));
        }
        ParamRange::Int { min, max }
    } else {
        let parse = |s: &str| {
            s.parse::<f64>()
                .map_err(|_| format!("range bound '{s}' is not a number"))
        };
        let (min, max) = (parse(min)?, parse(max)?);
        if min > max {
            return Err(format!("range [{min},{max}] is empty"));
        }
        ParamRange::Float { min, max }
    };
    Ok(range)
}

/// Remove the first unescaped `open ... close` group from `text` and return
/// its content.
fn take_group(text: &mut String, open: char, close: char) -> Result<Option<String>, String> {
    let Some(start) = find_unescaped(text, open, 0) else {
        return Ok(None);
    };
    let content_start = start + open.len_utf8();
    let end = find_unescaped(text, close, content_start)
        .ok_or_else(|| format!("unterminated '{open}'"))?;
    let content = text[content_start..end].to_string();
    text.replace_range(start..end + close.len_utf8(), " ");
    Ok(Some(content))
}

fn find_unescaped(text: &str, target: char, from: usize) -> Option<usize> {
    let mut prev = if from == 0 {
        None
    } else {
        text[..from].chars().next_back()
    };
    for (i, c) in text[from..].char_indices() {
        if c == target && prev != Some('\\') {
            return Some(from + i);
        }
        prev = Some(c);
    }
    None
}

fn restore_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('\\', Some(&next)) if "{[()]}|".contains(next) => {
                out.push(next);
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_ranged_int_parameter() {
        let d = parse_descriptor("setT | SETP %d | Loop {1 or 2} [1,2] (1)").unwrap();
        assert_eq!(d.name, "setT");
        assert_eq!(d.template(), Some("SETP %d"));
        assert_eq!(d.arity(), 1);
        let p = &d.params[0];
        assert_eq!(p.name, "Loop");
        assert_eq!(p.ty, ParamType::Int);
        assert_eq!(p.tooltip.as_deref(), Some("1 or 2"));
        assert_eq!(p.range, Some(ParamRange::Int { min: 1, max: 2 }));
        assert_eq!(p.default.as_deref(), Some("1"));
        assert!(d.range_checked());
        assert!(d.self_validating);
    }

    #[test]
    fn placeholder_count_must_match_parameter_names() {
        let err = parse_descriptor("setT | SETP %d,%f | Loop [1,2]").unwrap_err();
        assert!(matches!(err, DispatchError::MalformedDescriptor(ref m) if m.contains("too few")));

        let err = parse_descriptor("reset | *RST | Extra").unwrap_err();
        assert!(matches!(err, DispatchError::MalformedDescriptor(ref m) if m.contains("too many")));
    }

    #[test]
    fn missing_fields_are_malformed() {
        assert!(parse_descriptor("").is_err());
        assert!(parse_descriptor("  | *RST").is_err());
        assert!(parse_descriptor("reset").is_err());
        assert!(parse_descriptor("reset |   ").is_err());
        assert!(parse_descriptor("re set | *RST").is_err());
        assert!(parse_descriptor("setF | FREQ %x | f").is_err());
    }

    #[test]
    fn description_and_escapes() {
        let d = parse_descriptor(
            r"setMode {Select \{AC\} or DC \| coupling} | MODE %s | Mode {e.g. \(AC\)} (AC)",
        )
        .unwrap();
        assert_eq!(d.description.as_deref(), Some("Select {AC} or DC | coupling"));
        let p = &d.params[0];
        assert_eq!(p.name, "Mode");
        assert_eq!(p.tooltip.as_deref(), Some("e.g. (AC)"));
        assert_eq!(p.default.as_deref(), Some("AC"));
        assert!(!d.range_checked());
    }

    #[test]
    fn bracket_groups_in_any_order() {
        let d = parse_descriptor("setV | VOLT %.3f | (0.5) [ 0 , 10.5 ] Voltage {volts}").unwrap();
        let p = &d.params[0];
        assert_eq!(p.name, "Voltage");
        assert_eq!(p.ty, ParamType::Float);
        assert_eq!(p.range, Some(ParamRange::Float { min: 0.0, max: 10.5 }));
        assert_eq!(p.default.as_deref(), Some("0.5"));
        assert_eq!(p.tooltip.as_deref(), Some("volts"));
    }

    #[test]
    fn save_prefix_adds_extension_parameter() {
        let d = parse_descriptor("saveTrace | CURV? %d | Curve | Extension {file extension}").unwrap();
        assert_eq!(d.arity(), 2);
        assert_eq!(d.params[1].ty, ParamType::String);
        assert!(d.is_save());

        let err = parse_descriptor("SaveTrace | CURV? %d | Curve").unwrap_err();
        assert!(matches!(err, DispatchError::MalformedDescriptor(_)));
    }

    #[test]
    fn bad_ranges_are_malformed() {
        assert!(parse_descriptor("setT | SETP %d | Loop [1]").is_err());
        assert!(parse_descriptor("setT | SETP %d | Loop [1.5,2]").is_err());
        assert!(parse_descriptor("setT | SETP %d | Loop [3,2]").is_err());
        assert!(parse_descriptor("setT | SETP %d | Loop [1,2").is_err());
    }

    #[test]
    fn converts_arguments_by_type() {
        let int = ParamSpec::new("n", ParamType::Int);
        assert_eq!(int.convert("+12").unwrap(), ArgValue::Int(12));
        assert!(matches!(
            int.convert("1.5"),
            Err(DispatchError::TypeConversion { .. })
        ));

        let float = ParamSpec::new("x", ParamType::Float);
        assert_eq!(float.convert("2.5e3").unwrap(), ArgValue::Float(2500.0));
        assert!(float.convert("NaN").is_err());

        let flag = ParamSpec::new("on", ParamType::Bool);
        assert_eq!(flag.convert("TRUE").unwrap(), ArgValue::Bool(true));
        assert!(flag.convert("yes").is_err());

        let text = ParamSpec::new("msg", ParamType::String);
        assert_eq!(
            text.convert("\"a b\"").unwrap(),
            ArgValue::Str("\"a b\"".into())
        );
    }

    #[test]
    fn empty_argument_takes_default() {
        let mut loop_param = ParamSpec::new("Loop", ParamType::Int);
        loop_param.default = Some("1".into());
        assert_eq!(loop_param.convert("").unwrap(), ArgValue::Int(1));
    }

    #[test]
    fn range_checks_compare_as_numbers() {
        let p = ParamSpec::new("Loop", ParamType::Int).with_range(ParamRange::Int { min: 1, max: 2 });
        assert!(p.check_range(&ArgValue::Int(2)).is_ok());
        let err = p.check_range(&ArgValue::Int(3)).unwrap_err();
        assert!(err.to_string().contains("[1, 2]"));

        let s = ParamSpec::new("ch", ParamType::String)
            .with_range(ParamRange::Float { min: 0.0, max: 1.0 });
        assert!(s.check_range(&ArgValue::Str("0.5".into())).is_ok());
        assert!(s.check_range(&ArgValue::Str("A".into())).is_err());
    }

    #[test]
    fn text_view_strips_quotes() {
        assert_eq!(ArgValue::Str("\"hello\"".into()).as_text(), "hello");
        assert_eq!(ArgValue::Str("plain".into()).as_text(), "plain");
        assert_eq!(ArgValue::Int(3).as_text(), "3");
    }
}
