//! Line lexer.
//!
//! A script line is `<head> <command> <arg>;<arg>;...` for instrument commands
//! and `<DIRECTIVE> <arg>;<arg>;...` for directives. Comments start with `%`
//! or `//`. Double quotes group text (the quotes stay in the token) and a
//! backslash escapes the next `;`, `"` or `%`.

/// Prefix of a line that belongs to an embedded snippet block.
pub const SNIPPET_MARKER: char = '|';

const ARG_DELIMITER: char = ';';

/// Interpreter directives, recognised case-insensitively in head position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// `MAKE alias; display name; connection`
    DefineInstrument,
    /// `INCLUDE file`
    Include,
}

impl Directive {
    /// Match a head token against the directive keywords.
    pub fn from_head(head: &str) -> Option<Self> {
        if head.eq_ignore_ascii_case("MAKE") {
            Some(Self::DefineInstrument)
        } else if head.eq_ignore_ascii_case("INCLUDE") {
            Some(Self::Include)
        } else {
            None
        }
    }

    /// Keyword as written in scripts.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::DefineInstrument => "MAKE",
            Self::Include => "INCLUDE",
        }
    }
}

/// Split one script line into trimmed tokens.
///
/// Returns an empty vector for blank and comment-only lines.
pub fn tokenize(line: &str) -> Vec<String> {
    let text = strip_comment(line).trim();
    if text.is_empty() {
        return Vec::new();
    }

    let (head, rest) = match split_once(text, is_head_delimiter) {
        Some(parts) => parts,
        None => return vec![unescape(text)],
    };

    let mut tokens = vec![unescape(head)];
    match Directive::from_head(head) {
        Some(_) => tokens.extend(split_args(rest)),
        None => match split_once(rest, is_head_delimiter) {
            Some((command, args)) => {
                tokens.push(unescape(command));
                tokens.extend(split_args(args));
            }
            None => tokens.push(unescape(rest)),
        },
    }
    tokens
}

fn is_head_delimiter(c: char) -> bool {
    c.is_whitespace() || c == ARG_DELIMITER
}

/// Split at the first unquoted, unescaped delimiter.
///
/// A whitespace split swallows one following `;` so that `a b ;c` reads
/// like `a b;c`.
fn split_once(text: &str, is_delimiter: fn(char) -> bool) -> Option<(&str, &str)> {
    let (at, delimiter) = find_unquoted(text, is_delimiter)?;
    let head = &text[..at];
    let mut rest = &text[at + delimiter.len_utf8()..];
    if delimiter != ARG_DELIMITER {
        rest = rest.trim_start();
        if let Some(stripped) = rest.strip_prefix(ARG_DELIMITER) {
            rest = stripped;
        }
    }
    Some((head, rest))
}

fn split_args(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some((at, _)) = find_unquoted(rest, |c| c == ARG_DELIMITER) {
        tokens.push(unescape(&rest[..at]));
        rest = &rest[at + ARG_DELIMITER.len_utf8()..];
    }
    tokens.push(unescape(rest));
    tokens
}

fn find_unquoted(text: &str, is_delimiter: impl Fn(char) -> bool) -> Option<(usize, char)> {
    let mut in_quotes = false;
    let mut prev = None;
    for (i, c) in text.char_indices() {
        let escaped = prev == Some('\\');
        if c == '"' && !escaped {
            in_quotes = !in_quotes;
        } else if !in_quotes && !escaped && is_delimiter(c) {
            return Some((i, c));
        }
        prev = Some(c);
    }
    None
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let mut prev = None;
    for (i, c) in line.char_indices() {
        let escaped = prev == Some('\\');
        if c == '"' && !escaped {
            in_quotes = !in_quotes;
        } else if !in_quotes && !escaped {
            if c == '%' || (c == '/' && line[i + 1..].starts_with('/')) {
                return &line[..i];
            }
        }
        prev = Some(c);
    }
    line
}

fn unescape(token: &str) -> String {
    token
        .replace("\\;", ";")
        .replace("\\\"", "\"")
        .replace("\\%", "%")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(line: &str) -> Vec<String> {
        tokenize(line)
    }

    #[test]
    fn directive_splits_on_semicolons() {
        assert_eq!(toks("MAKE a;B;GPIB9"), vec!["MAKE", "a", "B", "GPIB9"]);
        assert_eq!(
            toks("make ls; Lakeshore 340 ; GPIB 12"),
            vec!["make", "ls", "Lakeshore 340", "GPIB 12"]
        );
    }

    #[test]
    fn escaped_delimiter_survives() {
        assert_eq!(toks("a b;c\\;d"), vec!["a", "b", "c;d"]);
    }

    #[test]
    fn command_line_splits_head_then_arguments() {
        assert_eq!(
            toks("ls setTemp 1; 300.5"),
            vec!["ls", "setTemp", "1", "300.5"]
        );
        assert_eq!(
            toks("ut StatusMessage cooling down now"),
            vec!["ut", "StatusMessage", "cooling down now"]
        );
        assert_eq!(toks("ls getTemp"), vec!["ls", "getTemp"]);
        assert_eq!(toks("a b ;c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn comments_and_blank_lines() {
        assert!(toks("").is_empty());
        assert!(toks("   ").is_empty());
        assert!(toks("% just a comment").is_empty());
        assert!(toks("// also a comment").is_empty());
        assert_eq!(toks("ls getTemp A // read sensor"), vec!["ls", "getTemp", "A"]);
        assert_eq!(toks("ls setTemp 1;4.2 % setpoint"), vec!["ls", "setTemp", "1", "4.2"]);
    }

    #[test]
    fn quotes_are_kept_and_protect_delimiters() {
        assert_eq!(
            toks("ut StatusMessage \"a;b // c\";x"),
            vec!["ut", "StatusMessage", "\"a;b // c\"", "x"]
        );
        assert_eq!(
            toks("ut StatusMessage say \\\"hi\\\""),
            vec!["ut", "StatusMessage", "say \"hi\""]
        );
    }

    #[test]
    fn trailing_delimiter_keeps_empty_token() {
        assert_eq!(toks("a b;c;"), vec!["a", "b", "c", ""]);
        assert_eq!(toks("INCLUDE sub;"), vec!["INCLUDE", "sub", ""]);
    }

    #[test]
    fn escaped_percent_is_not_a_comment() {
        assert_eq!(toks("fg setDuty 50\\%"), vec!["fg", "setDuty", "50%"]);
    }

    #[test]
    fn relexing_joined_tokens_is_stable() {
        for line in ["MAKE a;B;GPIB9", "ls setTemp 1;300", "INCLUDE sub/cool"] {
            let tokens = toks(line);
            let rejoined = tokens.join(";");
            assert_eq!(toks(&rejoined), tokens, "line: {line}");
        }
    }

    #[test]
    fn directives_are_case_insensitive() {
        assert_eq!(Directive::from_head("Include"), Some(Directive::Include));
        assert_eq!(Directive::from_head("MAKE"), Some(Directive::DefineInstrument));
        assert_eq!(Directive::from_head("ls"), None);
    }
}
