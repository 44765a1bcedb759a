use debugger::Variables;

use crate::expression;

/// A single parsed script line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement<'a> {
    /// Blank lines and `#` comments
    Nop,
    Assign { name: &'a str, value: &'a str },
    Output(&'a str),
}

pub fn parse_line(line: &str) -> Statement<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Statement::Nop;
    }

    if let Some((name, value)) = trimmed.split_once('=') {
        let name = name.trim();
        if is_identifier(name) {
            return Statement::Assign { name, value };
        }
    }
    Statement::Output(trimmed)
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Replace `${name}` references with variable values.
///
/// References to unknown variables and unterminated references are kept verbatim.
pub fn substitute(text: &str, variables: &Variables) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let reference = &rest[start..];
        let Some(end) = reference.find('}') else {
            break;
        };

        let name = &reference[2..end];
        match variables.get(name) {
            Some(value) => output.push_str(value),
            None => output.push_str(&reference[..=end]),
        }
        rest = &reference[end + 1..];
    }

    // covers both the plain tail and an unterminated reference
    if let Some(start) = rest.find("${") {
        output.push_str(&rest[start..]);
    } else {
        output.push_str(rest);
    }
    output
}

/// Value stored for an assignment: the evaluated integer when the substituted text is an
/// integer expression, the trimmed text otherwise
pub fn coerce(value: &str, variables: &Variables) -> String {
    let substituted = substitute(value, variables);
    match expression::evaluate(&substituted, variables) {
        Ok(n) => n.to_string(),
        Err(e) => {
            tracing::trace!(error = %e, value = %substituted, "storing value as text");
            substituted.trim().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use debugger::Variables;

    use super::{Statement, coerce, is_identifier, parse_line, substitute};

    fn variables() -> Variables {
        let mut variables = Variables::new();
        variables.insert("x".to_string(), "1".to_string());
        variables.insert("who".to_string(), "world".to_string());
        variables
    }

    #[test]
    fn parses_statements() {
        assert_eq!(parse_line(""), Statement::Nop);
        assert_eq!(parse_line("   "), Statement::Nop);
        assert_eq!(parse_line("  # comment = 1"), Statement::Nop);
        assert_eq!(
            parse_line("x = 1 + 2"),
            Statement::Assign {
                name: "x",
                value: " 1 + 2"
            }
        );
        assert_eq!(
            parse_line("total=x"),
            Statement::Assign {
                name: "total",
                value: "x"
            }
        );
        assert_eq!(parse_line("hello world"), Statement::Output("hello world"));
        assert_eq!(parse_line("1 + 1 = 2"), Statement::Output("1 + 1 = 2"));
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("x"));
        assert!(is_identifier("_tmp2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier("a b"));
    }

    #[test]
    fn substitutes_references() {
        let variables = variables();
        assert_eq!(substitute("hello ${who}!", &variables), "hello world!");
        assert_eq!(substitute("${x}${x}", &variables), "11");
        assert_eq!(substitute("${missing} stays", &variables), "${missing} stays");
        assert_eq!(substitute("open ${who", &variables), "open ${who");
        assert_eq!(substitute("no refs", &variables), "no refs");
    }

    #[test]
    fn coerces_values() {
        let variables = variables();
        assert_eq!(coerce(" 42 ", &variables), "42");
        assert_eq!(coerce("${x} + 1", &variables), "2");
        assert_eq!(coerce("x * 10", &variables), "10");
        assert_eq!(coerce("  hello ${who} ", &variables), "hello world");
        assert_eq!(coerce("1 / 0", &variables), "1 / 0");
    }

    #[test]
    fn deeply_nested_values_are_stored_as_text() {
        let nested = format!("{}1", "(".repeat(100_000));
        assert_eq!(coerce(&nested, &variables()), nested);
    }
}
