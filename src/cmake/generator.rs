//! CMake generator expression evaluation
//!
//! Only the subset of `$<...>` functions that shows up in real-world traces
//! is understood. Unknown functions evaluate to an empty string.

use crate::cmake::version::version_compare;

/// Evaluate every generator expression in `raw`
///
/// Text outside of `$<...>` is copied unchanged, nested expressions are
/// evaluated innermost first.
pub fn parse_generator_expressions(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;

    while i < chars.len() {
        if starts_expression(&chars, i) {
            out.push_str(&eval_expression(&chars, &mut i));
        } else {
            out.push(chars[i]);
        }
        i += 1;
    }

    out
}

fn starts_expression(chars: &[char], i: usize) -> bool {
    i + 1 < chars.len() && chars[i] == '$' && chars[i + 1] == '<'
}

/// Evaluate the expression opening at `*i`, leaving `*i` on its closing `>`
fn eval_expression(chars: &[char], i: &mut usize) -> String {
    *i += 2;
    let mut body = String::new();

    while *i < chars.len() {
        if chars[*i] == '>' {
            break;
        } else if starts_expression(chars, *i) {
            body.push_str(&eval_expression(chars, i));
        } else {
            body.push(chars[*i]);
        }
        *i += 1;
    }

    let (func, args) = match body.split_once(':') {
        Some((func, args)) => (func.trim(), args.trim()),
        None => (body.trim(), ""),
    };

    evaluate_function(func, args)
}

fn evaluate_function(func: &str, args: &str) -> String {
    let res = match func {
        "BOOL" => bool_str(is_truthy(args)),
        "AND" => bool_str(args.split(',').all(|x| x == "1")),
        "OR" => bool_str(args.split(',').any(|x| x == "1")),
        "NOT" => bool_str(args != "1"),

        "0" => "",
        "1" => args,

        "STREQUAL" | "EQUAL" => bool_str(
            args.split_once(',')
                .is_some_and(|(lhs, rhs)| lhs == rhs),
        ),
        "VERSION_LESS" => version_cmp("<", args),
        "VERSION_GREATER" => version_cmp(">", args),
        "VERSION_EQUAL" => version_cmp("=", args),
        "VERSION_LESS_EQUAL" => version_cmp("<=", args),
        "VERSION_GREATER_EQUAL" => version_cmp(">=", args),

        "LOWER_CASE" => return args.to_lowercase(),
        "UPPER_CASE" => return args.to_uppercase(),

        // Subprojects are always consumed from the build tree
        "INSTALL_INTERFACE" => "",
        "BUILD_INTERFACE" => args,

        "ANGLE-R" => ">",
        "COMMA" => ",",
        "SEMICOLON" => ";",

        _ => "",
    };

    res.to_string()
}

fn is_truthy(value: &str) -> bool {
    const FALSY: &[&str] = &["0", "FALSE", "OFF", "N", "NO", "IGNORE", "NOTFOUND"];
    let upper = value.to_uppercase();
    !(FALSY.contains(&upper.as_str()) || value.ends_with("-NOTFOUND"))
}

fn bool_str(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn version_cmp(op: &str, args: &str) -> &'static str {
    match args.split_once(',') {
        Some((lhs, rhs)) => bool_str(version_compare(lhs, &format!("{op}{rhs}"))),
        None => "0",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_unchanged() {
        for text in ["", "foo bar", "a$b", "x<y>z", "$", "trailing $"] {
            assert_eq!(parse_generator_expressions(text), text);
        }
    }

    #[test]
    fn test_nested_boolean_logic() {
        assert_eq!(
            parse_generator_expressions("$<AND:$<BOOL:TRUE>,$<BOOL:1>>"),
            "1"
        );
        assert_eq!(
            parse_generator_expressions("$<OR:$<BOOL:OFF>,$<BOOL:foo-NOTFOUND>>"),
            "0"
        );
        assert_eq!(parse_generator_expressions("$<NOT:0>"), "1");
        assert_eq!(parse_generator_expressions("$<$<BOOL:yes>:-DFOO>"), "-DFOO");
        assert_eq!(parse_generator_expressions("$<$<BOOL:no>:-DFOO>"), "");
    }

    #[test]
    fn test_version_comparisons() {
        assert_eq!(parse_generator_expressions("$<VERSION_LESS:1.2,1.3>"), "1");
        assert_eq!(parse_generator_expressions("$<VERSION_LESS:1.3,1.2>"), "0");
        assert_eq!(
            parse_generator_expressions("$<VERSION_GREATER_EQUAL:3.14,3.14>"),
            "1"
        );
        assert_eq!(parse_generator_expressions("$<VERSION_EQUAL:1.0>"), "0");
    }

    #[test]
    fn test_string_functions_and_constants() {
        assert_eq!(parse_generator_expressions("$<STREQUAL:a,a>"), "1");
        assert_eq!(parse_generator_expressions("$<EQUAL:1,2>"), "0");
        assert_eq!(parse_generator_expressions("$<LOWER_CASE:ABC>"), "abc");
        assert_eq!(parse_generator_expressions("$<UPPER_CASE:abc>"), "ABC");
        assert_eq!(
            parse_generator_expressions("a$<ANGLE-R>b$<COMMA>c$<SEMICOLON>d"),
            "a>b,c;d"
        );
    }

    #[test]
    fn test_interface_selection() {
        assert_eq!(
            parse_generator_expressions(
                "$<BUILD_INTERFACE:/src/include>;$<INSTALL_INTERFACE:include>"
            ),
            "/src/include;"
        );
    }

    #[test]
    fn test_unknown_functions_are_empty() {
        assert_eq!(parse_generator_expressions("x$<CONFIG:Debug>y"), "xy");
        assert_eq!(parse_generator_expressions("$<TARGET_FILE:foo>"), "");
        assert_eq!(parse_generator_expressions("$<IF:1,a,b>"), "");
    }
}
