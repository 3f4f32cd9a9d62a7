use regex::{Captures, Regex};

use super::{Call, FunctionSpec, Output, arg};
use crate::script::error::ScriptError;
use crate::script::types::{TypeSet, Value};

const STRING: TypeSet = TypeSet::STRING;
const ARRAY: TypeSet = TypeSet::ARRAY;

pub(super) static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec::new(
        "regex_match",
        &[arg("regex", STRING), arg("string", STRING)],
        Output::Fixed(ARRAY),
        regex_match,
    ),
    FunctionSpec::new(
        "regex_search",
        &[arg("regex", STRING), arg("string", STRING)],
        Output::Fixed(ARRAY),
        regex_search,
    ),
    FunctionSpec::new(
        "regex_fullmatch",
        &[arg("regex", STRING), arg("string", STRING)],
        Output::Fixed(ARRAY),
        regex_fullmatch,
    ),
    FunctionSpec::new(
        "regex_sub",
        &[arg("regex", STRING), arg("replacement", STRING), arg("string", STRING)],
        Output::Fixed(STRING),
        regex_sub,
    ),
    FunctionSpec::new(
        "regex_capture_many",
        &[arg("string", STRING), arg("regex_array", ARRAY)],
        Output::Fixed(ARRAY),
        regex_capture_many,
    ),
    FunctionSpec::new(
        "regex_capture_many_with_defaults",
        &[arg("string", STRING), arg("regex_array", ARRAY), arg("defaults", ARRAY)],
        Output::Fixed(ARRAY),
        regex_capture_many_with_defaults,
    ),
    FunctionSpec::new(
        "regex_capture_many_required",
        &[arg("string", STRING), arg("regex_array", ARRAY), arg("error_message", STRING)],
        Output::Fixed(ARRAY),
        regex_capture_many_required,
    ),
];

fn compile(call: &Call<'_>, pattern: &str) -> Result<Regex, ScriptError> {
    Regex::new(pattern).map_err(|err| call.error(format!("invalid regex '{pattern}': {err}")))
}

fn captures_to_array(captures: &Captures<'_>) -> Value {
    Value::Array(
        captures
            .iter()
            .map(|group| Value::from(group.map_or("", |group| group.as_str())))
            .collect(),
    )
}

fn anchored(call: &Call<'_>, wrap: fn(&str) -> String) -> Result<Value, ScriptError> {
    let regex = compile(call, &wrap(call.str(0)?))?;
    Ok(regex
        .captures(call.str(1)?)
        .map_or_else(|| Value::Array(Vec::new()), |captures| captures_to_array(&captures)))
}

fn regex_match(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    anchored(call, |pattern| format!(r"\A(?:{pattern})"))
}

fn regex_search(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    anchored(call, str::to_string)
}

fn regex_fullmatch(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    anchored(call, |pattern| format!(r"\A(?:{pattern})\z"))
}

/// Rewrites `\1` and `\g<name>` back references into `${1}` / `${name}`.
fn replacement_template(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(digit) if digit.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(digit) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(digit);
                        chars.next();
                    }
                    out.push_str(&format!("${{{group}}}"));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|ch| *ch != '>').collect();
                        out.push_str(&format!("${{{name}}}"));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

fn regex_sub(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let regex = compile(call, call.str(0)?)?;
    let template = replacement_template(call.str(1)?);
    Ok(Value::String(
        regex.replace_all(call.str(2)?, template.as_str()).into_owned(),
    ))
}

/// Compiles every pattern, requiring them all to have the same number of
/// capture groups.
fn compile_many(call: &Call<'_>) -> Result<(Vec<Regex>, usize), ScriptError> {
    let mut regexes = Vec::new();
    for pattern in call.array(1)? {
        let Value::String(pattern) = pattern else {
            return Err(call.error("every regex must be a String"));
        };
        regexes.push(compile(call, pattern)?);
    }
    let groups = regexes.first().map_or(0, |regex| regex.captures_len() - 1);
    if regexes.iter().any(|regex| regex.captures_len() - 1 != groups) {
        return Err(call.error("every regex must have the same number of capture groups"));
    }
    Ok((regexes, groups))
}

fn first_capture(call: &Call<'_>) -> Result<(Option<Value>, usize), ScriptError> {
    let (regexes, groups) = compile_many(call)?;
    let input = call.str(0)?;
    let found = regexes
        .iter()
        .find_map(|regex| regex.captures(input))
        .map(|captures| captures_to_array(&captures));
    Ok((found, groups))
}

fn regex_capture_many(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let (found, _) = first_capture(call)?;
    Ok(found.unwrap_or_else(|| Value::Array(Vec::new())))
}

fn regex_capture_many_with_defaults(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let (found, groups) = first_capture(call)?;
    let defaults = call.array(2)?;
    if defaults.len() != groups {
        return Err(call.error(format!(
            "number of defaults ({}) must match the number of capture groups ({groups})",
            defaults.len()
        )));
    }
    Ok(found.unwrap_or_else(|| {
        let mut out = vec![Value::from(call.str(0).unwrap_or_default())];
        out.extend(defaults.iter().cloned());
        Value::Array(out)
    }))
}

fn regex_capture_many_required(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let (found, _) = first_capture(call)?;
    found.ok_or_else(|| ScriptError::UserThrown {
        message: call.str(2).unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::replacement_template;
    use crate::script::functions::testing::{eval, eval_err};
    use crate::script::types::Value;

    #[test]
    fn fullmatch_needs_the_whole_string() {
        assert_eq!(eval("{%regex_fullmatch('a+', 'aaa')}"), Value::Array(vec![Value::from("aaa")]));
        assert_eq!(eval("{%regex_fullmatch('a+', 'aab')}"), Value::Array(Vec::new()));
        assert_eq!(eval("{%regex_fullmatch('a|ab', 'ab')}"), Value::Array(vec![Value::from("ab")]));
        assert_eq!(eval("{%regex_match('a+', 'aab')}"), Value::Array(vec![Value::from("aa")]));
        assert_eq!(eval("{%regex_match('b', 'ab')}"), Value::Array(Vec::new()));
        assert_eq!(eval("{%regex_search('b', 'ab')}"), Value::Array(vec![Value::from("b")]));
        assert!(eval_err("{%regex_search('(', 'x')}").contains("invalid regex"));
    }

    #[test]
    fn back_references_become_named_groups() {
        assert_eq!(replacement_template(r"\1-\2"), "${1}-${2}");
        assert_eq!(replacement_template(r"\g<show> $5"), "${show} $$5");
    }
}
