use super::{Call, FunctionSpec, Output, arg, opt};
use crate::script::error::ScriptError;
use crate::script::types::{TypeSet, Value};

const STRING: TypeSet = TypeSet::STRING;
const INTEGER: TypeSet = TypeSet::INTEGER;

pub(super) static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec::new("upper", &[arg("string", STRING)], Output::Fixed(STRING), upper),
    FunctionSpec::new("lower", &[arg("string", STRING)], Output::Fixed(STRING), lower),
    FunctionSpec::new("capitalize", &[arg("string", STRING)], Output::Fixed(STRING), capitalize),
    FunctionSpec::new("titlecase", &[arg("string", STRING)], Output::Fixed(STRING), titlecase),
    FunctionSpec::new("concat", &[arg("values", STRING)], Output::Fixed(STRING), concat)
        .variadic(arg("values", STRING)),
    FunctionSpec::new(
        "replace",
        &[
            arg("string", STRING),
            arg("old", STRING),
            arg("new", STRING),
            opt("count", INTEGER),
        ],
        Output::Fixed(STRING),
        replace,
    ),
    FunctionSpec::new(
        "pad",
        &[arg("string", STRING), arg("length", INTEGER), arg("char", STRING)],
        Output::Fixed(STRING),
        pad,
    ),
    FunctionSpec::new(
        "pad_zero",
        &[arg("numeric", TypeSet::NUMERIC), arg("length", INTEGER)],
        Output::Fixed(STRING),
        pad_zero,
    ),
    FunctionSpec::new("string", &[arg("value", TypeSet::ANY)], Output::Fixed(STRING), string),
    FunctionSpec::new(
        "contains",
        &[arg("string", STRING), arg("contains", STRING)],
        Output::Fixed(TypeSet::BOOLEAN),
        contains,
    ),
    FunctionSpec::new(
        "split",
        &[arg("string", STRING), arg("sep", STRING), opt("max_split", INTEGER)],
        Output::Fixed(TypeSet::ARRAY),
        split,
    ),
    FunctionSpec::new("strip", &[arg("string", STRING)], Output::Fixed(STRING), strip),
    FunctionSpec::new("sanitize", &[arg("string", STRING)], Output::Fixed(STRING), sanitize),
    FunctionSpec::new(
        "slice",
        &[arg("string", STRING), arg("start", INTEGER), opt("end", INTEGER)],
        Output::Fixed(STRING),
        slice,
    ),
];

fn upper(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::String(call.str(0)?.to_uppercase()))
}

fn lower(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::String(call.str(0)?.to_lowercase()))
}

fn capitalize(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let text = call.str(0)?;
    let mut chars = text.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    };
    Ok(Value::String(out))
}

/// Upper-cases the first letter of every alphabetic run.
fn titlecase(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let mut out = String::new();
    let mut previous_alpha = false;
    for ch in call.str(0)?.chars() {
        if ch.is_alphabetic() {
            if previous_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(ch);
            previous_alpha = false;
        }
    }
    Ok(Value::String(out))
}

fn concat(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let mut out = String::new();
    for index in 0..call.len() {
        out.push_str(call.str(index)?);
    }
    Ok(Value::String(out))
}

fn replace(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let text = call.str(0)?;
    let old = call.str(1)?;
    let new = call.str(2)?;
    let out = match call.get(3) {
        Some(_) => {
            let count = call.int(3)?;
            if count < 0 {
                text.replace(old, new)
            } else {
                text.replacen(old, new, count as usize)
            }
        }
        None => text.replace(old, new),
    };
    Ok(Value::String(out))
}

fn left_pad(text: &str, length: i64, fill: char) -> String {
    let current = text.chars().count();
    let target = usize::try_from(length).unwrap_or(0);
    if current >= target {
        return text.to_string();
    }
    let mut out: String = std::iter::repeat_n(fill, target - current).collect();
    out.push_str(text);
    out
}

fn pad(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let fill = call.str(2)?;
    let mut chars = fill.chars();
    let (Some(fill), None) = (chars.next(), chars.next()) else {
        return Err(call.error(format!("pad character must be a single character, got '{fill}'")));
    };
    Ok(Value::String(left_pad(call.str(0)?, call.int(1)?, fill)))
}

fn pad_zero(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let text = call.value(0)?.to_display_string();
    let length = call.int(1)?;
    Ok(Value::String(match text.strip_prefix('-') {
        Some(digits) => format!("-{}", left_pad(digits, length - 1, '0')),
        None => left_pad(&text, length, '0'),
    }))
}

fn string(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::String(call.value(0)?.to_display_string()))
}

fn contains(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(call.str(0)?.contains(call.str(1)?)))
}

fn split(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let text = call.str(0)?;
    let sep = call.str(1)?;
    if sep.is_empty() {
        return Err(call.error("separator must not be empty"));
    }
    let parts: Vec<Value> = match call.get(2) {
        Some(_) if call.int(2)? >= 0 => text
            .splitn(call.int(2)? as usize + 1, sep)
            .map(Value::from)
            .collect(),
        _ => text.split(sep).map(Value::from).collect(),
    };
    Ok(Value::Array(parts))
}

fn strip(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::String(call.str(0)?.trim().to_string()))
}

fn sanitize(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::String(crate::entries::sanitize_filename(call.str(0)?)))
}

/// Resolves python-style slice bounds (negative counts from the end) to
/// clamped indices.
pub(super) fn slice_bounds(len: usize, start: i64, end: Option<i64>) -> (usize, usize) {
    let resolve = |index: i64| -> usize {
        if index < 0 {
            len.saturating_sub(index.unsigned_abs() as usize)
        } else {
            (index as usize).min(len)
        }
    };
    let start = resolve(start);
    let end = end.map_or(len, resolve);
    (start, end.max(start))
}

fn slice(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let chars: Vec<char> = call.str(0)?.chars().collect();
    let end = match call.get(2) {
        Some(_) => Some(call.int(2)?),
        None => None,
    };
    let (start, end) = slice_bounds(chars.len(), call.int(1)?, end);
    Ok(Value::String(chars[start..end].iter().collect()))
}

#[cfg(test)]
mod tests {
    use crate::script::functions::testing::{eval, eval_err};
    use crate::script::types::Value;

    #[test]
    fn replace_honours_the_count() {
        assert_eq!(eval("{%replace('a-a-a', '-', '+', 1)}"), Value::from("a+a-a"));
        assert_eq!(eval("{%replace('a-a-a', '-', '+', -1)}"), Value::from("a+a+a"));
        assert_eq!(eval("{%replace('a-a-a', '-', '')}"), Value::from("aaa"));
    }

    #[test]
    fn pad_zero_keeps_the_sign_in_front() {
        assert_eq!(eval("{%pad_zero(-7, 4)}"), Value::from("-007"));
        assert_eq!(eval("{%pad_zero(1234, 2)}"), Value::from("1234"));
        assert!(eval_err("{%pad('x', 3, 'ab')}").contains("single character"));
    }

    #[test]
    fn split_and_join_helpers() {
        assert_eq!(
            eval("{%split('a b c', ' ', -1)}"),
            Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
        assert!(eval_err("{%split('abc', '')}").contains("separator must not be empty"));
        assert_eq!(eval("{%concat('a', 'b', 'c')}"), Value::from("abc"));
        assert_eq!(eval("{%strip('  x ')}"), Value::from("x"));
        assert_eq!(eval("{%contains('season 2', 'son')}"), Value::Boolean(true));
        assert_eq!(eval("{%lower('MiXeD')}"), Value::from("mixed"));
        assert_eq!(eval("{%string(2.5)}"), Value::from("2.5"));
    }
}
