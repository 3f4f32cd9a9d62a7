use super::string::slice_bounds;
use super::{Call, FunctionSpec, Output, arg, lambda, opt};
use crate::script::error::ScriptError;
use crate::script::types::{TypeSet, Value};

const ANY: TypeSet = TypeSet::ANY;
const ARRAY: TypeSet = TypeSet::ARRAY;
const INTEGER: TypeSet = TypeSet::INTEGER;

pub(super) static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec::new("array", &[arg("maybe_array", ANY)], Output::Fixed(ARRAY), array),
    FunctionSpec::new(
        "array_at",
        &[arg("array", ARRAY), arg("index", INTEGER), opt("default", ANY)],
        Output::Fixed(ANY),
        array_at,
    ),
    FunctionSpec::new("array_size", &[arg("array", ARRAY)], Output::Fixed(INTEGER), array_size),
    FunctionSpec::new("array_extend", &[arg("arrays", ARRAY)], Output::Fixed(ARRAY), array_extend)
        .variadic(arg("arrays", ARRAY)),
    FunctionSpec::new("array_flatten", &[arg("array", ARRAY)], Output::Fixed(ARRAY), array_flatten),
    FunctionSpec::new(
        "array_contains",
        &[arg("array", ARRAY), arg("value", ANY)],
        Output::Fixed(TypeSet::BOOLEAN),
        array_contains,
    ),
    FunctionSpec::new(
        "array_index",
        &[arg("array", ARRAY), arg("value", ANY)],
        Output::Fixed(INTEGER),
        array_index,
    ),
    FunctionSpec::new(
        "array_slice",
        &[arg("array", ARRAY), arg("start", INTEGER), opt("end", INTEGER)],
        Output::Fixed(ARRAY),
        array_slice,
    ),
    FunctionSpec::new("array_reverse", &[arg("array", ARRAY)], Output::Fixed(ARRAY), array_reverse),
    FunctionSpec::new("array_product", &[arg("arrays", ARRAY)], Output::Fixed(ARRAY), array_product)
        .variadic(arg("arrays", ARRAY)),
    FunctionSpec::new(
        "array_apply",
        &[arg("array", ARRAY), lambda("lambda", 1)],
        Output::Fixed(ARRAY),
        array_apply,
    ),
    FunctionSpec::new(
        "array_enumerate",
        &[arg("array", ARRAY), lambda("lambda", 2)],
        Output::Fixed(ARRAY),
        array_enumerate,
    ),
    FunctionSpec::new(
        "array_reduce",
        &[arg("array", ARRAY), lambda("lambda", 2)],
        Output::Fixed(ANY),
        array_reduce,
    ),
    FunctionSpec::new(
        "array_overlay",
        &[arg("array", ARRAY), arg("overlap", ARRAY), opt("only_missing", TypeSet::BOOLEAN)],
        Output::Fixed(ARRAY),
        array_overlay,
    ),
];

fn array(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    match call.value(0)? {
        Value::Array(values) => Ok(Value::Array(values.clone())),
        other => Err(call.error(format!("expected an Array, received {}", other.type_name()))),
    }
}

fn array_at(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let values = call.array(0)?;
    let index = call.int(1)?;
    let resolved = if index < 0 {
        values.len().checked_sub(index.unsigned_abs() as usize)
    } else {
        Some(index as usize)
    };
    match resolved.and_then(|index| values.get(index)) {
        Some(value) => Ok(value.clone()),
        None => match call.get(2) {
            Some(default) => Ok(default.clone()),
            None => Err(ScriptError::KeyDoesNotExist {
                key: format!("index {index} of an array of size {}", values.len()),
            }),
        },
    }
}

fn array_size(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Integer(call.array(0)?.len() as i64))
}

fn array_extend(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let mut out = Vec::new();
    for index in 0..call.len() {
        out.extend(call.array(index)?.iter().cloned());
    }
    Ok(Value::Array(out))
}

fn flatten_into(values: &[Value], out: &mut Vec<Value>) {
    for value in values {
        match value {
            Value::Array(inner) => flatten_into(inner, out),
            other => out.push(other.clone()),
        }
    }
}

fn array_flatten(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let mut out = Vec::new();
    flatten_into(call.array(0)?, &mut out);
    Ok(Value::Array(out))
}

fn array_contains(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let needle = call.value(1)?;
    Ok(Value::Boolean(call.array(0)?.iter().any(|value| value.loose_eq(needle))))
}

fn array_index(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let needle = call.value(1)?;
    match call.array(0)?.iter().position(|value| value.loose_eq(needle)) {
        Some(index) => Ok(Value::Integer(index as i64)),
        None => Err(ScriptError::KeyDoesNotExist {
            key: needle.to_display_string(),
        }),
    }
}

fn array_slice(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let values = call.array(0)?;
    let end = match call.get(2) {
        Some(_) => Some(call.int(2)?),
        None => None,
    };
    let (start, end) = slice_bounds(values.len(), call.int(1)?, end);
    Ok(Value::Array(values[start..end].to_vec()))
}

fn array_reverse(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Array(call.array(0)?.iter().rev().cloned().collect()))
}

/// Cartesian product of every argument array.
fn array_product(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let mut combinations: Vec<Vec<Value>> = vec![Vec::new()];
    for index in 0..call.len() {
        let values = call.array(index)?;
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                values.iter().map(move |value| {
                    let mut next = prefix.clone();
                    next.push(value.clone());
                    next
                })
            })
            .collect();
    }
    Ok(Value::Array(combinations.into_iter().map(Value::Array).collect()))
}

fn array_apply(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let values = call.array(0)?.to_vec();
    let function = call.lambda(1)?;
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        out.push(call.apply(&function, vec![value])?);
    }
    Ok(Value::Array(out))
}

fn array_enumerate(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let values = call.array(0)?.to_vec();
    let function = call.lambda(1)?;
    let mut out = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        out.push(call.apply(&function, vec![Value::Integer(index as i64), value])?);
    }
    Ok(Value::Array(out))
}

fn array_reduce(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let values = call.array(0)?.to_vec();
    let function = call.lambda(1)?;
    let mut iter = values.into_iter();
    let Some(mut acc) = iter.next() else {
        return Err(call.error("cannot reduce an empty array"));
    };
    for value in iter {
        acc = call.apply(&function, vec![acc, value])?;
    }
    Ok(acc)
}

/// Lays `overlap` over `array` index by index. With `only_missing`, existing
/// positions are kept and only the tail beyond `array` is taken from `overlap`.
fn array_overlay(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let mut out = call.array(0)?.to_vec();
    let overlap = call.array(1)?;
    let only_missing = match call.get(2) {
        Some(_) => call.boolean(2)?,
        None => false,
    };
    for (index, value) in overlap.iter().enumerate() {
        if index < out.len() {
            if !only_missing {
                out[index] = value.clone();
            }
        } else {
            out.push(value.clone());
        }
    }
    Ok(Value::Array(out))
}

#[cfg(test)]
mod tests {
    use crate::script::functions::testing::{eval, eval_err};
    use crate::script::types::Value;

    fn ints(values: &[i64]) -> Value {
        Value::Array(values.iter().copied().map(Value::Integer).collect())
    }

    #[test]
    fn flatten_unnests_every_level() {
        assert_eq!(
            eval("{%array_flatten([1, [2, [3, 'x']], []])}"),
            Value::Array(vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3),
                Value::from("x"),
            ])
        );
    }

    #[test]
    fn product_varies_the_last_array_fastest() {
        let pair = |number: i64, letter: &str| {
            Value::Array(vec![Value::Integer(number), Value::from(letter)])
        };
        assert_eq!(
            eval("{%array_product([1, 2], ['a', 'b'])}"),
            Value::Array(vec![pair(1, "a"), pair(1, "b"), pair(2, "a"), pair(2, "b")])
        );
        assert_eq!(eval("{%array_product([1, 2], [])}"), Value::Array(Vec::new()));
    }

    #[test]
    fn reduce_folds_from_the_first_element() {
        assert_eq!(eval("{%array_reduce([1, 2, 3], %add)}"), Value::Integer(6));
        assert_eq!(eval("{%array_reduce(['only'], %concat)}"), Value::from("only"));
        assert!(eval_err("{%array_reduce([], %add)}").contains("cannot reduce an empty array"));
    }

    #[test]
    fn overlay_replaces_or_fills_missing() {
        assert_eq!(eval("{%array_overlay([1, 2], [9, 8, 7])}"), ints(&[9, 8, 7]));
        assert_eq!(eval("{%array_overlay([1, 2], [9, 8, 7], True)}"), ints(&[1, 2, 7]));
        assert_eq!(eval("{%array_overlay([1, 2, 3], [9], True)}"), ints(&[1, 2, 3]));
    }

    #[test]
    fn slice_counts_negative_bounds_from_the_end() {
        assert_eq!(eval("{%array_slice([1, 2, 3, 4, 5], -3)}"), ints(&[3, 4, 5]));
        assert_eq!(eval("{%array_slice([1, 2, 3, 4, 5], 1, -1)}"), ints(&[2, 3, 4]));
        assert_eq!(eval("{%array_slice([1, 2, 3], -10, 2)}"), ints(&[1, 2]));
        assert_eq!(eval("{%array_slice([1, 2, 3], 2, 1)}"), ints(&[]));
    }

    #[test]
    fn lookups_compare_numbers_loosely() {
        assert_eq!(eval("{%array_contains([1, 2], 2.0)}"), Value::Boolean(true));
        assert_eq!(eval("{%array_index(['a', 'b'], 'b')}"), Value::Integer(1));
        assert!(eval_err("{%array_index(['a'], 'z')}").ends_with("does not exist: z"));
        assert_eq!(eval("{%array_at([1, 2], 5, 'none')}"), Value::from("none"));
    }

    #[test]
    fn apply_and_enumerate_call_the_lambda_per_element() {
        assert_eq!(
            eval("{%array_apply(['a', 'b'], %upper)}"),
            Value::Array(vec![Value::from("A"), Value::from("B")])
        );
        assert_eq!(eval("{%array_enumerate([10, 20], %add)}"), ints(&[10, 21]));
    }
}
