use std::cmp::Ordering;

use super::{Call, FunctionSpec, Output, arg};
use crate::script::error::ScriptError;
use crate::script::types::{TypeSet, Value};

const ANY: TypeSet = TypeSet::ANY;
const BOOLEAN: TypeSet = TypeSet::BOOLEAN;

pub(super) static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec::new("bool", &[arg("value", ANY)], Output::Fixed(BOOLEAN), to_bool),
    FunctionSpec::new("eq", &[arg("left", ANY), arg("right", ANY)], Output::Fixed(BOOLEAN), eq),
    FunctionSpec::new("ne", &[arg("left", ANY), arg("right", ANY)], Output::Fixed(BOOLEAN), ne),
    FunctionSpec::new("lt", &[arg("left", ANY), arg("right", ANY)], Output::Fixed(BOOLEAN), lt),
    FunctionSpec::new("lte", &[arg("left", ANY), arg("right", ANY)], Output::Fixed(BOOLEAN), lte),
    FunctionSpec::new("gt", &[arg("left", ANY), arg("right", ANY)], Output::Fixed(BOOLEAN), gt),
    FunctionSpec::new("gte", &[arg("left", ANY), arg("right", ANY)], Output::Fixed(BOOLEAN), gte),
    FunctionSpec::new("and", &[arg("value", ANY)], Output::Fixed(BOOLEAN), and)
        .variadic(arg("value", ANY)),
    FunctionSpec::new("or", &[arg("value", ANY)], Output::Fixed(BOOLEAN), or)
        .variadic(arg("value", ANY)),
    FunctionSpec::new("xor", &[arg("value", ANY)], Output::Fixed(BOOLEAN), xor)
        .variadic(arg("value", ANY)),
    FunctionSpec::new("not", &[arg("value", ANY)], Output::Fixed(BOOLEAN), not),
    // Direct calls of the conditionals are evaluated lazily by the evaluator;
    // these bodies only run when they are applied as lambdas.
    FunctionSpec::new(
        "if",
        &[arg("condition", BOOLEAN), arg("true", ANY), arg("false", ANY)],
        Output::UnionOf(&[1, 2]),
        if_,
    ),
    FunctionSpec::new(
        "elif",
        &[arg("condition", BOOLEAN), arg("value", ANY)],
        Output::Conditional,
        elif,
    ),
];

fn to_bool(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(call.value(0)?.is_truthy()))
}

fn eq(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(call.value(0)?.loose_eq(call.value(1)?)))
}

fn ne(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(!call.value(0)?.loose_eq(call.value(1)?)))
}

fn compare(call: &Call<'_>) -> Result<Ordering, ScriptError> {
    let left = call.value(0)?;
    let right = call.value(1)?;
    left.compare(right).ok_or_else(|| {
        call.error(format!(
            "cannot compare {} with {}",
            left.type_name(),
            right.type_name()
        ))
    })
}

fn lt(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(compare(call)?.is_lt()))
}

fn lte(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(compare(call)?.is_le()))
}

fn gt(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(compare(call)?.is_gt()))
}

fn gte(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(compare(call)?.is_ge()))
}

fn and(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(call.values_from(0).all(Value::is_truthy)))
}

fn or(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(call.values_from(0).any(Value::is_truthy)))
}

/// True when an odd number of arguments are truthy.
fn xor(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let truthy = call.values_from(0).filter(|value| value.is_truthy()).count();
    Ok(Value::Boolean(truthy % 2 == 1))
}

fn not(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(!call.value(0)?.is_truthy()))
}

fn if_(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let index = if call.boolean(0)? { 1 } else { 2 };
    Ok(call.value(index)?.clone())
}

fn elif(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let last = call.len() - 1;
    let mut index = 0;
    while index < last {
        if call.boolean(index)? {
            return Ok(call.value(index + 1)?.clone());
        }
        index += 2;
    }
    Ok(call.value(last)?.clone())
}

#[cfg(test)]
mod tests {
    use crate::script::functions::testing::{eval, eval_err};
    use crate::script::types::Value;

    #[test]
    fn xor_is_true_for_an_odd_count_of_truthy_values() {
        assert_eq!(eval("{%xor(True, False)}"), Value::Boolean(true));
        assert_eq!(eval("{%xor(True, 1)}"), Value::Boolean(false));
        assert_eq!(eval("{%xor(True, 'x', [1])}"), Value::Boolean(true));
        assert_eq!(eval("{%xor(False, '', [])}"), Value::Boolean(false));
    }

    #[test]
    fn and_or_not_use_truthiness() {
        assert_eq!(eval("{%and(1, 'x', [0])}"), Value::Boolean(true));
        assert_eq!(eval("{%and(1, '')}"), Value::Boolean(false));
        assert_eq!(eval("{%or(0, '', 'x')}"), Value::Boolean(true));
        assert_eq!(eval("{%not([])}"), Value::Boolean(true));
    }

    #[test]
    fn comparisons_mix_integers_and_floats() {
        assert_eq!(eval("{%eq(1, 1.0)}"), Value::Boolean(true));
        assert_eq!(eval("{%ne('a', 'b')}"), Value::Boolean(true));
        assert_eq!(eval("{%lt(1, 2.5)}"), Value::Boolean(true));
        assert_eq!(eval("{%gte('b', 'a')}"), Value::Boolean(true));
        assert_eq!(eval("{%lte([1, 2], [1, 2, 0])}"), Value::Boolean(true));
        assert!(eval_err("{%gt('a', 1)}").contains("cannot compare String with Integer"));
    }

    #[test]
    fn elif_takes_the_first_true_branch() {
        assert_eq!(eval("{%elif(False, 'a', True, 'b', 'c')}"), Value::from("b"));
        assert_eq!(eval("{%elif(False, 'a', False, 'b', 'c')}"), Value::from("c"));
    }
}
