use super::{Call, FunctionSpec, Output, arg};
use crate::script::error::ScriptError;
use crate::script::types::{TypeSet, Value};

const ANY: TypeSet = TypeSet::ANY;
const STRING: TypeSet = TypeSet::STRING;

pub(super) static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec::new("throw", &[arg("error_message", STRING)], Output::Fixed(ANY), throw).impure(),
    FunctionSpec::new(
        "assert",
        &[arg("value", ANY), arg("assert_message", STRING)],
        Output::UnionOf(&[0]),
        assert,
    )
    .impure(),
    FunctionSpec::new(
        "assert_eq",
        &[arg("value", ANY), arg("equals", ANY), arg("assert_message", STRING)],
        Output::UnionOf(&[0]),
        assert_eq,
    )
    .impure(),
    FunctionSpec::new(
        "assert_ne",
        &[arg("value", ANY), arg("equals", ANY), arg("assert_message", STRING)],
        Output::UnionOf(&[0]),
        assert_ne,
    )
    .impure(),
    FunctionSpec::new(
        "assert_then",
        &[arg("value", ANY), arg("ret", ANY), arg("assert_message", STRING)],
        Output::UnionOf(&[1]),
        assert_then,
    )
    .impure(),
];

fn thrown(call: &Call<'_>, index: usize) -> ScriptError {
    ScriptError::UserThrown {
        message: call.str(index).unwrap_or_default().to_string(),
    }
}

fn throw(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Err(thrown(call, 0))
}

fn assert(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let value = call.value(0)?;
    if value.is_truthy() {
        Ok(value.clone())
    } else {
        Err(thrown(call, 1))
    }
}

fn assert_eq(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let value = call.value(0)?;
    if value.loose_eq(call.value(1)?) {
        Ok(value.clone())
    } else {
        Err(thrown(call, 2))
    }
}

fn assert_ne(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let value = call.value(0)?;
    if value.loose_eq(call.value(1)?) {
        Err(thrown(call, 2))
    } else {
        Ok(value.clone())
    }
}

fn assert_then(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    if call.value(0)?.is_truthy() {
        Ok(call.value(1)?.clone())
    } else {
        Err(thrown(call, 2))
    }
}

#[cfg(test)]
mod tests {
    use crate::script::functions::testing::{eval, eval_err};
    use crate::script::types::Value;

    #[test]
    fn assert_then_returns_the_second_value() {
        assert_eq!(eval("{%assert_then(True, 'ok', 'unused')}"), Value::from("ok"));
        assert_eq!(eval_err("{%assert_then([], 'ok', 'needs items')}"), "needs items");
    }

    #[test]
    fn equality_assertions_compare_loosely() {
        assert_eq!(eval("{%assert_eq(1, 1.0, 'unused')}"), Value::Integer(1));
        assert_eq!(eval_err("{%assert_eq(1, 2, 'one is not two')}"), "one is not two");
        assert_eq!(eval("{%assert_ne('a', 'b', 'unused')}"), Value::from("a"));
        assert_eq!(eval_err("{%assert_ne(2, 2.0, 'same')}"), "same");
    }

    #[test]
    fn assert_and_throw_raise_the_message() {
        assert_eq!(eval("{%assert('kept', 'unused')}"), Value::from("kept"));
        assert_eq!(eval_err("{%assert(0, 'zero')}"), "zero");
        assert_eq!(eval_err("{%throw('stop here')}"), "stop here");
    }
}
