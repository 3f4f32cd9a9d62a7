use tracing::info;

use super::{Call, FunctionSpec, Output, arg};
use crate::script::error::ScriptError;
use crate::script::types::{TypeSet, Value};

const ANY: TypeSet = TypeSet::ANY;

pub(super) static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec::new(
        "print",
        &[arg("message", ANY), arg("passthrough", ANY)],
        Output::UnionOf(&[1]),
        print,
    )
    .impure(),
    FunctionSpec::new(
        "print_if_true",
        &[arg("message", ANY), arg("passthrough", ANY)],
        Output::UnionOf(&[1]),
        print_if_true,
    )
    .impure(),
    FunctionSpec::new(
        "print_if_false",
        &[arg("message", ANY), arg("passthrough", ANY)],
        Output::UnionOf(&[1]),
        print_if_false,
    )
    .impure(),
];

fn emit(call: &Call<'_>, when: impl Fn(&Value) -> bool) -> Result<Value, ScriptError> {
    let passthrough = call.value(1)?;
    if when(passthrough) {
        info!("{}", call.value(0)?.to_display_string());
    }
    Ok(passthrough.clone())
}

fn print(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    emit(call, |_| true)
}

fn print_if_true(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    emit(call, Value::is_truthy)
}

fn print_if_false(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    emit(call, |value| !value.is_truthy())
}
