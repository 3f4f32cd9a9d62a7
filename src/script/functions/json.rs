use super::{Call, FunctionSpec, Output, arg};
use crate::script::error::ScriptError;
use crate::script::types::{TypeSet, Value};

pub(super) static FUNCTIONS: &[FunctionSpec] = &[FunctionSpec::new(
    "from_json",
    &[arg("argument", TypeSet::STRING)],
    Output::Fixed(TypeSet::ANY),
    from_json,
)];

fn from_json(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let text = call.str(0)?;
    let parsed: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| call.error(format!("invalid JSON: {err}")))?;
    Ok(Value::from_json(&parsed))
}

#[cfg(test)]
mod tests {
    use crate::script::functions::testing::{eval, eval_err};
    use crate::script::types::Value;

    #[test]
    fn parses_into_script_values() {
        assert_eq!(
            eval(r#"{%map_get(%from_json('{"a": [1, 2.5, null, true]}'), 'a')}"#),
            Value::Array(vec![
                Value::Integer(1),
                Value::Float(2.5),
                Value::from(""),
                Value::Boolean(true),
            ])
        );
        assert_eq!(eval(r#"{%from_json('"text"')}"#), Value::from("text"));
    }

    #[test]
    fn invalid_json_is_a_runtime_error() {
        let message = eval_err("{%from_json('[1,')}");
        assert!(message.starts_with("Runtime error in %from_json: invalid JSON"), "{message}");
    }
}
