use super::{Call, FunctionSpec, Output, arg, lambda, opt};
use crate::script::error::ScriptError;
use crate::script::types::{ScriptMap, TypeSet, Value};

const ANY: TypeSet = TypeSet::ANY;
const MAP: TypeSet = TypeSet::MAP;

pub(super) static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec::new("map", &[arg("maybe_map", ANY)], Output::Fixed(MAP), map),
    FunctionSpec::new(
        "map_get",
        &[arg("map", MAP), arg("key", TypeSet::HASHABLE), opt("default", ANY)],
        Output::Fixed(ANY),
        map_get,
    ),
    FunctionSpec::new(
        "map_contains",
        &[arg("map", MAP), arg("key", TypeSet::HASHABLE)],
        Output::Fixed(TypeSet::BOOLEAN),
        map_contains,
    ),
    FunctionSpec::new(
        "map_apply",
        &[arg("map", MAP), lambda("lambda", 2)],
        Output::Fixed(TypeSet::ARRAY),
        map_apply,
    ),
    FunctionSpec::new(
        "map_enumerate",
        &[arg("map", MAP), lambda("lambda", 3)],
        Output::Fixed(TypeSet::ARRAY),
        map_enumerate,
    ),
    FunctionSpec::new("map_size", &[arg("map", MAP)], Output::Fixed(TypeSet::INTEGER), map_size),
    FunctionSpec::new("map_extend", &[arg("maps", MAP)], Output::Fixed(MAP), map_extend)
        .variadic(arg("maps", MAP)),
];

fn map(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    match call.value(0)? {
        Value::Map(map) => Ok(Value::Map(map.clone())),
        other => Err(call.error(format!("expected a Map, received {}", other.type_name()))),
    }
}

fn map_get(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let key = call.value(1)?;
    match call.map(0)?.get(key) {
        Some(value) => Ok(value.clone()),
        None => match call.get(2) {
            Some(default) => Ok(default.clone()),
            None => Err(ScriptError::KeyDoesNotExist {
                key: key.to_display_string(),
            }),
        },
    }
}

fn map_contains(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Boolean(call.map(0)?.contains_key(call.value(1)?)))
}

fn pairs(call: &Call<'_>) -> Result<Vec<(Value, Value)>, ScriptError> {
    Ok(call
        .map(0)?
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect())
}

fn map_apply(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let pairs = pairs(call)?;
    let function = call.lambda(1)?;
    let mut out = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        out.push(call.apply(&function, vec![key, value])?);
    }
    Ok(Value::Array(out))
}

fn map_enumerate(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let pairs = pairs(call)?;
    let function = call.lambda(1)?;
    let mut out = Vec::with_capacity(pairs.len());
    for (index, (key, value)) in pairs.into_iter().enumerate() {
        out.push(call.apply(&function, vec![Value::Integer(index as i64), key, value])?);
    }
    Ok(Value::Array(out))
}

fn map_size(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    Ok(Value::Integer(call.map(0)?.len() as i64))
}

/// Later maps win on key collisions.
fn map_extend(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let mut out = ScriptMap::new();
    for index in 0..call.len() {
        for (key, value) in call.map(index)?.iter() {
            out.insert(key.clone(), value.clone())?;
        }
    }
    Ok(Value::Map(out))
}

#[cfg(test)]
mod tests {
    use crate::script::functions::testing::{eval, eval_err, eval_with};
    use crate::script::types::Value;

    fn strings(values: &[&str]) -> Value {
        Value::Array(values.iter().copied().map(Value::from).collect())
    }

    #[test]
    fn apply_visits_pairs_in_insertion_order() {
        let value = eval_with(
            &[("%pair", "{$0}={$1}")],
            "{%map_apply({'b': 2, 'a': 1}, %pair)}",
        );
        assert_eq!(value, strings(&["b=2", "a=1"]));
    }

    #[test]
    fn enumerate_passes_the_position_first() {
        let value = eval_with(
            &[("%row", "{$0}:{$1}={$2}")],
            "{%map_enumerate({'x': 'first', 'y': 'second'}, %row)}",
        );
        assert_eq!(value, strings(&["0:x=first", "1:y=second"]));
    }

    #[test]
    fn get_falls_back_to_default_or_fails() {
        assert_eq!(eval("{%map_get({'a': 1}, 'a')}"), Value::Integer(1));
        assert_eq!(eval("{%map_get({'a': 1}, 'b', 0)}"), Value::Integer(0));
        assert!(eval_err("{%map_get({'a': 1}, 'b')}").ends_with("does not exist: b"));
        assert_eq!(eval("{%map_contains({1: 'one'}, 1)}"), Value::Boolean(true));
    }

    #[test]
    fn extend_lets_later_maps_win() {
        assert_eq!(
            eval("{%map_get(%map_extend({'a': 1, 'b': 2}, {'a': 3}), 'a')}"),
            Value::Integer(3)
        );
        assert_eq!(eval("{%map_size(%map_extend({'a': 1}, {'b': 2}))}"), Value::Integer(2));
    }
}
