use super::{Call, FunctionSpec, Output, arg, opt};
use crate::script::error::ScriptError;
use crate::script::types::{TypeSet, Value};

const NUMERIC: TypeSet = TypeSet::NUMERIC;

pub(super) static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec::new(
        "add",
        &[arg("value", NUMERIC), arg("value", NUMERIC)],
        Output::Arithmetic,
        add,
    )
    .variadic(arg("value", NUMERIC)),
    FunctionSpec::new(
        "sub",
        &[arg("value", NUMERIC), arg("subtract", NUMERIC)],
        Output::Arithmetic,
        sub,
    ),
    FunctionSpec::new(
        "mul",
        &[arg("value", NUMERIC), arg("value", NUMERIC)],
        Output::Arithmetic,
        mul,
    )
    .variadic(arg("value", NUMERIC)),
    FunctionSpec::new(
        "div",
        &[arg("numerator", NUMERIC), arg("denominator", NUMERIC)],
        Output::Fixed(NUMERIC),
        div,
    ),
    FunctionSpec::new(
        "mod",
        &[arg("value", NUMERIC), arg("modulus", NUMERIC)],
        Output::Arithmetic,
        modulo,
    ),
    FunctionSpec::new(
        "pow",
        &[arg("base", NUMERIC), arg("exponent", NUMERIC)],
        Output::Fixed(NUMERIC),
        pow,
    ),
    FunctionSpec::new("max", &[arg("value", NUMERIC)], Output::Arithmetic, max)
        .variadic(arg("value", NUMERIC)),
    FunctionSpec::new("min", &[arg("value", NUMERIC)], Output::Arithmetic, min)
        .variadic(arg("value", NUMERIC)),
    FunctionSpec::new(
        "int",
        &[arg("value", TypeSet::HASHABLE)],
        Output::Fixed(TypeSet::INTEGER),
        int,
    ),
    FunctionSpec::new(
        "float",
        &[arg("value", TypeSet::HASHABLE)],
        Output::Fixed(TypeSet::FLOAT),
        float,
    ),
    FunctionSpec::new(
        "range",
        &[
            arg("end", TypeSet::INTEGER),
            opt("start", TypeSet::INTEGER),
            opt("step", TypeSet::INTEGER),
        ],
        Output::Fixed(TypeSet::ARRAY),
        range,
    ),
];

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(call: &Call<'_>, index: usize) -> Result<Number, ScriptError> {
        match call.value(index)? {
            Value::Integer(value) => Ok(Number::Int(*value)),
            Value::Float(value) => Ok(Number::Float(*value)),
            other => Err(call.error(format!("expected a number, received {}", other.type_name()))),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(value) => value as f64,
            Number::Float(value) => value,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Number::Int(value) => Value::Integer(value),
            Number::Float(value) => Value::Float(value),
        }
    }
}

fn numbers(call: &Call<'_>) -> Result<Vec<Number>, ScriptError> {
    (0..call.len()).map(|index| Number::of(call, index)).collect()
}

fn fold(
    call: &Call<'_>,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, ScriptError> {
    let values = numbers(call)?;
    let mut acc = values[0];
    for value in &values[1..] {
        acc = match (acc, *value) {
            (Number::Int(left), Number::Int(right)) => Number::Int(
                int_op(left, right).ok_or_else(|| call.error("integer overflow"))?,
            ),
            (left, right) => Number::Float(float_op(left.as_f64(), right.as_f64())),
        };
    }
    Ok(acc.into_value())
}

fn add(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    fold(call, i64::checked_add, |a, b| a + b)
}

fn sub(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    fold(call, i64::checked_sub, |a, b| a - b)
}

fn mul(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    fold(call, i64::checked_mul, |a, b| a * b)
}

fn div(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let numerator = Number::of(call, 0)?;
    let denominator = Number::of(call, 1)?;
    if denominator.as_f64() == 0.0 {
        return Err(call.error("division by zero"));
    }
    match (numerator, denominator) {
        (Number::Int(left), Number::Int(right)) => {
            let overflow = || call.error("integer overflow");
            if left.checked_rem(right).ok_or_else(overflow)? == 0 {
                left.checked_div(right).map(Value::Integer).ok_or_else(overflow)
            } else {
                Ok(Value::Float(left as f64 / right as f64))
            }
        }
        (left, right) => Ok(Value::Float(left.as_f64() / right.as_f64())),
    }
}

fn modulo(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let value = Number::of(call, 0)?;
    let modulus = Number::of(call, 1)?;
    if modulus.as_f64() == 0.0 {
        return Err(call.error("modulo by zero"));
    }
    // The result takes the sign of the modulus.
    Ok(match (value, modulus) {
        (Number::Int(left), Number::Int(right)) => {
            let rem = left
                .checked_rem(right)
                .ok_or_else(|| call.error("integer overflow"))?;
            // Opposite signs cannot overflow when added.
            if rem != 0 && (rem < 0) != (right < 0) {
                Value::Integer(rem + right)
            } else {
                Value::Integer(rem)
            }
        }
        (left, right) => {
            let (left, right) = (left.as_f64(), right.as_f64());
            Value::Float(left - right * (left / right).floor())
        }
    })
}

fn pow(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let base = Number::of(call, 0)?;
    let exponent = Number::of(call, 1)?;
    match (base, exponent) {
        (Number::Int(base), Number::Int(exponent)) if exponent >= 0 => {
            let exponent = u32::try_from(exponent).map_err(|_| call.error("exponent too large"))?;
            base.checked_pow(exponent)
                .map(Value::Integer)
                .ok_or_else(|| call.error("integer overflow"))
        }
        (base, exponent) => Ok(Value::Float(base.as_f64().powf(exponent.as_f64()))),
    }
}

fn extreme(call: &Call<'_>, pick_greater: bool) -> Result<Value, ScriptError> {
    let values = numbers(call)?;
    let mut best = values[0];
    for value in &values[1..] {
        let replace = if pick_greater {
            value.as_f64() > best.as_f64()
        } else {
            value.as_f64() < best.as_f64()
        };
        if replace {
            best = *value;
        }
    }
    Ok(best.into_value())
}

fn max(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    extreme(call, true)
}

fn min(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    extreme(call, false)
}

fn int(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    match call.value(0)? {
        Value::Integer(value) => Ok(Value::Integer(*value)),
        Value::Float(value) => Ok(Value::Integer(value.trunc() as i64)),
        Value::Boolean(value) => Ok(Value::Integer(i64::from(*value))),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| call.error(format!("cannot convert '{text}' to an integer"))),
        other => Err(call.error(format!("cannot convert {} to an integer", other.type_name()))),
    }
}

fn float(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    match call.value(0)? {
        Value::Integer(value) => Ok(Value::Float(*value as f64)),
        Value::Float(value) => Ok(Value::Float(*value)),
        Value::Boolean(value) => Ok(Value::Float(if *value { 1.0 } else { 0.0 })),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| call.error(format!("cannot convert '{text}' to a float"))),
        other => Err(call.error(format!("cannot convert {} to a float", other.type_name()))),
    }
}

fn range(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let end = call.int(0)?;
    let start = match call.get(1) {
        Some(_) => call.int(1)?,
        None => 0,
    };
    let step = match call.get(2) {
        Some(_) => call.int(2)?,
        None => 1,
    };
    if step == 0 {
        return Err(call.error("step must not be zero"));
    }
    let mut values = Vec::new();
    let mut current = start;
    while (step > 0 && current < end) || (step < 0 && current > end) {
        values.push(Value::Integer(current));
        // Past i64 bounds is past `end` as well.
        let Some(next) = current.checked_add(step) else {
            break;
        };
        current = next;
    }
    Ok(Value::Array(values))
}

#[cfg(test)]
mod tests {
    use crate::script::functions::testing::{eval, eval_err};
    use crate::script::types::Value;

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(eval("{%add(1, 2, 3)}"), Value::Integer(6));
        assert_eq!(eval("{%sub(1, 2.5)}"), Value::Float(-1.5));
        assert_eq!(eval("{%mul(2, 3, 4)}"), Value::Integer(24));
        assert_eq!(eval("{%div(9, 3)}"), Value::Integer(3));
        assert_eq!(eval("{%div(7, 2)}"), Value::Float(3.5));
        assert_eq!(eval("{%pow(2, 10)}"), Value::Integer(1024));
        assert_eq!(eval("{%max(1, 7.5, 3)}"), Value::Float(7.5));
        assert_eq!(eval("{%min(4, 2, 9)}"), Value::Integer(2));
    }

    #[test]
    fn modulo_takes_the_sign_of_the_modulus() {
        assert_eq!(eval("{%mod(7, 3)}"), Value::Integer(1));
        assert_eq!(eval("{%mod(-7, 3)}"), Value::Integer(2));
        assert_eq!(eval("{%mod(7, -3)}"), Value::Integer(-2));
        assert_eq!(eval("{%mod(-6, 3)}"), Value::Integer(0));
        assert_eq!(eval("{%mod(-7.5, 2)}"), Value::Float(0.5));
    }

    #[test]
    fn overflow_and_zero_are_errors() {
        assert!(eval_err("{%div(-9223372036854775808, -1)}").contains("integer overflow"));
        assert!(eval_err("{%mod(-9223372036854775808, -1)}").contains("integer overflow"));
        assert!(eval_err("{%add(9223372036854775807, 1)}").contains("integer overflow"));
        assert!(eval_err("{%pow(10, 30)}").contains("integer overflow"));
        assert!(eval_err("{%div(1, 0)}").contains("division by zero"));
        assert!(eval_err("{%mod(1, 0)}").contains("modulo by zero"));
    }

    #[test]
    fn conversions() {
        assert_eq!(eval("{%int('42')}"), Value::Integer(42));
        assert_eq!(eval("{%int(3.9)}"), Value::Integer(3));
        assert_eq!(eval("{%float(2)}"), Value::Float(2.0));
        assert!(eval_err("{%int('x')}").contains("cannot convert 'x'"));
    }

    #[test]
    fn ranges_stop_at_the_end_or_the_integer_limit() {
        let ints = |values: &[i64]| Value::Array(values.iter().copied().map(Value::Integer).collect());
        assert_eq!(eval("{%range(3)}"), ints(&[0, 1, 2]));
        assert_eq!(eval("{%range(0, 6, -2)}"), ints(&[6, 4, 2]));
        assert_eq!(
            eval("{%range(9223372036854775807, 9223372036854775806, 5)}"),
            ints(&[9223372036854775806])
        );
        assert!(eval_err("{%range(3, 0, 0)}").contains("step must not be zero"));
    }
}
