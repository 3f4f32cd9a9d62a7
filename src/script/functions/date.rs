use chrono::DateTime;
use chrono::format::{Item, StrftimeItems};

use super::{Call, FunctionSpec, Output, arg};
use crate::script::error::ScriptError;
use crate::script::types::{TypeSet, Value};

pub(super) static FUNCTIONS: &[FunctionSpec] = &[FunctionSpec::new(
    "datetime_strftime",
    &[arg("posix_timestamp", TypeSet::INTEGER), arg("date_format", TypeSet::STRING)],
    Output::Fixed(TypeSet::STRING),
    datetime_strftime,
)];

/// Formats a UTC POSIX timestamp.
fn datetime_strftime(call: &mut Call<'_>) -> Result<Value, ScriptError> {
    let timestamp = call.int(0)?;
    let format = call.str(1)?;
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(call.error(format!("invalid date format '{format}'")));
    }
    let datetime = DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| call.error(format!("timestamp {timestamp} is out of range")))?;
    Ok(Value::String(
        datetime.format_with_items(items.iter()).to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use crate::script::functions::testing::{eval, eval_err};
    use crate::script::types::Value;

    #[test]
    fn formats_utc_timestamps() {
        assert_eq!(eval("{%datetime_strftime(0, '%Y-%m-%d')}"), Value::from("1970-01-01"));
        assert_eq!(
            eval("{%datetime_strftime(1700000000, '%Y%m%d %H:%M')}"),
            Value::from("20231114 22:13")
        );
    }

    #[test]
    fn rejects_bad_formats_and_timestamps() {
        assert!(eval_err("{%datetime_strftime(0, '%Q')}").contains("invalid date format"));
        assert!(
            eval_err("{%datetime_strftime(9223372036854775807, '%Y')}").contains("out of range")
        );
    }
}
