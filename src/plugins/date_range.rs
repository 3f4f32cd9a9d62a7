use chrono::{Days, Local, Months, NaiveDate};
use serde_json::{Map as JsonMap, Value as Json};
use serde_yaml::Value as Yaml;

use super::{Plugin, PluginContext, PluginOperation};
use crate::entries::{Entry, entry_variables};
use crate::error::Result;
use crate::script::Script;
use crate::validators::{
    Mode, OverridesStringFormatter, StrictDict, ValidationError, ValidationResult, Validator,
};

/// Parses `YYYYMMDD`, `YYYY-MM-DD` or a relative date such as
/// `today-2weeks`, relative to `today`.
pub fn parse_relative_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
    {
        return Some(date);
    }
    let (base, offset) = ["yesterday", "today", "now"]
        .iter()
        .find_map(|word| text.strip_prefix(word).map(|rest| (*word, rest)))?;
    let base = match base {
        "yesterday" => today.checked_sub_days(Days::new(1))?,
        _ => today,
    };
    if offset.is_empty() {
        return Some(base);
    }
    let (forward, offset) = match offset.split_at_checked(1)? {
        ("+", rest) => (true, rest),
        ("-", rest) => (false, rest),
        _ => return None,
    };
    let digits = offset.find(|ch: char| !ch.is_ascii_digit())?;
    let amount: u32 = offset[..digits].parse().ok()?;
    let unit = &offset[digits..];
    let unit = unit.strip_suffix('s').unwrap_or(unit);
    match unit {
        "day" | "week" => {
            let days = Days::new(u64::from(amount) * if unit == "week" { 7 } else { 1 });
            if forward {
                base.checked_add_days(days)
            } else {
                base.checked_sub_days(days)
            }
        }
        "month" | "year" => {
            let months = Months::new(amount * if unit == "year" { 12 } else { 1 });
            if forward {
                base.checked_add_months(months)
            } else {
                base.checked_sub_months(months)
            }
        }
        _ => None,
    }
}

pub(crate) fn resolve_date(
    formatter: &OverridesStringFormatter,
    script: &Script,
) -> Result<NaiveDate> {
    let text = formatter.resolve(script)?;
    parse_relative_date(&text, Local::now().date_naive()).ok_or_else(|| {
        ValidationError::new(
            formatter.formatter().name(),
            format!("'{text}' is not a date. Use YYYYMMDD or a relative date like today-2weeks"),
        )
        .into()
    })
}

/// Only keeps entries whose date falls within `[after, before]`.
#[derive(Debug)]
pub struct DateRangePlugin {
    before: Option<OverridesStringFormatter>,
    after: Option<OverridesStringFormatter>,
    date_type: String,
    breaks: bool,
}

impl Validator for DateRangePlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let dict = StrictDict::new(mode, name, value, &[], &["before", "after", "type", "breaks"])?;
        Ok(DateRangePlugin {
            before: dict.optional("before")?,
            after: dict.optional("after")?,
            date_type: dict.select("type", &["upload_date", "release_date"], "upload_date")?,
            breaks: dict.optional_or("breaks", true)?,
        })
    }
}

impl DateRangePlugin {
    fn bounds(&self, script: &Script) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let before = self.before.as_ref().map(|date| resolve_date(date, script)).transpose()?;
        let after = self.after.as_ref().map(|date| resolve_date(date, script)).transpose()?;
        Ok((before, after))
    }
}

impl Plugin for DateRangePlugin {
    fn name(&self) -> &'static str {
        "date_range"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::ModifyEntryMetadata]
    }

    fn overrides_formatters(&self) -> Vec<&OverridesStringFormatter> {
        self.before.iter().chain(self.after.iter()).collect()
    }

    fn ytdl_options(&self, script: &Script) -> Result<JsonMap<String, Json>> {
        let mut options = JsonMap::new();
        if self.date_type != "upload_date" {
            return Ok(options);
        }
        let (before, after) = self.bounds(script)?;
        if let Some(before) = before {
            options.insert("datebefore".into(), Json::String(before.format("%Y%m%d").to_string()));
        }
        if let Some(after) = after {
            options.insert("dateafter".into(), Json::String(after.format("%Y%m%d").to_string()));
            if self.breaks {
                options.insert("break_on_reject".into(), Json::Bool(true));
            }
        }
        Ok(options)
    }

    fn modify_entry_metadata(&self, entry: Entry, ctx: &PluginContext<'_>) -> Result<Option<Entry>> {
        let (before, after) = self.bounds(ctx.script)?;
        let variables = entry_variables(&entry);
        let date = variables
            .get(self.date_type.as_str())
            .and_then(|value| value.as_str())
            .and_then(|text| NaiveDate::parse_from_str(text, "%Y%m%d").ok());
        let Some(date) = date else {
            return Ok(Some(entry));
        };
        let in_range = before.is_none_or(|before| date <= before) && after.is_none_or(|after| date >= after);
        Ok(in_range.then_some(entry))
    }
}
