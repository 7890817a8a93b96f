//! Side-effect-free native modules exposed to synthesized tools.
//!
//! Each module is reachable both as a static namespace (`datetime::today()`)
//! and through `import "datetime" as d;`. Nothing here touches the
//! filesystem, network, process or environment.

use chrono::{Datelike, Local, NaiveDate, Timelike, Utc};
use rand::Rng;
use rhai::{Array, Dynamic, EvalAltResult, ImmutableString, Map, Module, FLOAT, INT};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::warn;

type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// Every module this runtime knows how to build.
pub const BUILTIN_MODULES: &[&str] = &[
    "datetime", "time", "calendar", "math", "json", "random", "string",
];

/// Build the requested subset of the built-in modules.
///
/// Unknown names are skipped with a warning.
pub fn build(allowed: &[String]) -> BTreeMap<String, Arc<Module>> {
    let mut out = BTreeMap::new();
    for name in allowed {
        let module = match name.as_str() {
            "datetime" => datetime_module(),
            "time" => time_module(),
            "calendar" => calendar_module(),
            "math" => math_module(),
            "json" => json_module(),
            "random" => random_module(),
            "string" => string_module(),
            other => {
                warn!("Ignoring unknown sandbox module '{}'", other);
                continue;
            }
        };
        out.insert(name.clone(), Arc::new(module));
    }
    out
}

// -- datetime ---------------------------------------------------------------

fn datetime_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("now", || -> FnResult<String> {
        Ok(Local::now().format("%Y-%m-%d %H:%M:%S").to_string())
    });
    m.set_native_fn("today", || -> FnResult<String> {
        Ok(Local::now().format("%Y-%m-%d").to_string())
    });
    m.set_native_fn("utc_now", || -> FnResult<String> {
        Ok(Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string())
    });
    m.set_native_fn("weekday", || -> FnResult<String> {
        Ok(Local::now().format("%A").to_string())
    });
    m.set_native_fn("timestamp", || -> FnResult<INT> { Ok(Utc::now().timestamp()) });
    m.set_native_fn("format", |pattern: ImmutableString| -> FnResult<String> {
        strftime(&pattern)
    });
    m
}

/// Format the local time, surfacing bad patterns as a script error.
fn strftime(pattern: &str) -> FnResult<String> {
    let mut out = String::new();
    write!(out, "{}", Local::now().format(pattern))
        .map_err(|_| format!("invalid time format: {}", pattern))?;
    Ok(out)
}

// -- time -------------------------------------------------------------------

fn time_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("unix", || -> FnResult<INT> { Ok(Utc::now().timestamp()) });
    m.set_native_fn("millis", || -> FnResult<INT> { Ok(Utc::now().timestamp_millis()) });
    m.set_native_fn("hour", || -> FnResult<INT> { Ok(Local::now().hour() as INT) });
    m.set_native_fn("minute", || -> FnResult<INT> { Ok(Local::now().minute() as INT) });
    m.set_native_fn("second", || -> FnResult<INT> { Ok(Local::now().second() as INT) });
    m.set_native_fn("clock", || -> FnResult<String> {
        Ok(Local::now().format("%H:%M:%S").to_string())
    });
    m
}

// -- calendar ---------------------------------------------------------------

const MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August",
    "September", "October", "November", "December",
];

fn calendar_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("is_leap_year", |year: INT| -> FnResult<bool> {
        Ok(is_leap_year(year))
    });
    m.set_native_fn("days_in_month", |year: INT, month: INT| -> FnResult<INT> {
        days_in_month(year, month)
    });
    m.set_native_fn("month_name", |month: INT| -> FnResult<String> {
        month_index(month).map(|i| MONTHS[i].to_string())
    });
    m.set_native_fn("weekday_of", |year: INT, month: INT, day: INT| -> FnResult<String> {
        let date = date(year, month, day)?;
        Ok(date.format("%A").to_string())
    });
    m.set_native_fn("day_of_year", |year: INT, month: INT, day: INT| -> FnResult<INT> {
        Ok(date(year, month, day)?.ordinal() as INT)
    });
    m.set_native_fn("current_year", || -> FnResult<INT> { Ok(Local::now().year() as INT) });
    m.set_native_fn("current_month", || -> FnResult<INT> { Ok(Local::now().month() as INT) });
    m
}

fn is_leap_year(year: INT) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn month_index(month: INT) -> FnResult<usize> {
    if (1..=12).contains(&month) {
        Ok((month - 1) as usize)
    } else {
        Err(format!("month out of range: {}", month).into())
    }
}

fn days_in_month(year: INT, month: INT) -> FnResult<INT> {
    Ok(match month_index(month)? + 1 {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    })
}

fn date(year: INT, month: INT, day: INT) -> FnResult<NaiveDate> {
    let year = i32::try_from(year).map_err(|_| format!("year out of range: {}", year))?;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .ok_or_else(|| format!("invalid date: {}-{}-{}", year, month, day).into())
}

// -- math -------------------------------------------------------------------

fn math_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("pi", || -> FnResult<FLOAT> { Ok(std::f64::consts::PI) });
    m.set_native_fn("e", || -> FnResult<FLOAT> { Ok(std::f64::consts::E) });
    m.set_native_fn("sqrt", |x: FLOAT| -> FnResult<FLOAT> {
        if x < 0.0 {
            return Err(format!("square root of negative number: {}", x).into());
        }
        Ok(x.sqrt())
    });
    m.set_native_fn("pow", |x: FLOAT, y: FLOAT| -> FnResult<FLOAT> { Ok(x.powf(y)) });
    m.set_native_fn("abs", |x: FLOAT| -> FnResult<FLOAT> { Ok(x.abs()) });
    m.set_native_fn("sin", |x: FLOAT| -> FnResult<FLOAT> { Ok(x.sin()) });
    m.set_native_fn("cos", |x: FLOAT| -> FnResult<FLOAT> { Ok(x.cos()) });
    m.set_native_fn("round_to", |x: FLOAT, places: INT| -> FnResult<FLOAT> {
        let factor = 10f64.powi(places.clamp(0, 15) as i32);
        Ok((x * factor).round() / factor)
    });
    m.set_native_fn("gcd", |a: INT, b: INT| -> FnResult<INT> { Ok(gcd(a, b)) });
    m.set_native_fn("factorial", |n: INT| -> FnResult<INT> { factorial(n) });
    m
}

fn gcd(a: INT, b: INT) -> INT {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a as INT
}

fn factorial(n: INT) -> FnResult<INT> {
    if n < 0 {
        return Err(format!("factorial of negative number: {}", n).into());
    }
    (1..=n).try_fold(1 as INT, |acc, k| acc.checked_mul(k))
        .ok_or_else(|| format!("factorial overflow: {}", n).into())
}

// -- json -------------------------------------------------------------------

fn json_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("stringify", |value: Dynamic| -> FnResult<String> {
        Ok(to_json(&value).to_string())
    });
    m.set_native_fn("parse", |text: ImmutableString| -> FnResult<Dynamic> {
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| format!("invalid JSON: {}", e))?;
        Ok(from_json(value))
    });
    m
}

fn to_json(value: &Dynamic) -> serde_json::Value {
    if value.is_unit() {
        return serde_json::Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return b.into();
    }
    if let Ok(i) = value.as_int() {
        return i.into();
    }
    if let Ok(f) = value.as_float() {
        return f.into();
    }
    if let Some(array) = value.clone().try_cast::<Array>() {
        return serde_json::Value::Array(array.iter().map(to_json).collect());
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        return serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_string(), to_json(v)))
                .collect(),
        );
    }
    serde_json::Value::String(value.to_string())
}

fn from_json(value: serde_json::Value) -> Dynamic {
    match value {
        serde_json::Value::Null => Dynamic::UNIT,
        serde_json::Value::Bool(b) => b.into(),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or(f64::NAN).into(),
        },
        serde_json::Value::String(s) => s.into(),
        serde_json::Value::Array(items) => {
            let array: Array = items.into_iter().map(from_json).collect();
            array.into()
        }
        serde_json::Value::Object(fields) => {
            let map: Map = fields
                .into_iter()
                .map(|(k, v)| (k.into(), from_json(v)))
                .collect();
            map.into()
        }
    }
}

// -- random -----------------------------------------------------------------

fn random_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("int", |low: INT, high: INT| -> FnResult<INT> {
        if low > high {
            return Err(format!("empty range: {}..={}", low, high).into());
        }
        Ok(rand::thread_rng().gen_range(low..=high))
    });
    m.set_native_fn("float", || -> FnResult<FLOAT> { Ok(rand::thread_rng().gen::<f64>()) });
    m.set_native_fn("bool", || -> FnResult<bool> { Ok(rand::thread_rng().gen::<bool>()) });
    m.set_native_fn("dice", |sides: INT| -> FnResult<INT> {
        if sides < 1 {
            return Err(format!("a die needs at least one side, got {}", sides).into());
        }
        Ok(rand::thread_rng().gen_range(1..=sides))
    });
    m
}

// -- string -----------------------------------------------------------------

fn string_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("upper", |s: ImmutableString| -> FnResult<String> { Ok(s.to_uppercase()) });
    m.set_native_fn("lower", |s: ImmutableString| -> FnResult<String> { Ok(s.to_lowercase()) });
    m.set_native_fn("reverse", |s: ImmutableString| -> FnResult<String> {
        Ok(s.chars().rev().collect())
    });
    m.set_native_fn("word_count", |s: ImmutableString| -> FnResult<INT> {
        Ok(s.split_whitespace().count() as INT)
    });
    m.set_native_fn("char_count", |s: ImmutableString| -> FnResult<INT> {
        Ok(s.chars().count() as INT)
    });
    m.set_native_fn("title", |s: ImmutableString| -> FnResult<String> {
        Ok(s.split_whitespace()
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" "))
    });
    m
}
