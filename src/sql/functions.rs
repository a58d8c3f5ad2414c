//! Scalar, aggregate, and window function implementations (spec §4.9).

use std::io::{Read, Write};

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use sha2::Digest;

use crate::error::{Error, Result};
use crate::types::Value;

/// Parses a free-form timestamp string, trying RFC3339 first and falling
/// back to a handful of common SQL-ish formats.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let formats = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    for fmt in formats {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
    }
    None
}

fn arity_err(name: &str, expected: usize, got: usize) -> Error {
    Error::ty(format!("{name}() expects {expected} argument(s), got {got}"))
}

/// Scalar function dispatch. Returns `Value::Null` when any required
/// argument is NULL (standard SQL null-propagation), except where noted.
pub fn call_scalar(name: &str, args: &[Value]) -> Result<Value> {
    let upper = name.to_ascii_uppercase();

    // Functions that must see NULL arguments themselves.
    match upper.as_str() {
        "COALESCE" => {
            for a in args {
                if !a.is_null() {
                    return Ok(a.clone());
                }
            }
            return Ok(Value::Null);
        }
        "NULLIF" => {
            if args.len() != 2 {
                return Err(arity_err("NULLIF", 2, args.len()));
            }
            return Ok(if args[0].group_key_eq(&args[1]) { Value::Null } else { args[0].clone() });
        }
        "IFNULL" => {
            if args.len() != 2 {
                return Err(arity_err("IFNULL", 2, args.len()));
            }
            return Ok(if args[0].is_null() { args[1].clone() } else { args[0].clone() });
        }
        _ => {}
    }

    if args.iter().any(Value::is_null) && !matches!(upper.as_str(), "CONCAT" | "CONCAT_WS" | "NVL" | "IF" | "IIF") {
        return Ok(Value::Null);
    }

    match upper.as_str() {
        // ---- string functions ----
        "UPPER" | "UCASE" => Ok(Value::Text(text_arg(&upper, args, 0)?.to_ascii_uppercase())),
        "LOWER" | "LCASE" => Ok(Value::Text(text_arg(&upper, args, 0)?.to_ascii_lowercase())),
        "LENGTH" | "CHAR_LENGTH" => Ok(Value::Integer(text_arg(&upper, args, 0)?.chars().count() as i64)),
        "TRIM" => Ok(Value::Text(text_arg(&upper, args, 0)?.trim().to_string())),
        "LTRIM" => Ok(Value::Text(text_arg(&upper, args, 0)?.trim_start().to_string())),
        "RTRIM" => Ok(Value::Text(text_arg(&upper, args, 0)?.trim_end().to_string())),
        "CONCAT" => Ok(Value::Text(args.iter().map(Value::display_text).collect())),
        "CONCAT_WS" => {
            if args.is_empty() || args[0].is_null() {
                return Ok(Value::Null);
            }
            let sep = args[0].display_text();
            let parts: Vec<String> = args[1..].iter().filter(|v| !v.is_null()).map(Value::display_text).collect();
            Ok(Value::Text(parts.join(&sep)))
        }
        "SUBSTRING" | "SUBSTR" => {
            let s = text_arg(&upper, args, 0)?;
            let chars: Vec<char> = s.chars().collect();
            let start = int_arg(&upper, args, 1)?.max(1) as usize - 1;
            let len = args.get(2).and_then(Value::as_i64).map(|n| n.max(0) as usize).unwrap_or(chars.len());
            let end = (start + len).min(chars.len());
            if start >= chars.len() {
                Ok(Value::Text(String::new()))
            } else {
                Ok(Value::Text(chars[start..end].iter().collect()))
            }
        }
        "REPLACE" => {
            let s = text_arg(&upper, args, 0)?;
            let from = text_arg(&upper, args, 1)?;
            let to = text_arg(&upper, args, 2)?;
            Ok(Value::Text(s.replace(&from, &to)))
        }
        "SPLIT" => {
            let s = text_arg(&upper, args, 0)?;
            let sep = text_arg(&upper, args, 1)?;
            Ok(Value::Array(s.split(&sep).map(|p| Value::Text(p.to_string())).collect()))
        }
        "REVERSE" => Ok(Value::Text(text_arg(&upper, args, 0)?.chars().rev().collect())),
        "REPEAT" => {
            let s = text_arg(&upper, args, 0)?;
            let n = int_arg(&upper, args, 1)?.max(0) as usize;
            Ok(Value::Text(s.repeat(n)))
        }
        "LPAD" => Ok(Value::Text(pad(&text_arg(&upper, args, 0)?, int_arg(&upper, args, 1)? as usize, pad_str(args, 2), true))),
        "RPAD" => Ok(Value::Text(pad(&text_arg(&upper, args, 0)?, int_arg(&upper, args, 1)? as usize, pad_str(args, 2), false))),
        "POSITION" | "INSTR" | "LOCATE" => {
            let (haystack, needle) = if upper == "LOCATE" {
                (text_arg(&upper, args, 1)?, text_arg(&upper, args, 0)?)
            } else {
                (text_arg(&upper, args, 0)?, text_arg(&upper, args, 1)?)
            };
            Ok(Value::Integer(haystack.find(&needle).map(|b| haystack[..b].chars().count() as i64 + 1).unwrap_or(0)))
        }
        "LEFT" => {
            let s = text_arg(&upper, args, 0)?;
            let n = int_arg(&upper, args, 1)?.max(0) as usize;
            Ok(Value::Text(s.chars().take(n).collect()))
        }
        "RIGHT" => {
            let s = text_arg(&upper, args, 0)?;
            let chars: Vec<char> = s.chars().collect();
            let n = int_arg(&upper, args, 1)?.max(0) as usize;
            let start = chars.len().saturating_sub(n);
            Ok(Value::Text(chars[start..].iter().collect()))
        }
        "SPACE" => Ok(Value::Text(" ".repeat(int_arg(&upper, args, 0)?.max(0) as usize))),
        "ASCII" => Ok(Value::Integer(text_arg(&upper, args, 0)?.chars().next().map(|c| c as i64).unwrap_or(0))),
        "SOUNDEX" => Ok(Value::Text(soundex(&text_arg(&upper, args, 0)?))),
        "SPLIT_PART" => {
            let s = text_arg(&upper, args, 0)?;
            let sep = text_arg(&upper, args, 1)?;
            let n = int_arg(&upper, args, 2)?;
            if n < 1 {
                return Err(Error::ty("SPLIT_PART() field index must be positive"));
            }
            Ok(s.split(&sep).nth(n as usize - 1).map(|p| Value::Text(p.to_string())).unwrap_or(Value::Text(String::new())))
        }
        "PRINTF" | "FORMAT" => {
            let fmt = text_arg(&upper, args, 0)?;
            Ok(Value::Text(sql_printf(&fmt, &args[1..])))
        }

        // ---- numeric functions ----
        "ABS" => Ok(num_map(args, 0, |f| f.abs())?),
        "CEIL" | "CEILING" => Ok(num_map(args, 0, f64::ceil)?),
        "FLOOR" => Ok(num_map(args, 0, f64::floor)?),
        "ROUND" => {
            let v = float_arg(&upper, args, 0)?;
            let digits = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            let factor = 10f64.powi(digits as i32);
            Ok(Value::Float((v * factor).round() / factor))
        }
        "SQRT" => Ok(Value::Float(float_arg(&upper, args, 0)?.sqrt())),
        "POWER" | "POW" => Ok(Value::Float(float_arg(&upper, args, 0)?.powf(float_arg(&upper, args, 1)?))),
        "MOD" => {
            let a = float_arg(&upper, args, 0)?;
            let b = float_arg(&upper, args, 1)?;
            if b == 0.0 {
                return Err(Error::ty("division by zero in MOD()"));
            }
            Ok(Value::Float(a % b))
        }
        "SIGN" => Ok(Value::Integer(float_arg(&upper, args, 0)?.signum() as i64)),
        "RANDOM" | "RAND" => Ok(Value::Float(rand::random::<f64>())),
        "TRUNC" => {
            let v = float_arg(&upper, args, 0)?;
            let digits = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            let factor = 10f64.powi(digits as i32);
            Ok(Value::Float((v * factor).trunc() / factor))
        }
        "LOG" => match args.len() {
            1 => Ok(Value::Float(float_arg(&upper, args, 0)?.ln())),
            _ => Ok(Value::Float(float_arg(&upper, args, 1)?.log(float_arg(&upper, args, 0)?))),
        },
        "LN" => Ok(Value::Float(float_arg(&upper, args, 0)?.ln())),
        "LOG10" => Ok(Value::Float(float_arg(&upper, args, 0)?.log10())),
        "LOG2" => Ok(Value::Float(float_arg(&upper, args, 0)?.log2())),
        "EXP" => Ok(Value::Float(float_arg(&upper, args, 0)?.exp())),
        "SIN" => Ok(Value::Float(float_arg(&upper, args, 0)?.sin())),
        "COS" => Ok(Value::Float(float_arg(&upper, args, 0)?.cos())),
        "TAN" => Ok(Value::Float(float_arg(&upper, args, 0)?.tan())),
        "DEGREES" => Ok(Value::Float(float_arg(&upper, args, 0)?.to_degrees())),
        "RADIANS" => Ok(Value::Float(float_arg(&upper, args, 0)?.to_radians())),
        "GREATEST" => args
            .iter()
            .cloned()
            .reduce(|a, b| if b.partial_cmp(&a) == Some(std::cmp::Ordering::Greater) { b } else { a })
            .ok_or_else(|| arity_err("GREATEST", 1, 0)),
        "LEAST" => args
            .iter()
            .cloned()
            .reduce(|a, b| if b.partial_cmp(&a) == Some(std::cmp::Ordering::Less) { b } else { a })
            .ok_or_else(|| arity_err("LEAST", 1, 0)),

        // ---- date/time functions ----
        "NOW" | "CURRENT_TIMESTAMP" => Ok(Value::Timestamp(Utc::now())),
        "CURRENT_DATE" => Ok(Value::Date(Utc::now().date_naive())),
        "CURRENT_TIME" => Ok(Value::Time(Utc::now().time())),
        "DATE" => {
            let ts = timestamp_arg(&upper, args, 0)?;
            Ok(Value::Date(ts.date_naive()))
        }
        "YEAR" => Ok(Value::Integer(timestamp_arg(&upper, args, 0)?.year() as i64)),
        "MONTH" => Ok(Value::Integer(timestamp_arg(&upper, args, 0)?.month() as i64)),
        "DAY" => Ok(Value::Integer(timestamp_arg(&upper, args, 0)?.day() as i64)),
        "HOUR" => Ok(Value::Integer(timestamp_arg(&upper, args, 0)?.hour() as i64)),
        "MINUTE" => Ok(Value::Integer(timestamp_arg(&upper, args, 0)?.minute() as i64)),
        "SECOND" => Ok(Value::Integer(timestamp_arg(&upper, args, 0)?.second() as i64)),
        "DATE_ADD" => {
            let ts = timestamp_arg(&upper, args, 0)?;
            let micros = interval_arg(&upper, args, 1)?;
            Ok(Value::Timestamp(ts + chrono::Duration::microseconds(micros)))
        }
        "DATE_SUB" => {
            let ts = timestamp_arg(&upper, args, 0)?;
            let micros = interval_arg(&upper, args, 1)?;
            Ok(Value::Timestamp(ts - chrono::Duration::microseconds(micros)))
        }
        "DATEDIFF" => {
            let a = timestamp_arg(&upper, args, 0)?;
            let b = timestamp_arg(&upper, args, 1)?;
            Ok(Value::Integer((a - b).num_days()))
        }
        "QUARTER" => Ok(Value::Integer((timestamp_arg(&upper, args, 0)?.month() as i64 - 1) / 3 + 1)),
        "DAYOFWEEK" => Ok(Value::Integer(timestamp_arg(&upper, args, 0)?.weekday().num_days_from_sunday() as i64 + 1)),
        "DAYOFYEAR" => Ok(Value::Integer(timestamp_arg(&upper, args, 0)?.ordinal() as i64)),
        "EXTRACT" => {
            let field = text_arg(&upper, args, 0)?.to_ascii_uppercase();
            let ts = timestamp_arg(&upper, args, 1)?;
            Ok(Value::Integer(match field.as_str() {
                "YEAR" => ts.year() as i64,
                "QUARTER" => (ts.month() as i64 - 1) / 3 + 1,
                "MONTH" => ts.month() as i64,
                "DAY" => ts.day() as i64,
                "HOUR" => ts.hour() as i64,
                "MINUTE" => ts.minute() as i64,
                "SECOND" => ts.second() as i64,
                "DOW" => ts.weekday().num_days_from_sunday() as i64,
                "DOY" => ts.ordinal() as i64,
                other => return Err(Error::ty(format!("unknown EXTRACT field '{other}'"))),
            }))
        }
        "DATE_TRUNC" => {
            let field = text_arg(&upper, args, 0)?.to_ascii_uppercase();
            let ts = timestamp_arg(&upper, args, 1)?;
            let truncated = match field.as_str() {
                "YEAR" => NaiveDate::from_ymd_opt(ts.year(), 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
                "MONTH" => NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
                "DAY" => ts.date_naive().and_hms_opt(0, 0, 0).unwrap(),
                "HOUR" => ts.date_naive().and_hms_opt(ts.hour(), 0, 0).unwrap(),
                "MINUTE" => ts.date_naive().and_hms_opt(ts.hour(), ts.minute(), 0).unwrap(),
                other => return Err(Error::ty(format!("unknown DATE_TRUNC field '{other}'"))),
            };
            Ok(Value::Timestamp(Utc.from_utc_datetime(&truncated)))
        }

        // ---- regex ----
        "REGEXP_MATCH" | "REGEXP_LIKE" => {
            let s = text_arg(&upper, args, 0)?;
            let pattern = text_arg(&upper, args, 1)?;
            let re = regex::Regex::new(&pattern).map_err(|e| Error::ty(format!("invalid regex: {e}")))?;
            Ok(Value::Bool(re.is_match(&s)))
        }
        "REGEXP_REPLACE" => {
            let s = text_arg(&upper, args, 0)?;
            let pattern = text_arg(&upper, args, 1)?;
            let replacement = text_arg(&upper, args, 2)?;
            let re = regex::Regex::new(&pattern).map_err(|e| Error::ty(format!("invalid regex: {e}")))?;
            Ok(Value::Text(re.replace_all(&s, replacement.as_str()).to_string()))
        }
        "REGEXP_EXTRACT" => {
            let s = text_arg(&upper, args, 0)?;
            let pattern = text_arg(&upper, args, 1)?;
            let re = regex::Regex::new(&pattern).map_err(|e| Error::ty(format!("invalid regex: {e}")))?;
            Ok(re
                .find(&s)
                .map(|m| Value::Text(m.as_str().to_string()))
                .unwrap_or(Value::Null))
        }

        // ---- crypto / encoding ----
        "MD5" => Ok(Value::Text(format!("{:x}", md5::compute(text_arg(&upper, args, 0)?.as_bytes())))),
        "SHA1" => {
            use sha1::Sha1;
            let mut hasher = Sha1::new();
            hasher.update(text_arg(&upper, args, 0)?.as_bytes());
            Ok(Value::Text(hex::encode(hasher.finalize())))
        }
        "SHA256" => {
            let mut hasher = sha2::Sha256::new();
            hasher.update(text_arg(&upper, args, 0)?.as_bytes());
            Ok(Value::Text(hex::encode(hasher.finalize())))
        }
        "SHA512" => {
            let mut hasher = sha2::Sha512::new();
            hasher.update(text_arg(&upper, args, 0)?.as_bytes());
            Ok(Value::Text(hex::encode(hasher.finalize())))
        }
        "BASE64_ENCODE" => {
            use base64::Engine;
            Ok(Value::Text(base64::engine::general_purpose::STANDARD.encode(text_arg(&upper, args, 0)?.as_bytes())))
        }
        "BASE64_DECODE" => {
            use base64::Engine;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(text_arg(&upper, args, 0)?.as_bytes())
                .map_err(|e| Error::ty(format!("invalid base64: {e}")))?;
            Ok(Value::Blob(decoded))
        }
        "HEX" => Ok(Value::Text(match &args[0] {
            Value::Blob(b) => hex::encode(b),
            other => hex::encode(other.display_text().as_bytes()),
        })),
        "UNHEX" => {
            let decoded = hex::decode(text_arg(&upper, args, 0)?).map_err(|e| Error::ty(format!("invalid hex: {e}")))?;
            Ok(Value::Blob(decoded))
        }
        "GZIP" => {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(text_arg(&upper, args, 0)?.as_bytes())
                .map_err(|e| Error::internal(format!("gzip failed: {e}")))?;
            Ok(Value::Blob(enc.finish().map_err(|e| Error::internal(format!("gzip failed: {e}")))?))
        }
        "GUNZIP" => {
            use flate2::read::GzDecoder;
            let bytes = match &args[0] {
                Value::Blob(b) => b.clone(),
                other => return Err(Error::ty(format!("GUNZIP() expects a blob, got {}", other.type_name()))),
            };
            let mut dec = GzDecoder::new(&bytes[..]);
            let mut out = String::new();
            dec.read_to_string(&mut out).map_err(|e| Error::ty(format!("invalid gzip data: {e}")))?;
            Ok(Value::Text(out))
        }
        "UUID" => Ok(Value::Uuid(uuid::Uuid::new_v4())),

        // ---- JSON ----
        "JSON_EXTRACT" => {
            let j = match &args[0] {
                Value::Json(j) => j.clone(),
                Value::Text(s) => serde_json::from_str(s).map_err(|e| Error::ty(format!("invalid json: {e}")))?,
                other => return Err(Error::ty(format!("JSON_EXTRACT() expects json, got {}", other.type_name()))),
            };
            let path = text_arg(&upper, args, 1)?;
            Ok(json_extract(&j, &path).map(Value::Json).unwrap_or(Value::Null))
        }
        "JSON_VALID" => Ok(Value::Bool(match &args[0] {
            Value::Json(_) => true,
            Value::Text(s) => serde_json::from_str::<serde_json::Value>(s).is_ok(),
            _ => false,
        })),
        "JSON_GET" => {
            let j = match &args[0] {
                Value::Json(j) => j.clone(),
                Value::Text(s) => serde_json::from_str(s).map_err(|e| Error::ty(format!("invalid json: {e}")))?,
                other => return Err(Error::ty(format!("JSON_GET() expects json, got {}", other.type_name()))),
            };
            let key = args[1].display_text();
            Ok(j.get(&key).cloned().map(Value::Json).unwrap_or(Value::Null))
        }

        // ---- array functions ----
        "ARRAY_LENGTH" => match &args[0] {
            Value::Array(items) => Ok(Value::Integer(items.len() as i64)),
            other => Err(Error::ty(format!("ARRAY_LENGTH() expects an array, got {}", other.type_name()))),
        },
        "ARRAY_CONTAINS" => match &args[0] {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|v| v.group_key_eq(&args[1])))),
            other => Err(Error::ty(format!("ARRAY_CONTAINS() expects an array, got {}", other.type_name()))),
        },

        // ---- conditional ----
        "NVL" => Ok(if args[0].is_null() { args[1].clone() } else { args[0].clone() }),
        "IF" | "IIF" => {
            if args.len() != 3 {
                return Err(arity_err(&upper, 3, args.len()));
            }
            Ok(if args[0].as_tribool().is_true() { args[1].clone() } else { args[2].clone() })
        }

        // ---- type introspection ----
        "TYPEOF" => Ok(Value::Text(args[0].type_name().to_string())),
        "VERSION" => Ok(Value::Text(format!("TinySQL {}", env!("CARGO_PKG_VERSION")))),

        _ => Err(Error::ty(format!("unknown function '{name}'"))),
    }
}

/// American Soundex: a letter followed by three digits coding how the rest
/// of the word sounds, used for fuzzy name matching.
fn soundex(s: &str) -> String {
    fn code(c: char) -> Option<char> {
        match c.to_ascii_uppercase() {
            'B' | 'F' | 'P' | 'V' => Some('1'),
            'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => Some('2'),
            'D' | 'T' => Some('3'),
            'L' => Some('4'),
            'M' | 'N' => Some('5'),
            'R' => Some('6'),
            _ => None,
        }
    }
    let mut chars = s.chars().filter(|c| c.is_ascii_alphabetic());
    let first = match chars.next() {
        Some(c) => c.to_ascii_uppercase(),
        None => return String::new(),
    };
    let mut out = String::new();
    out.push(first);
    let mut last_code = code(first);
    for c in chars {
        let cur = code(c);
        if let Some(d) = cur {
            if cur != last_code {
                out.push(d);
            }
        }
        last_code = cur;
        if out.len() == 4 {
            break;
        }
    }
    while out.len() < 4 {
        out.push('0');
    }
    out
}

/// Minimal `printf`-style formatter supporting `%s`, `%d`, `%f`, `%%`.
fn sql_printf(fmt: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut arg_iter = args.iter();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => out.push_str(&arg_iter.next().map(Value::display_text).unwrap_or_default()),
            Some('d') => out.push_str(&arg_iter.next().and_then(Value::as_i64).map(|n| n.to_string()).unwrap_or_default()),
            Some('f') => out.push_str(&arg_iter.next().and_then(Value::as_f64).map(|f| f.to_string()).unwrap_or_default()),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn json_extract(j: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    let mut current = j.clone();
    for segment in path.trim_start_matches('$').trim_start_matches('.').split('.') {
        if segment.is_empty() {
            continue;
        }
        current = current.get(segment)?.clone();
    }
    Some(current)
}

fn pad_str(args: &[Value], idx: usize) -> String {
    args.get(idx).map(Value::display_text).unwrap_or_else(|| " ".to_string())
}

fn pad(s: &str, target_len: usize, pad_with: String, left: bool) -> String {
    let cur_len = s.chars().count();
    if cur_len >= target_len || pad_with.is_empty() {
        return s.chars().take(target_len).collect();
    }
    let needed = target_len - cur_len;
    let filler: String = pad_with.chars().cycle().take(needed).collect();
    if left {
        format!("{filler}{s}")
    } else {
        format!("{s}{filler}")
    }
}

fn text_arg(fn_name: &str, args: &[Value], idx: usize) -> Result<String> {
    args.get(idx)
        .map(Value::display_text)
        .ok_or_else(|| arity_err(fn_name, idx + 1, args.len()))
}

fn int_arg(fn_name: &str, args: &[Value], idx: usize) -> Result<i64> {
    args.get(idx)
        .and_then(Value::as_i64)
        .ok_or_else(|| arity_err(fn_name, idx + 1, args.len()))
}

fn float_arg(fn_name: &str, args: &[Value], idx: usize) -> Result<f64> {
    args.get(idx)
        .and_then(Value::as_f64)
        .ok_or_else(|| arity_err(fn_name, idx + 1, args.len()))
}

fn timestamp_arg(fn_name: &str, args: &[Value], idx: usize) -> Result<DateTime<Utc>> {
    match args.get(idx) {
        Some(Value::Timestamp(ts)) => Ok(*ts),
        Some(Value::Date(d)) => Ok(Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN))),
        Some(Value::Text(s)) => parse_timestamp(s).ok_or_else(|| Error::ty(format!("cannot parse timestamp '{s}'"))),
        _ => Err(arity_err(fn_name, idx + 1, args.len())),
    }
}

fn interval_arg(fn_name: &str, args: &[Value], idx: usize) -> Result<i64> {
    match args.get(idx) {
        Some(Value::Interval(us)) => Ok(*us),
        Some(Value::Integer(days)) => Ok(days * 86_400_000_000),
        _ => Err(arity_err(fn_name, idx + 1, args.len())),
    }
}

fn num_map(args: &[Value], idx: usize, f: impl Fn(f64) -> f64) -> Result<Value> {
    let v = args.get(idx).and_then(Value::as_f64).ok_or_else(|| Error::ty("expected a numeric argument"))?;
    if let Some(Value::Integer(i)) = args.get(idx) {
        return Ok(Value::Integer(f(*i as f64) as i64));
    }
    Ok(Value::Float(f(v)))
}

/// Returns true if `name` is a recognized aggregate function.
pub fn is_aggregate(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "COUNT" | "SUM" | "AVG" | "MIN" | "MAX" | "MIN_BY" | "MAX_BY" | "STRING_AGG" | "ARRAY_AGG" | "VARIANCE" | "STDDEV"
    )
}

/// Returns true if `name` is a window-only ranking/navigation function
/// (as opposed to an aggregate used with an OVER clause).
pub fn is_window_only(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "ROW_NUMBER"
            | "RANK"
            | "DENSE_RANK"
            | "LAG"
            | "LEAD"
            | "FIRST_VALUE"
            | "LAST_VALUE"
            | "NTILE"
            | "MOVING_SUM"
            | "MOVING_AVG"
    )
}

/// Streaming aggregate accumulator, one instance per group per aggregate
/// expression in the SELECT list (spec §4.9 aggregate family).
#[derive(Debug, Clone)]
pub enum Accumulator {
    Count { distinct_seen: Option<Vec<String>>, n: i64 },
    Sum { total: f64, any: bool, all_int: bool, int_total: i64 },
    Avg { total: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
    MinBy { best_key: Option<Value>, best_value: Value },
    MaxBy { best_key: Option<Value>, best_value: Value },
    StringAgg { sep: String, parts: Vec<String> },
    ArrayAgg(Vec<Value>),
    Variance { values: Vec<f64> },
    Stddev { values: Vec<f64> },
}

impl Accumulator {
    pub fn new(name: &str, distinct: bool, sep: Option<String>) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Accumulator::Count { distinct_seen: if distinct { Some(Vec::new()) } else { None }, n: 0 },
            "SUM" => Accumulator::Sum { total: 0.0, any: false, all_int: true, int_total: 0 },
            "AVG" => Accumulator::Avg { total: 0.0, count: 0 },
            "MIN" => Accumulator::Min(None),
            "MAX" => Accumulator::Max(None),
            "MIN_BY" => Accumulator::MinBy { best_key: None, best_value: Value::Null },
            "MAX_BY" => Accumulator::MaxBy { best_key: None, best_value: Value::Null },
            "STRING_AGG" => Accumulator::StringAgg { sep: sep.unwrap_or_else(|| ",".to_string()), parts: Vec::new() },
            "ARRAY_AGG" => Accumulator::ArrayAgg(Vec::new()),
            "VARIANCE" => Accumulator::Variance { values: Vec::new() },
            "STDDEV" => Accumulator::Stddev { values: Vec::new() },
            _ => Accumulator::Count { distinct_seen: None, n: 0 },
        }
    }

    pub fn feed(&mut self, value: &Value) {
        match self {
            Accumulator::Count { distinct_seen, n } => {
                if value.is_null() {
                    return;
                }
                if let Some(seen) = distinct_seen {
                    let key = value.group_key_repr();
                    if seen.contains(&key) {
                        return;
                    }
                    seen.push(key);
                }
                *n += 1;
            }
            Accumulator::Sum { total, any, all_int, int_total } => {
                if let Some(f) = value.as_f64() {
                    *total += f;
                    *any = true;
                    if !matches!(value, Value::Integer(_)) {
                        *all_int = false;
                    } else if let Value::Integer(i) = value {
                        *int_total += i;
                    }
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(f) = value.as_f64() {
                    *total += f;
                    *count += 1;
                }
            }
            Accumulator::Min(cur) => {
                if value.is_null() {
                    return;
                }
                if cur.as_ref().map(|c| value.partial_cmp(c) == Some(std::cmp::Ordering::Less)).unwrap_or(true) {
                    *cur = Some(value.clone());
                }
            }
            Accumulator::Max(cur) => {
                if value.is_null() {
                    return;
                }
                if cur.as_ref().map(|c| value.partial_cmp(c) == Some(std::cmp::Ordering::Greater)).unwrap_or(true) {
                    *cur = Some(value.clone());
                }
            }
            Accumulator::StringAgg { parts, .. } => {
                if !value.is_null() {
                    parts.push(value.display_text());
                }
            }
            Accumulator::ArrayAgg(items) => items.push(value.clone()),
            Accumulator::Variance { values } | Accumulator::Stddev { values } => {
                if let Some(f) = value.as_f64() {
                    values.push(f);
                }
            }
            Accumulator::MinBy { .. } | Accumulator::MaxBy { .. } => {}
        }
    }

    /// MIN_BY/MAX_BY feed a (value, key) pair rather than a single value;
    /// ties on the key keep the first-seen value (spec §4.9).
    pub fn feed_pair(&mut self, value: &Value, key: &Value) {
        match self {
            Accumulator::MinBy { best_key, best_value } => {
                if key.is_null() {
                    return;
                }
                if best_key.as_ref().map(|k| key.partial_cmp(k) == Some(std::cmp::Ordering::Less)).unwrap_or(true) {
                    *best_key = Some(key.clone());
                    *best_value = value.clone();
                }
            }
            Accumulator::MaxBy { best_key, best_value } => {
                if key.is_null() {
                    return;
                }
                if best_key.as_ref().map(|k| key.partial_cmp(k) == Some(std::cmp::Ordering::Greater)).unwrap_or(true) {
                    *best_key = Some(key.clone());
                    *best_value = value.clone();
                }
            }
            _ => self.feed(value),
        }
    }

    pub fn finish(self) -> Value {
        match self {
            Accumulator::Count { n, .. } => Value::Integer(n),
            Accumulator::Sum { total, any, all_int, int_total } => {
                if !any {
                    Value::Integer(0)
                } else if all_int {
                    Value::Integer(int_total)
                } else {
                    Value::Float(total)
                }
            }
            Accumulator::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Float(total / count as f64)
                }
            }
            Accumulator::Min(v) => v.unwrap_or(Value::Null),
            Accumulator::Max(v) => v.unwrap_or(Value::Null),
            Accumulator::MinBy { best_value, .. } => best_value,
            Accumulator::MaxBy { best_value, .. } => best_value,
            Accumulator::StringAgg { sep, parts } => Value::Text(parts.join(&sep)),
            Accumulator::ArrayAgg(items) => Value::Array(items),
            Accumulator::Variance { values } => Value::Float(variance(&values)),
            Accumulator::Stddev { values } => Value::Float(variance(&values).sqrt()),
        }
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let sum_sq = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    sum_sq / (values.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_functions() {
        assert_eq!(
            call_scalar("UPPER", &[Value::Text("abc".into())]).unwrap(),
            Value::Text("ABC".into())
        );
        assert_eq!(
            call_scalar("LENGTH", &[Value::Text("hello".into())]).unwrap(),
            Value::Integer(5)
        );
        assert_eq!(
            call_scalar("CONCAT", &[Value::Text("a".into()), Value::Text("b".into())]).unwrap(),
            Value::Text("ab".into())
        );
    }

    #[test]
    fn test_coalesce_and_nullif() {
        assert_eq!(call_scalar("COALESCE", &[Value::Null, Value::Integer(5)]).unwrap(), Value::Integer(5));
        assert!(matches!(call_scalar("NULLIF", &[Value::Integer(1), Value::Integer(1)]).unwrap(), Value::Null));
    }

    #[test]
    fn test_null_propagation() {
        assert!(matches!(call_scalar("UPPER", &[Value::Null]).unwrap(), Value::Null));
    }

    #[test]
    fn test_md5_and_hex() {
        let md5 = call_scalar("MD5", &[Value::Text("abc".into())]).unwrap();
        assert_eq!(md5, Value::Text("900150983cd24fb0d6963f7d28e17f72".into()));
    }

    #[test]
    fn test_sum_accumulator_int_vs_float() {
        let mut acc = Accumulator::new("SUM", false, None);
        acc.feed(&Value::Integer(1));
        acc.feed(&Value::Integer(2));
        assert_eq!(acc.finish(), Value::Integer(3));

        let mut acc = Accumulator::new("SUM", false, None);
        acc.feed(&Value::Integer(1));
        acc.feed(&Value::Float(1.5));
        assert_eq!(acc.finish(), Value::Float(2.5));
    }

    #[test]
    fn test_count_distinct() {
        let mut acc = Accumulator::new("COUNT", true, None);
        acc.feed(&Value::Integer(1));
        acc.feed(&Value::Integer(1));
        acc.feed(&Value::Integer(2));
        assert_eq!(acc.finish(), Value::Integer(2));
    }
}
