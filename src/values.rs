//! Parsing and column helpers shared by the engine modules: money, calendar
//! dates, timestamps and existence lookups.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Params, Row};
use rust_decimal::Decimal;
use std::str::FromStr;

pub const MONEY_SCALE: u32 = 2;

/// Largest amount accepted for a single fee, item or payment.
pub fn max_money() -> Decimal {
    Decimal::new(100_000_000_000_000, MONEY_SCALE)
}

/// Rejects amounts outside `0..=max_money()`.
pub fn check_money(field: &str, d: Decimal) -> EngineResult<()> {
    if d.is_sign_negative() && !d.is_zero() {
        return Err(EngineError::invalid(format!("{field} must not be negative")));
    }
    if d > max_money() {
        return Err(EngineError::invalid(format!(
            "{field} must not exceed {}",
            max_money()
        )));
    }
    Ok(())
}

/// Adds amounts without panicking; an overflow is reported as bad input.
pub fn sum_money<I>(field: &str, amounts: I) -> EngineResult<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    let mut total = amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, d| acc.checked_add(d))
        .ok_or_else(|| EngineError::invalid(format!("{field} is too large")))?;
    total.rescale(MONEY_SCALE);
    Ok(total)
}

/// Parses a money amount from a JSON number or numeric string.
///
/// Amounts are non-negative with at most two decimal places and are returned
/// rescaled to exactly two (`60` -> `60.00`).
pub fn parse_money(field: &str, v: &serde_json::Value) -> EngineResult<Decimal> {
    let raw = match v {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return Err(EngineError::invalid(format!("{field} must be a number"))),
    };
    let mut d = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| EngineError::invalid(format!("{field} must be a number")))?;
    check_money(field, d)?;
    d = d.normalize();
    if d.scale() > MONEY_SCALE {
        return Err(EngineError::invalid(format!(
            "{field} has more than {MONEY_SCALE} decimal places"
        )));
    }
    d.rescale(MONEY_SCALE);
    Ok(d)
}

pub fn money_to_sql(d: Decimal) -> String {
    let mut d = d;
    d.rescale(MONEY_SCALE);
    d.to_string()
}

pub fn money_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp; returns `YYYY-MM-DD`.
pub fn parse_date(field: &str, raw: &str) -> EngineResult<String> {
    let t = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    Err(EngineError::invalid(format!(
        "{field} must be a date (YYYY-MM-DD)"
    )))
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

pub fn exists<P: Params>(conn: &Connection, sql: &str, params: P) -> EngineResult<bool> {
    Ok(conn
        .query_row(sql, params, |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn require_student(conn: &Connection, student_id: &str) -> EngineResult<()> {
    if exists(conn, "SELECT 1 FROM students WHERE id = ?", [student_id])? {
        Ok(())
    } else {
        Err(EngineError::not_found("student"))
    }
}

pub fn require_course(conn: &Connection, course_id: &str) -> EngineResult<()> {
    if exists(conn, "SELECT 1 FROM courses WHERE id = ?", [course_id])? {
        Ok(())
    } else {
        Err(EngineError::not_found("course"))
    }
}

/// Display-name snapshot used as a certificate recipient.
pub fn student_display_name(conn: &Connection, student_id: &str) -> EngineResult<String> {
    let names: Option<(String, String)> = conn
        .query_row(
            "SELECT first_name, last_name FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((first, last)) = names else {
        return Err(EngineError::not_found("student"));
    };
    let name = format!("{} {}", first.trim(), last.trim()).trim().to_string();
    if name.is_empty() {
        return Err(EngineError::invalid(format!(
            "student {student_id} has no display name"
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn money_accepts_numbers_and_strings() {
        assert_eq!(parse_money("amount", &json!(60)).expect("int").to_string(), "60.00");
        assert_eq!(parse_money("amount", &json!(40.5)).expect("float").to_string(), "40.50");
        assert_eq!(parse_money("amount", &json!("100.00")).expect("str").to_string(), "100.00");
        assert_eq!(parse_money("amount", &json!("12.300")).expect("trailing zeros").to_string(), "12.30");
    }

    #[test]
    fn money_rejects_bad_values() {
        assert!(parse_money("amount", &json!("abc")).is_err());
        assert!(parse_money("amount", &json!(-5)).is_err());
        assert!(parse_money("amount", &json!(1.005)).is_err());
        assert!(parse_money("amount", &json!(null)).is_err());
        assert!(parse_money("amount", &json!(true)).is_err());
    }

    #[test]
    fn money_is_bounded_and_sums_do_not_overflow() {
        assert!(parse_money("amount", &json!("1000000000000.00")).is_ok());
        assert!(parse_money("amount", &json!("1000000000000.01")).is_err());
        assert!(parse_money("amount", &json!("79228162514264337593543950335")).is_err());
        assert!(parse_money("amount", &json!(1e300)).is_err());

        let big = Decimal::MAX;
        assert!(matches!(
            sum_money("paid", [big, big]),
            Err(EngineError::InvalidInput(_))
        ));
        let total = sum_money("paid", [Decimal::new(6000, 2), Decimal::new(4, 0)]).expect("sum");
        assert_eq!(total.to_string(), "64.00");
        assert_eq!(sum_money("paid", Vec::<Decimal>::new()).expect("empty").to_string(), "0.00");
    }

    #[test]
    fn dates_normalise_to_calendar_day() {
        assert_eq!(parse_date("d", "2024-09-01").expect("date"), "2024-09-01");
        assert_eq!(
            parse_date("d", "2024-09-01T10:30:00Z").expect("rfc3339"),
            "2024-09-01"
        );
        assert!(parse_date("d", "09/01/2024").is_err());
    }
}
