//! Sandboxed string templates for mapping rules.
//!
//! Configuration may attach a template to a rule or directive. Templates
//! interpolate values from a fixed scope and call a fixed, enumerated
//! function set; nothing in a template can execute code or reach outside
//! the scope it is rendered with.
//!
//! Syntax: literal text with `{...}` placeholders. A placeholder is either
//! a bare path (`field.value`, `record.casenumber`, `subject.firstname`,
//! `form.some-key`) or a function call with space-separated arguments,
//! where string literals are double-quoted:
//!
//! ```text
//! {regex "[0-9]+" field.value}
//! {date "%Y-%m-%d" record.capturedat}
//! {dateShort subject.dob}
//! ```
//!
//! Unknown paths render as the empty string. `{{` and `}}` escape literal
//! braces.

use chrono::{DateTime, Datelike, Utc};
use portage_core::{Error, FormField, Result, UploadRecord};
use regex::Regex;
use tracing::warn;

use crate::engine::FieldLookup;

/// Month and day names for the date formatting functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    NbNo,
    EnUs,
}

impl Locale {
    pub fn parse(s: &str) -> Result<Locale> {
        match s.replace('-', "_").to_lowercase().as_str() {
            "" | "nb_no" => Ok(Locale::NbNo),
            "en_us" => Ok(Locale::EnUs),
            other => Err(Error::Config(format!("unsupported locale: {other}"))),
        }
    }

    fn month_abbreviated(&self, month: u32) -> &'static str {
        const NB: [&str; 12] = [
            "jan.", "feb.", "mar.", "apr.", "mai", "jun.", "jul.", "aug.", "sep.", "okt.", "nov.",
            "des.",
        ];
        const EN: [&str; 12] = [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ];
        let idx = (month.saturating_sub(1) as usize).min(11);
        match self {
            Locale::NbNo => NB[idx],
            Locale::EnUs => EN[idx],
        }
    }

    fn month_wide(&self, month: u32) -> &'static str {
        const NB: [&str; 12] = [
            "januar",
            "februar",
            "mars",
            "april",
            "mai",
            "juni",
            "juli",
            "august",
            "september",
            "oktober",
            "november",
            "desember",
        ];
        const EN: [&str; 12] = [
            "January",
            "February",
            "March",
            "April",
            "May",
            "June",
            "July",
            "August",
            "September",
            "October",
            "November",
            "December",
        ];
        let idx = (month.saturating_sub(1) as usize).min(11);
        match self {
            Locale::NbNo => NB[idx],
            Locale::EnUs => EN[idx],
        }
    }

    fn day_wide(&self, weekday_from_sunday: u32) -> &'static str {
        const NB: [&str; 7] = [
            "søndag", "mandag", "tirsdag", "onsdag", "torsdag", "fredag", "lørdag",
        ];
        const EN: [&str; 7] = [
            "Sunday",
            "Monday",
            "Tuesday",
            "Wednesday",
            "Thursday",
            "Friday",
            "Saturday",
        ];
        let idx = (weekday_from_sunday as usize).min(6);
        match self {
            Locale::NbNo => NB[idx],
            Locale::EnUs => EN[idx],
        }
    }

    /// Short date: `24. des. 2019`.
    pub fn fmt_date_short(&self, t: DateTime<Utc>) -> String {
        format!(
            "{}. {} {}",
            t.day(),
            self.month_abbreviated(t.month()),
            t.year()
        )
    }

    /// Long date: `tirsdag 24. desember 2019`.
    pub fn fmt_date_long(&self, t: DateTime<Utc>) -> String {
        format!(
            "{} {}. {} {}",
            self.day_wide(t.weekday().num_days_from_sunday()),
            t.day(),
            self.month_wide(t.month()),
            t.year()
        )
    }
}

/// A value a scope path can resolve to.
#[derive(Debug, Clone)]
enum ScopeValue {
    Text(String),
    Time(DateTime<Utc>),
}

impl ScopeValue {
    fn into_text(self) -> String {
        match self {
            ScopeValue::Text(s) => s,
            ScopeValue::Time(t) => t.to_rfc3339(),
        }
    }
}

/// Everything a template may read while rendering.
pub struct Scope<'a> {
    pub record: &'a UploadRecord,
    pub fields: &'a FieldLookup,
    /// The form field the current rule fired on, if any.
    pub field: Option<&'a FormField>,
    /// The raw value of that form field.
    pub value: Option<&'a str>,
    pub locale: Locale,
}

impl Scope<'_> {
    fn resolve(&self, path: &str) -> Option<ScopeValue> {
        let lower = path.to_lowercase();
        if lower == "value" {
            return self.value.map(|v| ScopeValue::Text(v.to_string()));
        }
        if let Some(rest) = lower.strip_prefix("field.") {
            let f = self.field?;
            let text = match rest {
                "key" => &f.key,
                "fieldid" => &f.field_id,
                "translationkey" => &f.translation_key,
                "visualname" => &f.visual_name,
                "value" => &f.value,
                _ => return None,
            };
            return Some(ScopeValue::Text(text.clone()));
        }
        if let Some(key) = path
            .strip_prefix("form.")
            .or_else(|| path.strip_prefix("FORM."))
        {
            // Lookup keys keep the client's casing.
            return Some(ScopeValue::Text(self.fields.get(key).to_string()));
        }
        if let Some(rest) = lower.strip_prefix("record.") {
            let r = self.record;
            let v = match rest {
                "userid" => ScopeValue::Text(r.user_id.clone()),
                "casenumber" => ScopeValue::Text(r.case_number.clone()),
                "description" => ScopeValue::Text(r.description.clone()),
                "displayname" => ScopeValue::Text(r.display_name.clone()),
                "filename" => ScopeValue::Text(r.file_name.clone()),
                "filetype" => ScopeValue::Text(r.file_type.clone()),
                "notes" => ScopeValue::Text(r.notes.clone()),
                "accountname" => ScopeValue::Text(r.account_name.clone()),
                "equipmentid" => ScopeValue::Text(r.equipment_id.clone()),
                "interviewtype" => ScopeValue::Text(r.interview_type.clone()),
                "groupname" => ScopeValue::Text(r.group_name.clone()),
                "clientmediaid" => ScopeValue::Text(r.client_media_id.clone()),
                "parent.name" => ScopeValue::Text(
                    r.parent.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
                ),
                "parent.id" => {
                    ScopeValue::Text(r.parent.as_ref().map(|p| p.id.clone()).unwrap_or_default())
                }
                "capturedat" => ScopeValue::Time(r.captured_at?),
                "createdat" => ScopeValue::Time(r.created_at?),
                "completedat" => ScopeValue::Time(r.completed_at?),
                _ => return None,
            };
            return Some(v);
        }
        if let Some(rest) = lower.strip_prefix("subject.") {
            let s = self.record.first_subject()?;
            let v = match rest {
                "firstname" => ScopeValue::Text(s.first_name.clone()),
                "lastname" => ScopeValue::Text(s.last_name.clone()),
                "id" => ScopeValue::Text(s.id.clone()),
                "nationality" => ScopeValue::Text(s.nationality.clone()),
                "workplace" => ScopeValue::Text(s.workplace.clone()),
                "status" => ScopeValue::Text(s.status.clone()),
                "phone" => ScopeValue::Text(s.phone.clone()),
                "mobile" => ScopeValue::Text(s.mobile.clone()),
                "dob" => ScopeValue::Time(s.dob?),
                _ => return None,
            };
            return Some(v);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    /// A double-quoted string literal.
    Literal(String),
    /// A scope path.
    Path(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Date,
    DateShort,
    DateLong,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Path(String),
    Call(Func, Vec<Arg>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Expr(Expr),
}

/// A parsed template, validated at configuration load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Template> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut expr = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        expr.push(c);
                    }
                    if !closed {
                        return Err(Error::Config(format!(
                            "unclosed placeholder in template: {source}"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Expr(parse_expr(&expr, source)?));
                }
                '}' => {
                    return Err(Error::Config(format!(
                        "stray '}}' in template: {source}"
                    )))
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Template {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against a scope. Never fails: unresolvable paths and function
    /// misuse render as empty, and the result is trimmed.
    pub fn render(&self, scope: &Scope<'_>) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Expr(Expr::Path(p)) => {
                    if let Some(v) = scope.resolve(p) {
                        out.push_str(&v.into_text());
                    }
                }
                Segment::Expr(Expr::Call(func, args)) => {
                    out.push_str(&eval_call(*func, args, scope));
                }
            }
        }
        out.trim().to_string()
    }
}

fn parse_expr(expr: &str, source: &str) -> Result<Expr> {
    let tokens = tokenize(expr, source)?;
    if tokens.is_empty() {
        return Err(Error::Config(format!("empty placeholder in template: {source}")));
    }
    let func = match &tokens[0] {
        Arg::Path(name) => match name.as_str() {
            "date" => Some(Func::Date),
            "dateShort" | "dateshort" => Some(Func::DateShort),
            "dateLong" | "datelong" => Some(Func::DateLong),
            "regex" => Some(Func::Regex),
            _ => None,
        },
        Arg::Literal(_) => None,
    };
    match func {
        Some(f) => {
            let args = tokens[1..].to_vec();
            let expected = match f {
                Func::Date | Func::Regex => 2,
                Func::DateShort | Func::DateLong => 1,
            };
            if args.len() != expected {
                return Err(Error::Config(format!(
                    "wrong argument count for template function in: {source}"
                )));
            }
            if matches!(f, Func::Regex) {
                // Patterns are static configuration, so compile errors are
                // load-time errors.
                if let Arg::Literal(p) = &args[0] {
                    Regex::new(p).map_err(|e| {
                        Error::Config(format!("bad regex in template {source}: {e}"))
                    })?;
                }
            }
            Ok(Expr::Call(f, args))
        }
        None => {
            if tokens.len() != 1 {
                return Err(Error::Config(format!(
                    "unknown template function in: {source}"
                )));
            }
            match &tokens[0] {
                Arg::Path(p) => Ok(Expr::Path(p.clone())),
                Arg::Literal(_) => Err(Error::Config(format!(
                    "bare string literal placeholder in template: {source}"
                ))),
            }
        }
    }
}

fn tokenize(expr: &str, source: &str) -> Result<Vec<Arg>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut lit = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '"' {
                    closed = true;
                    break;
                }
                lit.push(c);
            }
            if !closed {
                return Err(Error::Config(format!(
                    "unterminated string literal in template: {source}"
                )));
            }
            tokens.push(Arg::Literal(lit));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(Arg::Path(word));
        }
    }
    Ok(tokens)
}

fn eval_arg_text(arg: &Arg, scope: &Scope<'_>) -> String {
    match arg {
        Arg::Literal(s) => s.clone(),
        Arg::Path(p) => scope.resolve(p).map(ScopeValue::into_text).unwrap_or_default(),
    }
}

fn eval_arg_time(arg: &Arg, scope: &Scope<'_>) -> Option<DateTime<Utc>> {
    match arg {
        Arg::Literal(_) => None,
        Arg::Path(p) => match scope.resolve(p)? {
            ScopeValue::Time(t) => Some(t),
            ScopeValue::Text(_) => None,
        },
    }
}

fn eval_call(func: Func, args: &[Arg], scope: &Scope<'_>) -> String {
    match func {
        Func::Date => {
            let Some(t) = eval_arg_time(&args[1], scope) else {
                return String::new();
            };
            let fmt = eval_arg_text(&args[0], scope);
            // An invalid strftime string errors at display time, not parse
            // time, so render through a fallible write.
            use std::fmt::Write as _;
            let mut out = String::new();
            if write!(out, "{}", t.format(&fmt)).is_err() {
                warn!(format = fmt, "invalid date format in template");
                return String::new();
            }
            out
        }
        Func::DateShort => eval_arg_time(&args[0], scope)
            .map(|t| scope.locale.fmt_date_short(t))
            .unwrap_or_default(),
        Func::DateLong => eval_arg_time(&args[0], scope)
            .map(|t| scope.locale.fmt_date_long(t))
            .unwrap_or_default(),
        Func::Regex => {
            let pattern = eval_arg_text(&args[0], scope);
            let haystack = eval_arg_text(&args[1], scope);
            match Regex::new(&pattern) {
                Ok(re) => re.find(&haystack).map(|m| m.as_str().to_string()).unwrap_or_default(),
                Err(e) => {
                    warn!(pattern, error = %e, "regex in template does not compile");
                    String::new()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scope_record() -> UploadRecord {
        UploadRecord {
            case_number: "8888".into(),
            captured_at: Some(Utc.with_ymd_and_hms(2019, 12, 24, 18, 30, 0).unwrap()),
            ..UploadRecord::default()
        }
    }

    fn render(source: &str, record: &UploadRecord) -> String {
        let fields = FieldLookup::default();
        let scope = Scope {
            record,
            fields: &fields,
            field: None,
            value: None,
            locale: Locale::NbNo,
        };
        Template::parse(source).unwrap().render(&scope)
    }

    #[test]
    fn test_literal_only_template() {
        assert_eq!(render("no placeholders", &scope_record()), "no placeholders");
    }

    #[test]
    fn test_path_interpolation() {
        assert_eq!(
            render("case {record.casenumber}", &scope_record()),
            "case 8888"
        );
    }

    #[test]
    fn test_unknown_path_renders_empty() {
        assert_eq!(render("[{record.nosuch}]", &scope_record()), "[]");
    }

    #[test]
    fn test_escaped_braces() {
        assert_eq!(render("{{literal}}", &scope_record()), "{literal}");
    }

    #[test]
    fn test_date_function() {
        assert_eq!(
            render("{date \"%Y-%m-%d\" record.capturedat}", &scope_record()),
            "2019-12-24"
        );
    }

    #[test]
    fn test_date_short_norwegian() {
        assert_eq!(
            render("{dateShort record.capturedat}", &scope_record()),
            "24. des. 2019"
        );
    }

    #[test]
    fn test_date_long_norwegian() {
        // 2019-12-24 was a Tuesday.
        assert_eq!(
            render("{dateLong record.capturedat}", &scope_record()),
            "tirsdag 24. desember 2019"
        );
    }

    #[test]
    fn test_date_on_absent_timestamp_renders_empty() {
        let record = UploadRecord::default();
        assert_eq!(render("{dateShort record.capturedat}", &record), "");
    }

    #[test]
    fn test_regex_extraction() {
        assert_eq!(
            render("{regex \"[0-9]+\" record.casenumber}", &scope_record()),
            "8888"
        );
    }

    #[test]
    fn test_regex_no_match_renders_empty() {
        assert_eq!(
            render("{regex \"[a-z]+\" record.casenumber}", &scope_record()),
            ""
        );
    }

    #[test]
    fn test_bad_regex_rejected_at_parse() {
        assert!(Template::parse("{regex \"[\" record.casenumber}").is_err());
    }

    #[test]
    fn test_unclosed_placeholder_rejected() {
        assert!(Template::parse("{record.casenumber").is_err());
    }

    #[test]
    fn test_unknown_function_rejected() {
        assert!(Template::parse("{upper record.casenumber}").is_err());
    }

    #[test]
    fn test_result_is_trimmed() {
        assert_eq!(render("  {record.nosuch}  ", &scope_record()), "");
    }

    #[test]
    fn test_english_locale_dates() {
        let t = Utc.with_ymd_and_hms(2019, 12, 24, 0, 0, 0).unwrap();
        assert_eq!(Locale::EnUs.fmt_date_short(t), "24. Dec 2019");
        assert_eq!(Locale::EnUs.fmt_date_long(t), "Tuesday 24. December 2019");
    }

    #[test]
    fn test_locale_parse() {
        assert_eq!(Locale::parse("nb_NO").unwrap(), Locale::NbNo);
        assert_eq!(Locale::parse("en-US").unwrap(), Locale::EnUs);
        assert!(Locale::parse("fr_FR").is_err());
    }
}
