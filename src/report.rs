//! Plain-text statistics report
//!
//! Renders one line per element:
//!
//! ```text
//!     temperature: 41.5
//!  rx.packets[0]: 1200
//!  tx.packets[0]: 980
//!        link_up: yes
//! ```
//!
//! Each element is shown under the shortest name that is unique in the
//! report: the metric name (with `[index]` for arrays), then `block.name`,
//! then `zone.block.name`. With [`ReportOptions::aliases`] an element's
//! `alias` label replaces the metric name. Names are right-aligned and sorted in natural
//! order. Flags print `yes`/`no`, gauges print the converted value with four
//! significant digits and counters print the accumulated raw value.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::Domain;
use crate::filter::MetricFilter;
use crate::metric::{Element, MetricType, MetricVisit};

/// Report rendering options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// Always use `zone.block.name`
    pub long_names: bool,
    /// Print exported labels under each line
    pub labels: bool,
    /// Append the block's last update time to each line
    pub last_update: bool,
    /// Use an element's `alias` label, when it has one, as its short name
    pub aliases: bool,
}

/// Label key consulted by [`ReportOptions::aliases`]
pub const ALIAS_LABEL: &str = "alias";

struct Row {
    short: String,
    partial: String,
    long: String,
    value: String,
    last_update: String,
    labels: Vec<(String, String)>,
}

/// Render the domain's metrics as text
pub fn render(domain: &Domain, filter: &MetricFilter, options: &ReportOptions) -> String {
    let mut rows = Vec::new();
    let _ = domain.for_each_metric(|visit| {
        collect_rows(visit, filter, options, &mut rows);
        Ok::<(), Infallible>(())
    });
    format_rows(rows, options)
}

fn collect_rows(
    visit: &MetricVisit<'_>,
    filter: &MetricFilter,
    options: &ReportOptions,
    rows: &mut Vec<Row>,
) {
    let spec = visit.spec();
    let last_update = format_timestamp(visit.last_update);
    for index in filter.select(visit.metric) {
        let element = &visit.elements()[index];
        let alias = element
            .labels()
            .get(ALIAS_LABEL)
            .filter(|a| options.aliases && !a.is_empty());
        let short = if let Some(alias) = alias {
            alias.to_string()
        } else if spec.flags.array {
            format!("{}[{}]", spec.name, index)
        } else {
            spec.name.clone()
        };
        let partial = format!("{}.{}", visit.block, short);
        let long = format!("{}.{}", visit.zone, partial);
        let mut labels: Vec<(String, String)> = element
            .labels()
            .exported()
            .map(|l| (l.key.clone(), l.value.clone()))
            .collect();
        labels.sort();

        rows.push(Row {
            short,
            partial,
            long,
            value: format_value(spec.metric_type, element),
            last_update: last_update.clone(),
            labels,
        });
    }
}

fn format_rows(rows: Vec<Row>, options: &ReportOptions) -> String {
    let mut short_count: HashMap<&str, usize> = HashMap::new();
    let mut partial_count: HashMap<&str, usize> = HashMap::new();
    for row in &rows {
        *short_count.entry(&row.short).or_default() += 1;
        *partial_count.entry(&row.partial).or_default() += 1;
    }

    // group rows by display name, keeping traversal order within a name
    let mut named: Vec<(&str, Vec<&Row>)> = Vec::new();
    let mut slots: BTreeMap<&str, usize> = BTreeMap::new();
    for row in &rows {
        let name = if options.long_names {
            row.long.as_str()
        } else if short_count[row.short.as_str()] == 1 {
            row.short.as_str()
        } else if partial_count[row.partial.as_str()] == 1 {
            row.partial.as_str()
        } else {
            row.long.as_str()
        };
        let slot = *slots.entry(name).or_insert_with(|| {
            named.push((name, Vec::new()));
            named.len() - 1
        });
        named[slot].1.push(row);
    }
    named.sort_by(|a, b| natural_cmp(a.0, b.0));

    let name_len = named.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
    let value_len = rows.iter().map(|r| r.value.len()).max().unwrap_or(0);

    let mut out = String::new();
    for (name, group) in &named {
        for row in group {
            let mut line =
                format!("{:>nw$}: {:<vw$}", name, row.value, nw = name_len, vw = value_len);
            if options.last_update {
                let _ = write!(line, "    [{}]", row.last_update);
            }
            let _ = writeln!(out, "{}", line.trim_end());
            if options.labels {
                for (k, v) in &row.labels {
                    let _ = writeln!(out, "{:>nw$}  <{}=\"{}\">", "", k, v, nw = name_len);
                }
            }
        }
    }
    out
}

/// `<seconds>s.<nanos>ns` since the Unix epoch, `never` before the first pass
fn format_timestamp(time: Option<SystemTime>) -> String {
    match time.map(|t| t.duration_since(UNIX_EPOCH)) {
        Some(Ok(since)) => format!("{}s.{}ns", since.as_secs(), since.subsec_nanos()),
        Some(Err(_)) => "0s.0ns".to_string(),
        None => "never".to_string(),
    }
}

fn format_value(metric_type: MetricType, element: &Element) -> String {
    match metric_type {
        MetricType::Flag if element.raw() != 0 => "yes".to_string(),
        MetricType::Flag => "no".to_string(),
        MetricType::Gauge => format_general(element.converted(), 4),
        MetricType::Counter => element.raw().to_string(),
    }
}

/// Format with `precision` significant digits, trailing zeros removed.
///
/// Uses scientific notation when the exponent is below -4 or not below
/// `precision`, like C's `%g`.
pub fn format_general(value: f64, precision: usize) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let precision = precision.max(1);
    let sci = format!("{:.*e}", precision - 1, value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= precision as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_zeros(mantissa), sign, exp.abs())
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        trim_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Compare strings with digit runs ordered numerically (`q2` < `q10`)
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.as_bytes();
    let mut b = b.as_bytes();

    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (da, ra) = split_digits(a);
                let (db, rb) = split_digits(b);
                let ta = trim_leading_zeros(da);
                let tb = trim_leading_zeros(db);
                let ord = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = ra;
                b = rb;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                a = &a[1..];
                b = &b[1..];
            }
        }
    }
}

fn split_digits(s: &[u8]) -> (&[u8], &[u8]) {
    let n = s.iter().take_while(|c| c.is_ascii_digit()).count();
    s.split_at(n)
}

fn trim_leading_zeros(s: &[u8]) -> &[u8] {
    let n = s.iter().take_while(|c| **c == b'0').count();
    &s[n..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_general() {
        assert_eq!(format_general(41.5, 4), "41.5");
        assert_eq!(format_general(0.85, 4), "0.85");
        assert_eq!(format_general(1234.4, 4), "1234");
        assert_eq!(format_general(12346.0, 4), "1.235e+04");
        assert_eq!(format_general(0.0001, 4), "0.0001");
        assert_eq!(format_general(0.00001234, 4), "1.234e-05");
        assert_eq!(format_general(-2.0, 4), "-2");
        assert_eq!(format_general(0.0, 4), "0");
    }

    #[test]
    fn test_format_timestamp() {
        let t = UNIX_EPOCH + std::time::Duration::new(12, 5);
        assert_eq!(format_timestamp(Some(t)), "12s.5ns");
        assert_eq!(format_timestamp(None), "never");
    }

    #[test]
    fn test_natural_order() {
        let mut names = vec!["q10", "q2", "q1", "p", "q02x"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["p", "q1", "q2", "q02x", "q10"]);
    }
}
