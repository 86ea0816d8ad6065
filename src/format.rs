use std::fmt;

use crate::store::AggregateStore;

// tenths, printed with exactly one fractional digit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal(pub i64);

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{}", abs / 10, abs % 10)
    }
}

/// The result line: `{k1=min/avg/max, k2=min/avg/max, ...}` with keys in ascending byte order.
pub struct Report<'a, S>(pub &'a S);

impl<S: AggregateStore> fmt::Display for Report<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut res = Ok(());
        let mut first = true;
        self.0.for_each_sorted(|key, agg| {
            // an entry that never saw a value has nothing to report
            let Some(mean) = agg.mean() else {
                return;
            };
            if res.is_err() {
                return;
            }
            let sep = if first { "" } else { ", " };
            first = false;
            res = write!(
                f,
                "{sep}{}={}/{}/{}",
                String::from_utf8_lossy(key),
                Decimal(agg.min as i64),
                Decimal(mean),
                Decimal(agg.max as i64),
            );
        });
        res?;
        f.write_str("}")
    }
}

pub fn format_results<S: AggregateStore>(store: &S) -> String {
    Report(store).to_string()
}
