use crate::error::{Error, Result};
use crate::store::AggregateStore;

/// A measurement in integer tenths: `-12.3` is `-123`.
pub type Tenths = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub count: u64,
    pub sum: i64,
    pub min: Tenths,
    pub max: Tenths,
}

impl Aggregate {
    #[inline]
    pub fn new(num: Tenths) -> Self {
        Self {
            count: 1,
            sum: num as i64,
            min: num,
            max: num,
        }
    }

    #[inline]
    pub fn insert(&mut self, num: Tenths) {
        self.count += 1;
        self.sum += num as i64;
        self.min = self.min.min(num);
        self.max = self.max.max(num);
    }

    #[inline]
    pub fn merge(&mut self, other: Aggregate) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Mean in tenths, rounded half toward positive infinity.
    ///
    /// `None` for an entry that never saw a value.
    pub fn mean(&self) -> Option<i64> {
        if self.count == 0 {
            return None;
        }
        let count = self.count as i64;
        Some((2 * self.sum + count).div_euclid(2 * count))
    }
}

impl Default for Aggregate {
    // identity for `merge`: min/max start at the opposite extremes
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0,
            min: Tenths::MAX,
            max: Tenths::MIN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ParsingKey,
    ParsingValue,
}

// welcome to my janky custom float-to-integer parser! it only accepts values formatted exactly
// like `-?\d{1,2}\.\d`, and since there's always exactly one fractional digit, accumulating the
// digits while skipping the dot already gives us tenths.
#[derive(Debug, Default)]
struct ValueScanner {
    temp: Tenths,
    negative: bool,
    int_digits: u8,
    frac_digits: u8,
    seen_dot: bool,
    seen_any: bool,
}

impl ValueScanner {
    #[inline]
    fn push(&mut self, c: u8) -> std::result::Result<(), &'static str> {
        let first = !self.seen_any;
        self.seen_any = true;
        match c {
            b'-' if first => self.negative = true,
            b'-' => return Err("'-' is only allowed as the first character of a value"),
            b'0'..=b'9' => {
                if self.seen_dot {
                    if self.frac_digits == 1 {
                        return Err("more than one fractional digit");
                    }
                    self.frac_digits += 1;
                } else {
                    if self.int_digits == 2 {
                        return Err("more than two integer digits");
                    }
                    self.int_digits += 1;
                }
                self.temp = self.temp * 10 + (c - b'0') as Tenths;
            }
            b'.' if self.seen_dot => return Err("more than one '.'"),
            b'.' if self.int_digits == 0 => return Err("missing integer digit before '.'"),
            b'.' => self.seen_dot = true,
            _ => return Err("unexpected byte in value"),
        }
        Ok(())
    }

    #[inline]
    fn finish(&self) -> std::result::Result<Tenths, &'static str> {
        if !self.seen_dot || self.frac_digits != 1 {
            return Err("value must have exactly one fractional digit");
        }
        Ok(if self.negative { -self.temp } else { self.temp })
    }
}

/// Parses every record in `chunk` and folds it into `totals`.
///
/// The chunk has to be record-aligned: it starts at the beginning of a record and its last byte is
/// a `\n`. Anything off-grammar fails the whole chunk; nothing parsed so far is rolled back, since
/// the caller is going to throw the whole run away anyway.
pub fn process_chunk<S: AggregateStore>(chunk: &[u8], totals: &mut S) -> Result<()> {
    let mut state = State::ParsingKey;
    let mut record_start = 0;
    let mut key_end = 0;
    let mut value = ValueScanner::default();

    for (i, &c) in chunk.iter().enumerate() {
        match state {
            State::ParsingKey => match c {
                b';' => {
                    key_end = i;
                    value = ValueScanner::default();
                    state = State::ParsingValue;
                }
                b'\n' => return Err(malformed(chunk, record_start, "missing ';' delimiter")),
                _ => {}
            },
            State::ParsingValue => {
                if c == b'\n' {
                    let temp = value
                        .finish()
                        .map_err(|reason| malformed(chunk, record_start, reason))?;
                    totals.record(&chunk[record_start..key_end], temp);
                    record_start = i + 1;
                    state = State::ParsingKey;
                } else {
                    value
                        .push(c)
                        .map_err(|reason| malformed(chunk, record_start, reason))?;
                }
            }
        }
    }

    if state == State::ParsingValue || record_start != chunk.len() {
        return Err(malformed(chunk, record_start, "unterminated record"));
    }
    Ok(())
}

fn malformed(chunk: &[u8], start: usize, reason: &'static str) -> Error {
    let end = memchr::memchr(b'\n', &chunk[start..]).map_or(chunk.len(), |p| start + p);
    Error::MalformedRecord {
        offset: start,
        record: String::from_utf8_lossy(&chunk[start..end]).into_owned(),
        reason,
    }
}
