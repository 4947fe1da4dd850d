use std::fmt;
use std::str::FromStr;

use time::{Date, Month};

/// The first calendar day Wikidata has any revisions for. Global-stream months
/// are partitioned starting here (see `global_stream`).
pub const WIKIDATA_INCEPTION_DATE: Date = match Date::from_calendar_date(2012, Month::October, 29) {
    Ok(d) => d,
    Err(_) => unreachable!(),
};

/// "YYYY-MM" utility with safe arithmetic and ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u8, // 1..=12
}

impl YearMonth {
    pub fn new(year: i32, month: u8) -> Self {
        assert!((1..=12).contains(&month), "Month must be 1..=12");
        Self { year, month }
    }

    /// The month containing `date`.
    pub fn from_date(date: Date) -> Self {
        Self { year: date.year(), month: date.month() as u8 }
    }

    /// The first day of this calendar month.
    pub fn first_day(self) -> Date {
        Date::from_calendar_date(self.year, month_from_u8(self.month), 1)
            .expect("valid year/month/1 is always a valid date")
    }

    /// The last day of this calendar month.
    pub fn last_day(self) -> Date {
        self.next().first_day().previous_day().expect("not at Date::MIN")
    }

    pub fn next(self) -> Self {
        if self.month < 12 {
            Self { year: self.year, month: self.month + 1 }
        } else {
            Self { year: self.year + 1, month: 1 }
        }
    }

    pub fn prev(self) -> Self {
        if self.month > 1 {
            Self { year: self.year, month: self.month - 1 }
        } else {
            Self { year: self.year - 1, month: 12 }
        }
    }
}

fn month_from_u8(m: u8) -> Month {
    Month::January.nth_next(m - 1)
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err("expected YYYYMM".into());
        }
        let year: i32 = s[..4].parse().map_err(|_| "invalid year")?;
        let month: u8 = s[4..6].parse().map_err(|_| "invalid month")?;
        if !(1..=12).contains(&month) {
            return Err("month must be 01..12".into());
        }
        Ok(Self { year, month })
    }
}

/// Inclusive iteration from `start` to `end` (if `start` <= `end`), else empty.
pub fn iter_year_months(start: YearMonth, end: YearMonth) -> impl Iterator<Item = YearMonth> {
    let mut curr = if start <= end { Some(start) } else { None };
    std::iter::from_fn(move || {
        let ret = curr?;
        curr = Some(ret.next()).filter(|n| *n <= end);
        Some(ret)
    })
}

/// Inclusive iteration over every calendar day from `start` to `end`.
pub fn iter_days(start: Date, end: Date) -> impl Iterator<Item = Date> {
    let mut curr = if start <= end { Some(start) } else { None };
    std::iter::from_fn(move || {
        let ret = curr?;
        curr = ret.next_day().filter(|n| *n <= end);
        Some(ret)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_month_roundtrip() {
        let ym = YearMonth::new(2021, 6);
        assert_eq!(ym.to_string(), "202106");
        assert_eq!(ym, "202106".parse().unwrap());
    }

    #[test]
    fn year_month_next_prev() {
        let dec = YearMonth::new(2021, 12);
        assert_eq!(dec.next(), YearMonth::new(2022, 1));
        let jan = YearMonth::new(2022, 1);
        assert_eq!(jan.prev(), YearMonth::new(2021, 12));
    }

    #[test]
    fn first_last_day() {
        let ym = YearMonth::new(2021, 2);
        assert_eq!(ym.first_day(), Date::from_calendar_date(2021, Month::February, 1).unwrap());
        assert_eq!(ym.last_day(), Date::from_calendar_date(2021, Month::February, 28).unwrap());
    }

    #[test]
    fn inception_month() {
        assert_eq!(YearMonth::from_date(WIKIDATA_INCEPTION_DATE), YearMonth::new(2012, 10));
    }
}
