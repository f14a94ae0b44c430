use crate::domain::calendar_index::DateCount;
use crate::domain::color_scale::Intensity;
use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

pub const DAYS_PER_WEEK: usize = 7;
const MIN_YEAR_WEEKS: usize = 53;
/// Trailing grids cover at most a year's width of weeks.
pub const MAX_TRAILING_WEEKS: u32 = 53;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GridMode {
    /// Today's calendar month, padded out to whole weeks.
    Month,
    /// A whole calendar year, never narrower than 53 weeks.
    Year { year: i32 },
    /// The last `weeks` weeks, ending with the week that holds today.
    /// Clamped to `1..=MAX_TRAILING_WEEKS`.
    Trailing { weeks: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRequest {
    pub today: NaiveDate,
    pub week_start: Weekday,
    pub mode: GridMode,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct HeatmapCell {
    /// `None` marks a padding cell outside the requested range; renderers skip it.
    pub date: Option<NaiveDate>,
    pub count: u32,
    pub is_today: bool,
}

impl HeatmapCell {
    pub fn is_suppressed(&self) -> bool {
        self.date.is_none()
    }

    pub fn intensity(&self) -> Intensity {
        Intensity::for_count(self.count)
    }
}

pub type Week = [HeatmapCell; DAYS_PER_WEEK];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HeatmapGrid {
    pub week_start: Weekday,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub weeks: Vec<Week>,
}

impl HeatmapGrid {
    pub fn num_weeks(&self) -> usize {
        self.weeks.len()
    }

    pub fn in_range_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.weeks
            .iter()
            .flat_map(|week| week.iter())
            .filter_map(|cell| cell.date)
    }

    pub fn total_count(&self) -> u64 {
        self.weeks
            .iter()
            .flat_map(|week| week.iter())
            .map(|cell| u64::from(cell.count))
            .sum()
    }
}

pub fn build_grid(request: &GridRequest, counts: &DateCount) -> HeatmapGrid {
    let (range_start, range_end, min_weeks) = resolve_range(request);
    let grid_start = week_start_on_or_before(range_start, request.week_start);

    let covered_days = (range_end - grid_start).num_days().max(0) as usize + 1;
    let num_weeks = covered_days.div_ceil(DAYS_PER_WEEK).max(min_weeks);

    let weeks = (0..num_weeks)
        .map(|week_index| {
            std::array::from_fn(|day_index| {
                let offset = (week_index * DAYS_PER_WEEK + day_index) as u64;
                let day = plus_days(grid_start, offset);
                if day < range_start || day > range_end {
                    return HeatmapCell::default();
                }
                HeatmapCell {
                    date: Some(day),
                    count: counts.get(&day).copied().unwrap_or(0),
                    is_today: day == request.today,
                }
            })
        })
        .collect();

    HeatmapGrid {
        week_start: request.week_start,
        range_start,
        range_end,
        weeks,
    }
}

/// The inclusive date range a mode covers, and the minimum grid width.
fn resolve_range(request: &GridRequest) -> (NaiveDate, NaiveDate, usize) {
    let today = request.today;
    match request.mode {
        GridMode::Month => {
            let first = today.with_day(1).unwrap_or(today);
            let last = first
                .checked_add_months(Months::new(1))
                .and_then(|next| next.pred_opt())
                .unwrap_or(today);
            (first, last, 1)
        }
        GridMode::Year { year } => {
            let first = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(today);
            let last = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today);
            (first, last, MIN_YEAR_WEEKS)
        }
        GridMode::Trailing { weeks } => {
            let weeks = u64::from(weeks.clamp(1, MAX_TRAILING_WEEKS));
            let anchor_week = week_start_on_or_before(today, request.week_start);
            let first = minus_days(anchor_week, (weeks - 1) * DAYS_PER_WEEK as u64);
            (first, today, 1)
        }
    }
}

pub fn week_start_on_or_before(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let offset = (date.weekday().num_days_from_monday() + 7 - week_start.num_days_from_monday()) % 7;
    minus_days(date, u64::from(offset))
}

fn plus_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}

fn minus_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}
