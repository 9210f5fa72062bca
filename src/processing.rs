// src/processing.rs
// Turns stored snapshots into the series the dashboard draws:
// daily equity and PnL, weekly/monthly/quarterly rollups, the monthly
// returns heatmap and the per-strategy equity breakdown.

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{AccountSnapshot, TOTAL_ACCOUNT};

const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June",
    "July", "August", "September", "October", "November", "December",
];

/// One day of a strategy (or of the whole account)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub collateral: f64,
    /// End-of-day balance; equal to collateral
    pub equity: f64,
    pub total_pnl: f64,
    /// total_pnl - deposit
    pub net_pnl: f64,
    pub deposit: f64,
    pub withdrawal: f64,
    pub btc_pnl: f64,
    pub eth_pnl: f64,
    /// Running sum of net_pnl
    pub cum_pnl: f64,
}

/// One resampled period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodPoint {
    pub period_end: NaiveDate,
    pub label: String,
    pub equity: f64,
    pub total_pnl: f64,
    pub net_pnl: f64,
    pub deposit: f64,
    pub withdrawal: f64,
    pub btc_pnl: f64,
    pub eth_pnl: f64,
    pub cum_pnl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Weeks ending on Sunday
    Weekly,
    Monthly,
    Quarterly,
}

/// Which PnL column feeds the heatmap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnlColumn {
    TotalPnl,
    NetPnl,
}

impl PnlColumn {
    fn value(&self, point: &DailyPoint) -> f64 {
        match self {
            PnlColumn::TotalPnl => point.total_pnl,
            PnlColumn::NetPnl => point.net_pnl,
        }
    }
}

/// Monthly returns pivot: one row per year, one column per month present
///
/// `pnl[i][j]` and `pct[i][j]` belong to `years[i]` and `months[j]`;
/// `None` where that year has no data for the month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heatmap {
    pub years: Vec<i32>,
    pub months: Vec<&'static str>,
    pub pnl: Vec<Vec<Option<f64>>>,
    pub pct: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownPoint {
    pub date: NaiveDate,
    pub strategy: String,
    pub collateral: f64,
}

/// Headline numbers for the selected range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub current_balance: f64,
    pub pnl_since_start: f64,
    pub daily_pnl: f64,
}

/// Everything the dashboard shows for one (user, strategy, start) selection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub strategy: String,
    pub summary: Summary,
    pub daily: Vec<DailyPoint>,
    pub weekly: Vec<PeriodPoint>,
    pub monthly: Vec<PeriodPoint>,
    pub quarterly: Vec<PeriodPoint>,
    pub heatmap: Heatmap,
    /// Only filled for the Total_Account view
    pub breakdown: Option<Vec<BreakdownPoint>>,
}

/// Build the daily series of one strategy, or of every strategy summed per date
pub fn process_account_data(rows: &[AccountSnapshot], strategy: &str) -> Vec<DailyPoint> {
    let mut points: Vec<DailyPoint> = if strategy == TOTAL_ACCOUNT {
        let mut by_date: BTreeMap<NaiveDate, DailyPoint> = BTreeMap::new();
        for row in rows {
            let entry = by_date.entry(row.date).or_insert_with(|| empty_point(row.date));
            entry.collateral += row.collateral;
            entry.total_pnl += row.total_pnl;
            entry.deposit += row.deposit;
            entry.withdrawal += row.withdrawal;
            entry.btc_pnl += row.btc_pnl;
            entry.eth_pnl += row.eth_pnl;
        }
        by_date.into_values().collect()
    } else {
        rows.iter()
            .filter(|r| r.strategy == strategy)
            .map(|r| DailyPoint {
                collateral: r.collateral,
                total_pnl: r.total_pnl,
                deposit: r.deposit,
                withdrawal: r.withdrawal,
                btc_pnl: r.btc_pnl,
                eth_pnl: r.eth_pnl,
                ..empty_point(r.date)
            })
            .collect()
    };

    points.sort_by_key(|p| p.date);

    let mut cum = 0.0;
    for p in points.iter_mut() {
        p.equity = p.collateral;
        p.net_pnl = p.total_pnl - p.deposit;
        cum += p.net_pnl;
        p.cum_pnl = cum;
    }
    points
}

fn empty_point(date: NaiveDate) -> DailyPoint {
    DailyPoint {
        date,
        collateral: 0.0,
        equity: 0.0,
        total_pnl: 0.0,
        net_pnl: 0.0,
        deposit: 0.0,
        withdrawal: 0.0,
        btc_pnl: 0.0,
        eth_pnl: 0.0,
        cum_pnl: 0.0,
    }
}

/// Keep points on or after `start`, restarting cum_pnl at the first kept day
pub fn filter_from(points: &[DailyPoint], start: NaiveDate) -> Vec<DailyPoint> {
    let mut cum = 0.0;
    points
        .iter()
        .filter(|p| p.date >= start)
        .map(|p| {
            cum += p.net_pnl;
            DailyPoint { cum_pnl: cum, ..p.clone() }
        })
        .collect()
}

/// Roll daily points up into periods
///
/// Equity and cum_pnl take the last value of the period, flows are summed.
/// Only periods that contain data are emitted. Input must be sorted by date.
pub fn resample(points: &[DailyPoint], freq: Frequency) -> Vec<PeriodPoint> {
    let mut periods: Vec<PeriodPoint> = Vec::new();

    for p in points {
        let end = period_end(p.date, freq);
        match periods.last_mut() {
            Some(current) if current.period_end == end => {
                current.equity = p.equity;
                current.cum_pnl = p.cum_pnl;
                current.total_pnl += p.total_pnl;
                current.net_pnl += p.net_pnl;
                current.deposit += p.deposit;
                current.withdrawal += p.withdrawal;
                current.btc_pnl += p.btc_pnl;
                current.eth_pnl += p.eth_pnl;
            }
            _ => periods.push(PeriodPoint {
                period_end: end,
                label: period_label(end, freq),
                equity: p.equity,
                total_pnl: p.total_pnl,
                net_pnl: p.net_pnl,
                deposit: p.deposit,
                withdrawal: p.withdrawal,
                btc_pnl: p.btc_pnl,
                eth_pnl: p.eth_pnl,
                cum_pnl: p.cum_pnl,
            }),
        }
    }

    periods
}

/// Last day of the period containing `date`
pub fn period_end(date: NaiveDate, freq: Frequency) -> NaiveDate {
    match freq {
        Frequency::Weekly => {
            let days_to_sunday = 6 - date.weekday().num_days_from_monday() as i64;
            date + Duration::days(days_to_sunday)
        }
        Frequency::Monthly => month_end(date.year(), date.month()).unwrap_or(date),
        Frequency::Quarterly => {
            let last_month = (date.month0() / 3) * 3 + 3;
            month_end(date.year(), last_month).unwrap_or(date)
        }
    }
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)?
        .checked_add_months(Months::new(1))?
        .pred_opt()
}

fn period_label(end: NaiveDate, freq: Frequency) -> String {
    match freq {
        Frequency::Weekly => end.format("%Y-%m-%d").to_string(),
        Frequency::Monthly => end.format("%b %Y").to_string(),
        Frequency::Quarterly => format!("{}Q{}", end.year(), end.month0() / 3 + 1),
    }
}

/// Monthly PnL and percentage-return pivots
///
/// The return of a month is its PnL over the first collateral seen in that
/// month, in percent; 0 when that collateral is 0.
pub fn monthly_heatmap(points: &[DailyPoint], column: PnlColumn) -> Heatmap {
    // (year, month0) -> (pnl sum, first collateral)
    let mut stats: BTreeMap<(i32, u32), (f64, f64)> = BTreeMap::new();
    for p in points {
        let entry = stats.entry((p.date.year(), p.date.month0())).or_insert((0.0, p.collateral));
        entry.0 += column.value(p);
    }

    let mut years: Vec<i32> = stats.keys().map(|(y, _)| *y).collect();
    years.dedup();
    let mut month_idx: Vec<u32> = stats.keys().map(|(_, m)| *m).collect();
    month_idx.sort_unstable();
    month_idx.dedup();

    let mut pnl = Vec::with_capacity(years.len());
    let mut pct = Vec::with_capacity(years.len());
    for year in &years {
        let mut pnl_row = Vec::with_capacity(month_idx.len());
        let mut pct_row = Vec::with_capacity(month_idx.len());
        for month in &month_idx {
            match stats.get(&(*year, *month)) {
                Some((sum, first_collateral)) => {
                    pnl_row.push(Some(*sum));
                    let ret = if *first_collateral != 0.0 { sum / first_collateral * 100.0 } else { 0.0 };
                    pct_row.push(Some(ret));
                }
                None => {
                    pnl_row.push(None);
                    pct_row.push(None);
                }
            }
        }
        pnl.push(pnl_row);
        pct.push(pct_row);
    }

    Heatmap {
        years,
        months: month_idx.iter().map(|m| MONTH_NAMES[*m as usize]).collect(),
        pnl,
        pct,
    }
}

/// Collateral per strategy per date, from `start` on
pub fn strategy_breakdown(rows: &[AccountSnapshot], start: NaiveDate) -> Vec<BreakdownPoint> {
    let mut grouped: BTreeMap<(NaiveDate, &str), f64> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.date >= start) {
        *grouped.entry((row.date, row.strategy.as_str())).or_insert(0.0) += row.collateral;
    }

    grouped
        .into_iter()
        .map(|((date, strategy), collateral)| BreakdownPoint {
            date,
            strategy: strategy.to_string(),
            collateral,
        })
        .collect()
}

/// Headline numbers, or None when there is nothing to summarize
pub fn summary(points: &[DailyPoint]) -> Option<Summary> {
    let first = points.first()?;
    let last = points.last()?;
    Some(Summary {
        start: first.date,
        end: last.date,
        current_balance: last.equity,
        pnl_since_start: points.iter().map(|p| p.net_pnl).sum(),
        daily_pnl: last.net_pnl,
    })
}

/// Strategy selector entries: Total_Account first, then the stored strategies sorted
pub fn strategy_options(rows: &[AccountSnapshot]) -> Vec<String> {
    let mut names: Vec<String> = rows.iter().map(|r| r.strategy.clone()).collect();
    names.sort();
    names.dedup();
    let mut options = Vec::with_capacity(names.len() + 1);
    options.push(TOTAL_ACCOUNT.to_string());
    options.extend(names);
    options
}

/// Parse a `YYYY-MM` start selection into the first day of that month
pub fn parse_start_month(raw: &str) -> Result<NaiveDate, String> {
    let (year, month) = raw
        .trim()
        .split_once('-')
        .ok_or_else(|| format!("Invalid start '{}': expected YYYY-MM", raw))?;
    let year: i32 = year.parse().map_err(|_| format!("Invalid start year '{}'", year))?;
    let month: u32 = month.parse().map_err(|_| format!("Invalid start month '{}'", month))?;
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| format!("Invalid start '{}'", raw))
}

/// Assemble the whole dashboard, or None when the selection has no data
///
/// Without `start` the view begins on the first month with data.
pub fn build_dashboard(rows: &[AccountSnapshot], strategy: &str, start: Option<NaiveDate>) -> Option<Dashboard> {
    let processed = process_account_data(rows, strategy);
    let start = match start {
        Some(s) => s,
        None => {
            let first = processed.first()?.date;
            NaiveDate::from_ymd_opt(first.year(), first.month(), 1)?
        }
    };

    let daily = filter_from(&processed, start);
    let summary = summary(&daily)?;

    let breakdown = if strategy == TOTAL_ACCOUNT {
        Some(strategy_breakdown(rows, start))
    } else {
        None
    };

    Some(Dashboard {
        strategy: strategy.to_string(),
        summary,
        weekly: resample(&daily, Frequency::Weekly),
        monthly: resample(&daily, Frequency::Monthly),
        quarterly: resample(&daily, Frequency::Quarterly),
        heatmap: monthly_heatmap(&daily, PnlColumn::NetPnl),
        breakdown,
        daily,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(date: NaiveDate, strategy: &str, collateral: f64, total_pnl: f64, deposit: f64) -> AccountSnapshot {
        AccountSnapshot {
            collateral,
            total_pnl,
            deposit,
            ..AccountSnapshot::new(date, strategy, "u")
        }
    }

    fn sample() -> Vec<AccountSnapshot> {
        vec![
            row(day(2024, 1, 30), "HL", 1000.0, 10.0, 0.0),
            row(day(2024, 1, 30), "Bitget", 500.0, -5.0, 0.0),
            row(day(2024, 1, 31), "HL", 1100.0, 100.0, 50.0),
            row(day(2024, 2, 1), "HL", 1120.0, 20.0, 0.0),
            row(day(2024, 2, 1), "Bitget", 510.0, 10.0, 0.0),
        ]
    }

    // =========================================================================
    // Test Suite: Daily Processing
    // =========================================================================

    #[test]
    fn test_total_account_sums_per_date() {
        let points = process_account_data(&sample(), TOTAL_ACCOUNT);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].date, day(2024, 1, 30));
        assert_eq!(points[0].equity, 1500.0);
        assert_eq!(points[0].net_pnl, 5.0);
        assert_eq!(points[1].net_pnl, 50.0);
        assert_eq!(points[2].equity, 1630.0);
        assert_eq!(points[2].cum_pnl, 85.0);
    }

    #[test]
    fn test_single_strategy_is_filtered_and_sorted() {
        let mut rows = sample();
        rows.reverse();
        let points = process_account_data(&rows, "HL");
        let dates: Vec<NaiveDate> = points.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![day(2024, 1, 30), day(2024, 1, 31), day(2024, 2, 1)]);
        assert_eq!(points[2].cum_pnl, 10.0 + 50.0 + 20.0);
    }

    #[test]
    fn test_unknown_strategy_is_empty() {
        assert!(process_account_data(&sample(), "Deribit").is_empty());
        assert!(process_account_data(&[], TOTAL_ACCOUNT).is_empty());
    }

    #[test]
    fn test_filter_from_restarts_cumulative_pnl() {
        let points = process_account_data(&sample(), TOTAL_ACCOUNT);
        let filtered = filter_from(&points, day(2024, 1, 31));
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].cum_pnl, 50.0);
        assert_eq!(filtered[1].cum_pnl, 80.0);
        let total: f64 = filtered.iter().map(|p| p.net_pnl).sum();
        assert_eq!(filtered.last().unwrap().cum_pnl, total);
    }

    // =========================================================================
    // Test Suite: Resampling
    // =========================================================================

    #[test]
    fn test_period_end() {
        // 2024-01-31 is a Wednesday
        assert_eq!(period_end(day(2024, 1, 31), Frequency::Weekly), day(2024, 2, 4));
        assert_eq!(period_end(day(2024, 2, 4), Frequency::Weekly), day(2024, 2, 4));
        assert_eq!(period_end(day(2024, 2, 10), Frequency::Monthly), day(2024, 2, 29));
        assert_eq!(period_end(day(2024, 12, 3), Frequency::Monthly), day(2024, 12, 31));
        assert_eq!(period_end(day(2024, 5, 3), Frequency::Quarterly), day(2024, 6, 30));
        assert_eq!(period_end(day(2024, 11, 3), Frequency::Quarterly), day(2024, 12, 31));
    }

    #[test]
    fn test_resample_monthly() {
        let points = process_account_data(&sample(), TOTAL_ACCOUNT);
        let monthly = resample(&points, Frequency::Monthly);
        assert_eq!(monthly.len(), 2);

        assert_eq!(monthly[0].label, "Jan 2024");
        assert_eq!(monthly[0].equity, 1100.0, "last day of January");
        assert_eq!(monthly[0].net_pnl, 55.0);
        assert_eq!(monthly[0].deposit, 50.0);
        assert_eq!(monthly[0].cum_pnl, 55.0);

        assert_eq!(monthly[1].label, "Feb 2024");
        assert_eq!(monthly[1].period_end, day(2024, 2, 29));
        assert_eq!(monthly[1].cum_pnl, 85.0);
    }

    #[test]
    fn test_resample_weekly_and_quarterly_labels() {
        let points = process_account_data(&sample(), TOTAL_ACCOUNT);

        let weekly = resample(&points, Frequency::Weekly);
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].label, "2024-02-04");
        assert_eq!(weekly[0].net_pnl, 85.0);

        let quarterly = resample(&points, Frequency::Quarterly);
        assert_eq!(quarterly.len(), 1);
        assert_eq!(quarterly[0].label, "2024Q1");
    }

    #[test]
    fn test_resample_skips_empty_periods() {
        let rows = vec![
            row(day(2024, 1, 15), "HL", 100.0, 1.0, 0.0),
            row(day(2024, 4, 15), "HL", 100.0, 1.0, 0.0),
        ];
        let points = process_account_data(&rows, "HL");
        let monthly = resample(&points, Frequency::Monthly);
        let labels: Vec<&str> = monthly.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["Jan 2024", "Apr 2024"]);
    }

    // =========================================================================
    // Test Suite: Heatmap and Breakdown
    // =========================================================================

    #[test]
    fn test_monthly_heatmap() {
        let rows = vec![
            row(day(2023, 12, 5), "HL", 1000.0, 100.0, 0.0),
            row(day(2024, 2, 1), "HL", 0.0, 30.0, 0.0),
            row(day(2024, 3, 1), "HL", 2000.0, 50.0, 0.0),
            row(day(2024, 3, 2), "HL", 2050.0, -10.0, 0.0),
        ];
        let points = process_account_data(&rows, "HL");
        let heatmap = monthly_heatmap(&points, PnlColumn::TotalPnl);

        assert_eq!(heatmap.years, vec![2023, 2024]);
        assert_eq!(heatmap.months, vec!["February", "March", "December"]);
        assert_eq!(heatmap.pnl[0], vec![None, None, Some(100.0)]);
        assert_eq!(heatmap.pct[0][2], Some(10.0));
        assert_eq!(heatmap.pnl[1], vec![Some(30.0), Some(40.0), None]);
        assert_eq!(heatmap.pct[1][0], Some(0.0), "zero collateral gives zero return");
        assert!((heatmap.pct[1][1].unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_heatmap_empty() {
        let heatmap = monthly_heatmap(&[], PnlColumn::NetPnl);
        assert!(heatmap.years.is_empty());
        assert!(heatmap.months.is_empty());
    }

    #[test]
    fn test_strategy_breakdown() {
        let breakdown = strategy_breakdown(&sample(), day(2024, 1, 31));
        assert_eq!(breakdown.len(), 3);
        assert_eq!(breakdown[0].date, day(2024, 1, 31));
        assert_eq!(breakdown[0].strategy, "HL");
        assert_eq!(breakdown[1].strategy, "Bitget");
        assert_eq!(breakdown[1].collateral, 510.0);
    }

    // =========================================================================
    // Test Suite: Summary and Dashboard
    // =========================================================================

    #[test]
    fn test_summary() {
        let points = process_account_data(&sample(), TOTAL_ACCOUNT);
        let s = summary(&points).unwrap();
        assert_eq!(s.current_balance, 1630.0);
        assert_eq!(s.pnl_since_start, 85.0);
        assert_eq!(s.daily_pnl, 30.0);
        assert!(summary(&[]).is_none());
    }

    #[test]
    fn test_strategy_options() {
        assert_eq!(strategy_options(&sample()), vec!["Total_Account", "Bitget", "HL"]);
        assert_eq!(strategy_options(&[]), vec!["Total_Account"]);
    }

    #[test]
    fn test_parse_start_month() {
        assert_eq!(parse_start_month("2024-03").unwrap(), day(2024, 3, 1));
        assert!(parse_start_month("2024").is_err());
        assert!(parse_start_month("2024-13").is_err());
        assert!(parse_start_month("abcd-01").is_err());
    }

    #[test]
    fn test_build_dashboard() {
        let dash = build_dashboard(&sample(), TOTAL_ACCOUNT, Some(day(2024, 2, 1))).unwrap();
        assert_eq!(dash.daily.len(), 1);
        assert_eq!(dash.summary.pnl_since_start, 30.0);
        assert_eq!(dash.monthly.len(), 1);
        assert_eq!(dash.breakdown.as_ref().unwrap().len(), 2);

        let hl = build_dashboard(&sample(), "HL", None).unwrap();
        assert_eq!(hl.summary.start, day(2024, 1, 30));
        assert!(hl.breakdown.is_none());

        assert!(build_dashboard(&sample(), TOTAL_ACCOUNT, Some(day(2025, 1, 1))).is_none());
        assert!(build_dashboard(&[], TOTAL_ACCOUNT, None).is_none());
    }
}
