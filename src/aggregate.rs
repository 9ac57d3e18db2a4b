use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::dataset::CaseRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub ubigeo: String,
    /// Sum of the group's present case counts; 0 when none are present.
    pub cases: f64,
    /// Arithmetic mean of the group's present populations.
    pub population: Option<f64>,
    /// cases / population * 1000. None when population is zero or missing.
    pub tia: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Tia,
    Cases,
    Population,
}

impl Metric {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "tia" => Some(Self::Tia),
            "casos" => Some(Self::Cases),
            "pobtot" => Some(Self::Population),
            _ => None,
        }
    }

    pub fn value(self, row: &AggregatedRow) -> Option<f64> {
        match self {
            Self::Tia => row.tia,
            Self::Cases => Some(row.cases),
            Self::Population => row.population,
        }
    }
}

/// Keep rows matching the year and diagnostic code exactly, group by
/// district code, sum cases and average population per group. Groups
/// come out in ascending UBIGEO order.
pub fn filter_and_aggregate(records: &[CaseRecord], year: i32, code: &str) -> Vec<AggregatedRow> {
    let mut groups: BTreeMap<&str, (f64, f64, u32)> = BTreeMap::new();
    for rec in records {
        if rec.year != Some(f64::from(year)) || rec.diagnostic.as_deref() != Some(code) {
            continue;
        }
        let entry = groups.entry(rec.ubigeo.as_str()).or_insert((0.0, 0.0, 0));
        if let Some(cases) = rec.cases {
            entry.0 += cases;
        }
        if let Some(population) = rec.population {
            entry.1 += population;
            entry.2 += 1;
        }
    }

    groups
        .into_iter()
        .map(|(ubigeo, (cases, population_sum, population_n))| {
            let population = (population_n > 0).then(|| population_sum / f64::from(population_n));
            let tia = match population {
                Some(p) if p != 0.0 => Some(cases / p * 1000.0),
                _ => None,
            };
            AggregatedRow {
                ubigeo: ubigeo.to_string(),
                cases,
                population,
                tia,
            }
        })
        .collect()
}

/// Sort descending by the chosen metric; rows without a value for it
/// sort last. Stable for ties.
pub fn rank_by_metric(mut rows: Vec<AggregatedRow>, metric: Metric) -> Vec<AggregatedRow> {
    rows.sort_by(|a, b| match (metric.value(a), metric.value(b)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    rows
}

/// Render aggregated rows as CSV in aggregation order. Fields are
/// numeric or fixed-format, so no quoting is needed; missing values
/// render as empty fields.
pub fn render_csv(year: i32, rows: &[AggregatedRow]) -> String {
    let mut out = String::from("ANO,UBIGEO,CASOS,POBTOT,TIA\n");
    for row in rows {
        out.push_str(&format!(
            "{year},{},{},{},{}\n",
            row.ubigeo,
            fmt_number(Some(row.cases)),
            fmt_number(row.population),
            fmt_number(row.tia)
        ));
    }
    out
}

fn fmt_number(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => String::new(),
    }
}
