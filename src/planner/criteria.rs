use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateGranularity {
    Year,
    Month,
    Day,
}

impl DateGranularity {
    /// chrono format for the directory segment.
    pub fn format(&self) -> &'static str {
        match self {
            DateGranularity::Year => "%Y",
            DateGranularity::Month => "%Y-%m",
            DateGranularity::Day => "%Y-%m-%d",
        }
    }
}

/// How GPS coordinates become a directory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationPolicy {
    /// Coordinates rounded to `decimals` places; each cell is a directory.
    Grid { decimals: u8 },
    /// Greedy proximity zones: a file joins the first zone whose seed lies
    /// within `radius_km`, otherwise it seeds a new zone.
    Cluster { radius_km: f64 },
}

pub const DEFAULT_GRID_DECIMALS: u8 = 2;
pub const DEFAULT_CLUSTER_RADIUS_KM: f64 = 1.0;
const MAX_GRID_DECIMALS: u8 = 6;

/// One layer of the destination hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Criterion {
    ByDate(DateGranularity),
    ByDevice,
    ByLocation(LocationPolicy),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCriterionError(String);

impl fmt::Display for ParseCriterionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid criterion '{}'", self.0)
    }
}

impl std::error::Error for ParseCriterionError {}

impl FromStr for Criterion {
    type Err = ParseCriterionError;

    /// `date[:year|month|day]`, `device`, `location[:grid[:N]|:cluster[:KM]]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCriterionError(s.to_string());
        let lower = s.trim().to_ascii_lowercase();
        let parts: Vec<&str> = lower.split(':').collect();

        match parts.as_slice() {
            ["date"] | ["date", "day"] | ["day"] => Ok(Criterion::ByDate(DateGranularity::Day)),
            ["date", "month"] | ["month"] => Ok(Criterion::ByDate(DateGranularity::Month)),
            ["date", "year"] | ["year"] => Ok(Criterion::ByDate(DateGranularity::Year)),
            ["device"] | ["camera"] => Ok(Criterion::ByDevice),
            ["location"] | ["location", "cluster"] => Ok(Criterion::ByLocation(
                LocationPolicy::Cluster {
                    radius_km: DEFAULT_CLUSTER_RADIUS_KM,
                },
            )),
            ["location", "grid"] => Ok(Criterion::ByLocation(LocationPolicy::Grid {
                decimals: DEFAULT_GRID_DECIMALS,
            })),
            ["location", "grid", n] => {
                let decimals: u8 = n.parse().map_err(|_| err())?;
                if decimals > MAX_GRID_DECIMALS {
                    return Err(err());
                }
                Ok(Criterion::ByLocation(LocationPolicy::Grid { decimals }))
            }
            ["location", "cluster", km] => {
                let radius_km: f64 = km.parse().map_err(|_| err())?;
                if !radius_km.is_finite() || radius_km <= 0.0 {
                    return Err(err());
                }
                Ok(Criterion::ByLocation(LocationPolicy::Cluster { radius_km }))
            }
            _ => Err(err()),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::ByDate(DateGranularity::Year) => f.write_str("date:year"),
            Criterion::ByDate(DateGranularity::Month) => f.write_str("date:month"),
            Criterion::ByDate(DateGranularity::Day) => f.write_str("date:day"),
            Criterion::ByDevice => f.write_str("device"),
            Criterion::ByLocation(LocationPolicy::Grid { decimals }) => {
                write!(f, "location:grid:{}", decimals)
            }
            Criterion::ByLocation(LocationPolicy::Cluster { radius_km }) => {
                write!(f, "location:cluster:{}", radius_km)
            }
        }
    }
}

impl TryFrom<String> for Criterion {
    type Error = ParseCriterionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Criterion> for String {
    fn from(value: Criterion) -> Self {
        value.to_string()
    }
}

/// Parse a comma separated criteria list, outermost first.
pub fn parse_criteria(list: &str) -> Result<Vec<Criterion>, ParseCriterionError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_forms() {
        assert_eq!(
            "date:day".parse::<Criterion>().unwrap(),
            Criterion::ByDate(DateGranularity::Day)
        );
        assert_eq!(
            "YEAR".parse::<Criterion>().unwrap(),
            Criterion::ByDate(DateGranularity::Year)
        );
        assert_eq!("device".parse::<Criterion>().unwrap(), Criterion::ByDevice);
        assert_eq!(
            "location:grid:3".parse::<Criterion>().unwrap(),
            Criterion::ByLocation(LocationPolicy::Grid { decimals: 3 })
        );
        assert_eq!(
            "location:cluster:1.5".parse::<Criterion>().unwrap(),
            Criterion::ByLocation(LocationPolicy::Cluster { radius_km: 1.5 })
        );
    }

    #[test]
    fn rejects_nonsense() {
        for bad in ["", "date:week", "location:grid:9", "location:cluster:-1", "colour"] {
            assert!(bad.parse::<Criterion>().is_err(), "{} parsed", bad);
        }
    }

    #[test]
    fn display_round_trips() {
        for s in ["date:month", "device", "location:grid:2", "location:cluster:2.5"] {
            assert_eq!(s.parse::<Criterion>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn criteria_list() {
        let list = parse_criteria("date:year, device ,location").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[1], Criterion::ByDevice);
    }

    #[test]
    fn deserializes_from_strings() {
        let parsed: Vec<Criterion> = serde_json::from_str(r#"["date:month","device"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![Criterion::ByDate(DateGranularity::Month), Criterion::ByDevice]
        );
    }
}
