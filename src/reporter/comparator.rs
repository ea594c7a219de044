use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{
    balance::{BalanceComparison, BalanceKind, BalanceRecord, Change, ChangeStats, ComparisonRecord},
    ledger::RunLedger,
    report::{PriorBalance, ResultsStore},
    run::RunContext,
};

/// A previous run together with the balances it stored.
pub struct PriorRun {
    pub timestamp: DateTime<Utc>,
    pub balances: HashMap<String, PriorBalance>,
}

pub struct Comparator<'a, L, S> {
    ledger: &'a L,
    results: &'a S,
}

impl<'a, L: RunLedger, S: ResultsStore> Comparator<'a, L, S> {
    pub fn new(ledger: &'a L, results: &'a S) -> Self {
        Self { ledger, results }
    }

    /// Anything that keeps us from reading the previous run degrades the comparison to "no prior
    /// data", it never fails it.
    async fn load_prior_run(&self) -> Option<PriorRun> {
        let last_run = match self.ledger.get_last_run().await {
            Ok(Some(last_run)) => last_run,
            Ok(None) => {
                info!("no previous run found, only current balances will be included");
                return None;
            }
            Err(err) => {
                warn!(?err, "failed to read last run, comparing without previous balances");
                return None;
            }
        };

        match self.results.load_results(&last_run.results_location).await {
            Ok(balances) => Some(PriorRun {
                timestamp: last_run.timestamp,
                balances,
            }),
            Err(err) => {
                warn!(
                    ?err,
                    location = last_run.results_location,
                    "failed to read previous results, comparing without previous balances"
                );
                None
            }
        }
    }

    pub async fn compare(
        &self,
        current: &[BalanceRecord],
        ctx: &RunContext,
    ) -> (Vec<ComparisonRecord>, ChangeStats) {
        let prior = self.load_prior_run().await;
        compare_with_prior(current, prior.as_ref(), ctx.started_at)
    }
}

pub fn compare_with_prior(
    current: &[BalanceRecord],
    prior: Option<&PriorRun>,
    current_run: DateTime<Utc>,
) -> (Vec<ComparisonRecord>, ChangeStats) {
    let mut stats = ChangeStats {
        total_addresses: current.len(),
        previous_run: prior.map(|prior| prior.timestamp),
        current_run,
        ..ChangeStats::default()
    };

    let records = current
        .iter()
        .map(|record| {
            let previous = prior.and_then(|prior| prior.balances.get(&record.address));

            let native = BalanceComparison::new(
                previous.and_then(|p| p.native.clone()),
                record.balance(BalanceKind::Native).cloned(),
            );
            let token = BalanceComparison::new(
                previous.and_then(|p| p.token.clone()),
                record.balance(BalanceKind::Token).cloned(),
            );

            match (record.native.is_ok(), record.token.is_ok()) {
                (true, true) => stats.both_succeeded += 1,
                (true, false) => stats.native_only += 1,
                (false, true) => stats.token_only += 1,
                (false, false) => stats.neither += 1,
            }
            if native.changed == Change::Changed {
                stats.native_changes += 1;
            }
            if token.changed == Change::Changed {
                stats.token_changes += 1;
            }

            ComparisonRecord {
                address: record.address.clone(),
                native,
                token,
            }
        })
        .collect();

    (records, stats)
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, sync::Mutex, time::Duration};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::reporter::{fetcher::FetchError, ledger::RunRecord};

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn record(address: &str, native: Option<&str>, token: Option<&str>) -> BalanceRecord {
        let to_result = |value: Option<&str>| {
            value.map(dec).ok_or(FetchError::Protocol {
                code: -32000,
                message: "unavailable".to_string(),
            })
        };
        BalanceRecord {
            address: address.to_string(),
            native: to_result(native),
            token: to_result(token),
            observed_at: Utc::now(),
        }
    }

    fn prior(balances: Vec<(&str, Option<&str>, Option<&str>)>) -> PriorRun {
        PriorRun {
            timestamp: "2024-06-01T10:00:00Z".parse().unwrap(),
            balances: balances
                .into_iter()
                .map(|(address, native, token)| {
                    (
                        address.to_string(),
                        PriorBalance {
                            native: native.map(dec),
                            token: token.map(dec),
                        },
                    )
                })
                .collect(),
        }
    }

    fn now() -> DateTime<Utc> {
        "2024-06-01T11:00:00Z".parse().unwrap()
    }

    #[test]
    fn first_run_is_not_applicable_test() {
        let current = vec![record("A", Some("1"), Some("2")), record("B", None, Some("3"))];

        let (records, stats) = compare_with_prior(&current, None, now());

        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.native.changed, Change::NotApplicable);
            assert_eq!(record.token.changed, Change::NotApplicable);
            assert_eq!(record.native.delta, None);
            assert_eq!(record.token.delta, None);
            assert_eq!(record.native.previous, None);
        }
        assert_eq!(stats.previous_run, None);
        assert_eq!(stats.native_changes, 0);
        assert_eq!(stats.token_changes, 0);
    }

    #[test]
    fn identical_balances_are_unchanged_test() {
        let current = vec![record("A", Some("2.5"), Some("10"))];
        let prior = prior(vec![("A", Some("2.500000000"), Some("10"))]);

        let (records, stats) = compare_with_prior(&current, Some(&prior), now());

        assert_eq!(records[0].native.changed, Change::Unchanged);
        assert_eq!(records[0].token.changed, Change::Unchanged);
        assert_eq!(records[0].native.delta, Some(dec("0")));
        assert_eq!(records[0].token.delta, Some(dec("0")));
        assert_eq!(stats.native_changes, 0);
        assert_eq!(stats.token_changes, 0);
    }

    #[test]
    fn detects_smallest_change_test() {
        let current = vec![record("A", Some("2.500000001"), Some("10"))];
        let prior = prior(vec![("A", Some("2.5"), Some("12.25"))]);

        let (records, stats) = compare_with_prior(&current, Some(&prior), now());

        assert_eq!(records[0].native.changed, Change::Changed);
        assert_eq!(records[0].native.delta, Some(dec("0.000000001")));
        assert_eq!(records[0].token.delta, Some(dec("-2.25")));
        assert_eq!(stats.native_changes, 1);
        assert_eq!(stats.token_changes, 1);
        assert_eq!(stats.previous_run, Some(prior.timestamp));
        assert_eq!(stats.current_run, now());
    }

    #[test]
    fn missing_sides_are_not_applicable_test() {
        let current = vec![
            // failed now, known before
            record("A", None, Some("1")),
            // new address
            record("B", Some("1"), Some("1")),
        ];
        let prior = prior(vec![("A", Some("5"), None)]);

        let (records, _) = compare_with_prior(&current, Some(&prior), now());
        let by_address: HashMap<_, _> = records.iter().map(|r| (r.address.as_str(), r)).collect();

        let a = by_address["A"];
        assert_eq!(a.native.previous, Some(dec("5")));
        assert_eq!(a.native.current, None);
        assert_eq!(a.native.changed, Change::NotApplicable);
        assert_eq!(a.token.previous, None);
        assert_eq!(a.token.changed, Change::NotApplicable);

        let b = by_address["B"];
        assert_eq!(b.native.changed, Change::NotApplicable);
        assert_eq!(b.token.changed, Change::NotApplicable);
    }

    #[test]
    fn tallies_fetch_outcomes_test() {
        let current = vec![
            record("A", Some("2.5"), None),
            record("B", None, Some("10")),
            record("C", Some("1"), Some("1")),
            record("D", None, None),
            record("E", Some("1"), Some("1")),
        ];

        let (_, stats) = compare_with_prior(&current, None, now());

        assert_eq!(stats.total_addresses, 5);
        assert_eq!(stats.native_only, 1);
        assert_eq!(stats.token_only, 1);
        assert_eq!(stats.both_succeeded, 2);
        assert_eq!(stats.neither, 1);
    }

    struct FakeLedger {
        last_run: Result<Option<RunRecord>, String>,
    }

    #[async_trait]
    impl RunLedger for FakeLedger {
        async fn get_last_run(&self) -> Result<Option<RunRecord>> {
            self.last_run.clone().map_err(|err| anyhow!(err))
        }

        async fn update_last_run(&self, _: &DateTime<Utc>, _: &str) -> Result<()> {
            unreachable!("the comparator never writes the ledger")
        }
    }

    #[derive(Default)]
    struct FakeResults {
        stored: HashMap<String, HashMap<String, PriorBalance>>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResultsStore for FakeResults {
        async fn load_results(&self, location: &str) -> Result<HashMap<String, PriorBalance>> {
            self.requested.lock().unwrap().push(location.to_string());
            self.stored
                .get(location)
                .cloned()
                .ok_or_else(|| anyhow!("no such report {}", location))
        }
    }

    fn run_context() -> RunContext {
        RunContext::new(&CancellationToken::new(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn compares_against_ledger_location_test() {
        let ledger = FakeLedger {
            last_run: Ok(Some(RunRecord {
                timestamp: "2024-06-01T10:00:00Z".parse().unwrap(),
                results_location: "reports/previous.csv".to_string(),
            })),
        };
        let results = FakeResults {
            stored: HashMap::from([(
                "reports/previous.csv".to_string(),
                prior(vec![("A", Some("1"), Some("1"))]).balances,
            )]),
            ..FakeResults::default()
        };
        let comparator = Comparator::new(&ledger, &results);

        let current = vec![record("A", Some("2"), Some("1"))];
        let (records, stats) = comparator.compare(&current, &run_context()).await;

        assert_eq!(
            *results.requested.lock().unwrap(),
            vec!["reports/previous.csv".to_string()]
        );
        assert_eq!(records[0].native.changed, Change::Changed);
        assert_eq!(records[0].token.changed, Change::Unchanged);
        assert_eq!(stats.native_changes, 1);
        assert!(stats.previous_run.is_some());
    }

    #[tokio::test]
    async fn unreadable_prior_results_degrade_test() {
        let ledger = FakeLedger {
            last_run: Ok(Some(RunRecord {
                timestamp: "2024-06-01T10:00:00Z".parse().unwrap(),
                results_location: "reports/deleted.csv".to_string(),
            })),
        };
        let results = FakeResults::default();
        let comparator = Comparator::new(&ledger, &results);

        let current = vec![record("A", Some("2"), Some("1"))];
        let (records, stats) = comparator.compare(&current, &run_context()).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].native.changed, Change::NotApplicable);
        assert_eq!(records[0].token.changed, Change::NotApplicable);
        assert_eq!(stats.previous_run, None);
    }

    #[tokio::test]
    async fn ledger_failure_degrades_test() {
        let ledger = FakeLedger {
            last_run: Err("database is locked".to_string()),
        };
        let results = FakeResults::default();
        let comparator = Comparator::new(&ledger, &results);

        let current = vec![record("A", Some("2"), None)];
        let (records, stats) = comparator.compare(&current, &run_context()).await;

        assert_eq!(records[0].native.changed, Change::NotApplicable);
        assert_eq!(stats.native_only, 1);
        assert!(results.requested.lock().unwrap().is_empty());
    }
}
