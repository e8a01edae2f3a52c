//! Redundant-input voting.
//!
//! A merge context fuses up to eight input signals into one canonical output
//! signal. Inputs that are stale or carry a status at or above Error are
//! excluded from the vote; losing any declared input joins Timeout into the
//! output. A configurable tolerance turns disagreement between the surviving
//! inputs into an Inconsistent status without discarding the result.

use heapless::Vec;

use crate::engine::config::{MergeConfig, MergeMethod};
use crate::engine::signal::{SignalBank, Status};
use crate::MAX_MERGE_INPUTS;

pub(crate) struct MergeOutcome {
    /// The voted value; `None` when no input qualified.
    pub value: Option<i32>,
    /// Join of the qualifying inputs plus quorum/tolerance penalties.
    pub status: Status,
    pub inconsistent: bool,
}

pub(crate) fn evaluate(
    config: &MergeConfig,
    bank: &SignalBank,
    now_us: u64,
) -> MergeOutcome {
    let mut values: Vec<i32, MAX_MERGE_INPUTS> = Vec::new();
    let mut status = Status::Ok;

    for &input in config.inputs.iter() {
        let signal = bank.slot(input);
        let fresh = config.stale_us == 0
            || now_us.saturating_sub(signal.timestamp_us) <= config.stale_us;
        if fresh && signal.status.usable() {
            status = status.join(signal.status);
            // Note(unwrap): the vector capacity equals the maximum input
            // count enforced at configuration time.
            values.push(signal.value).unwrap();
        }
    }

    if values.len() < config.inputs.len() {
        status = status.join(Status::Timeout);
    }

    let value = match values.len() {
        0 => None,
        _ => Some(vote(config.method, &mut values)),
    };

    let mut inconsistent = false;
    if let Some(result) = value {
        if config.tolerance > 0 {
            let deviation = values
                .iter()
                .map(|v| (*v as i64 - result as i64).unsigned_abs())
                .max()
                .unwrap_or(0);
            if deviation > config.tolerance as u64 {
                status = status.join(Status::Inconsistent);
                inconsistent = true;
            }
        }
    }

    MergeOutcome {
        value,
        status,
        inconsistent,
    }
}

fn vote(method: MergeMethod, values: &mut Vec<i32, MAX_MERGE_INPUTS>) -> i32 {
    match method {
        MergeMethod::Median => {
            values.sort_unstable();
            // Even counts take the lower middle element.
            values[(values.len() - 1) / 2]
        }
        MergeMethod::Average => {
            let sum: i64 = values.iter().map(|v| *v as i64).sum();
            // i64 division truncates toward zero, as required.
            (sum / values.len() as i64) as i32
        }
        MergeMethod::Min => *values.iter().min().unwrap(),
        MergeMethod::Max => *values.iter().max().unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signal::SignalBank;

    fn merge(inputs: &[u8], method: MergeMethod, tolerance: u32) -> MergeConfig {
        MergeConfig {
            inputs: Vec::from_slice(inputs).unwrap(),
            output: 10,
            method,
            tolerance,
            stale_us: 10_000,
            enabled: true,
        }
    }

    fn bank_with(values: &[i32], now_us: u64) -> SignalBank {
        let mut bank = SignalBank::new(core::iter::repeat(0).take(16));
        for (i, &v) in values.iter().enumerate() {
            bank.ingest(i as u8, v, Status::Ok, now_us);
        }
        bank
    }

    #[test]
    fn median_with_outlier_is_inconsistent() {
        let bank = bank_with(&[100, 102, 500], 0);
        let outcome =
            evaluate(&merge(&[0, 1, 2], MergeMethod::Median, 50), &bank, 0);
        assert_eq!(outcome.value, Some(102));
        assert_eq!(outcome.status, Status::Inconsistent);
        assert!(outcome.inconsistent);
    }

    #[test]
    fn median_of_even_count_takes_lower_middle() {
        let bank = bank_with(&[4, 1, 3, 2], 0);
        let outcome =
            evaluate(&merge(&[0, 1, 2, 3], MergeMethod::Median, 0), &bank, 0);
        assert_eq!(outcome.value, Some(2));
    }

    #[test]
    fn average_truncates_toward_zero() {
        let bank = bank_with(&[-3, -4], 0);
        let outcome =
            evaluate(&merge(&[0, 1], MergeMethod::Average, 0), &bank, 0);
        // -7 / 2 truncates to -3, not -4.
        assert_eq!(outcome.value, Some(-3));
    }

    #[test]
    fn min_and_max() {
        let bank = bank_with(&[7, -2, 5], 0);
        assert_eq!(
            evaluate(&merge(&[0, 1, 2], MergeMethod::Min, 0), &bank, 0).value,
            Some(-2)
        );
        assert_eq!(
            evaluate(&merge(&[0, 1, 2], MergeMethod::Max, 0), &bank, 0).value,
            Some(7)
        );
    }

    #[test]
    fn stale_input_joins_timeout_but_vote_continues() {
        let mut bank = bank_with(&[100, 104], 0);
        bank.ingest(2, 999, Status::Ok, 0);
        // Inputs 0 and 1 refreshed, input 2 left at t=0.
        bank.clear_updated();
        bank.ingest(0, 100, Status::Ok, 50_000);
        bank.ingest(1, 104, Status::Ok, 50_000);

        let outcome = evaluate(
            &merge(&[0, 1, 2], MergeMethod::Average, 10),
            &bank,
            50_000,
        );
        assert_eq!(outcome.value, Some(102));
        assert_eq!(outcome.status, Status::Timeout);
        assert!(!outcome.inconsistent);
    }

    #[test]
    fn errored_input_is_excluded() {
        let mut bank = bank_with(&[10, 20], 0);
        bank.ingest(2, 900, Status::Error, 0);
        let outcome =
            evaluate(&merge(&[0, 1, 2], MergeMethod::Max, 0), &bank, 0);
        assert_eq!(outcome.value, Some(20));
        assert_eq!(outcome.status, Status::Timeout);
    }

    #[test]
    fn no_qualifying_inputs_yields_no_value() {
        let mut bank = bank_with(&[], 0);
        bank.ingest(0, 1, Status::Error, 0);
        bank.ingest(1, 2, Status::Error, 0);
        let outcome =
            evaluate(&merge(&[0, 1], MergeMethod::Median, 0), &bank, 0);
        assert_eq!(outcome.value, None);
        assert_eq!(outcome.status, Status::Timeout);
    }

    #[test]
    fn degraded_inputs_propagate_into_the_result() {
        let mut bank = bank_with(&[10], 0);
        bank.ingest(1, 12, Status::Degraded, 0);
        let outcome =
            evaluate(&merge(&[0, 1], MergeMethod::Average, 0), &bank, 0);
        assert_eq!(outcome.value, Some(11));
        assert_eq!(outcome.status, Status::Degraded);
    }
}
