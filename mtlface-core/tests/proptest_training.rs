//! Property-based tests for the training bookkeeping using proptest.

use proptest::prelude::*;

use mtlface_core::config::TrainOptions;
use mtlface_core::schedule::LrSchedule;
use mtlface_core::training::callbacks::WATERMARK_SENTINEL;
use mtlface_core::training::{BestLossWatermark, CallbackAction, LossRecord};
use mtlface_core::weights::{StateDict, Tensor, apply_state};

// --- Best-loss watermark properties ---

proptest! {
    #[test]
    fn watermark_updates_match_running_minima(losses in prop::collection::vec(0.0f64..1e6, 0..64)) {
        let mut watermark = BestLossWatermark::new();
        let mut running = WATERMARK_SENTINEL;
        let mut expected = 0;
        for total in &losses {
            let action = watermark.observe(*total);
            if *total < running {
                running = *total;
                expected += 1;
                prop_assert_eq!(action, CallbackAction::Checkpoint);
            } else {
                prop_assert_eq!(action, CallbackAction::Continue);
            }
        }
        prop_assert_eq!(watermark.updates(), expected);
        prop_assert_eq!(watermark.best(), running);
    }

    #[test]
    fn watermark_never_increases(losses in prop::collection::vec(any::<f64>(), 1..64)) {
        let mut watermark = BestLossWatermark::new();
        let mut previous = watermark.best();
        for total in losses {
            watermark.observe(total);
            prop_assert!(watermark.best() <= previous);
            previous = watermark.best();
        }
    }

    #[test]
    fn watermark_ignores_values_at_or_above_sentinel(extra in 0.0f64..1e9) {
        let mut watermark = BestLossWatermark::new();
        prop_assert_eq!(watermark.observe(WATERMARK_SENTINEL + extra), CallbackAction::Continue);
        prop_assert_eq!(watermark.updates(), 0);
    }
}

// --- Loss record properties ---

proptest! {
    #[test]
    fn loss_csv_has_header_plus_one_line_per_row(
        rows in prop::collection::vec(prop::array::uniform3(-1e3f64..1e3), 0..40),
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("loss.csv");
        let mut record = LossRecord::new(&["id", "da", "age"]);
        for row in &rows {
            record.push_values(row).unwrap();
        }
        record.write_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        prop_assert_eq!(content.lines().count(), rows.len() + 1);
        prop_assert_eq!(content.lines().next(), Some("id,da,age"));
        prop_assert_eq!(record.column("da").map(<[f64]>::len), Some(rows.len()));
    }

    #[test]
    fn loss_record_rejects_wrong_arity(len in 0usize..8) {
        prop_assume!(len != 3);
        let mut record = LossRecord::new(&["id", "da", "age"]);
        prop_assert!(record.push_values(&vec![0.0; len]).is_err());
        prop_assert!(record.is_empty());
    }
}

// --- Iteration range properties ---

proptest! {
    #[test]
    fn iteration_range_is_restore_plus_one_to_num(restore in 0u64..500, extra in 0u64..500) {
        let config = TrainOptions {
            restore_iter: restore,
            num_iter: restore + extra,
            ..TrainOptions::default()
        }
        .validate()
        .unwrap();
        let range = config.iterations();
        prop_assert_eq!(config.iteration_count(), extra);
        prop_assert_eq!(range.clone().count() as u64, extra);
        if extra > 0 {
            prop_assert_eq!(*range.start(), restore + 1);
            prop_assert_eq!(*range.end(), restore + extra);
        }
    }

    #[test]
    fn restore_past_num_iter_is_rejected(num in 0u64..500, over in 1u64..500) {
        let result = TrainOptions {
            restore_iter: num + over,
            num_iter: num,
            ..TrainOptions::default()
        }
        .validate();
        prop_assert!(result.is_err());
    }
}

// --- Learning-rate schedule properties ---

proptest! {
    #[test]
    fn lr_never_increases_after_warmup(
        gamma in 0.01f64..=1.0,
        milestones in prop::collection::vec(1u64..1000, 0..5),
        warmup in 0u64..100,
    ) {
        let schedule = LrSchedule::new(0.1, gamma, milestones, warmup);
        let mut previous = schedule.lr_at(warmup.max(1));
        for iteration in warmup.max(1)..1200 {
            let lr = schedule.lr_at(iteration);
            prop_assert!(lr <= previous + 1e-15);
            prop_assert!(lr > 0.0);
            previous = lr;
        }
    }
}

// --- Partial state-dict loading properties ---

fn state_with(keys: &[u8], shape: usize, fill: f32) -> StateDict {
    keys.iter()
        .map(|k| (format!("layer{k}.weight"), Tensor::new(vec![shape], vec![fill; shape]).unwrap()))
        .collect()
}

proptest! {
    #[test]
    fn non_strict_load_accounts_for_every_key(
        target_keys in prop::collection::btree_set(0u8..16, 0..10),
        source_keys in prop::collection::btree_set(0u8..16, 0..10),
        mismatch in any::<bool>(),
    ) {
        let target_keys: Vec<u8> = target_keys.into_iter().collect();
        let source_keys: Vec<u8> = source_keys.into_iter().collect();
        let mut target = state_with(&target_keys, 2, 0.0);
        let source = state_with(&source_keys, if mismatch { 3 } else { 2 }, 1.0);

        let report = apply_state(&mut target, &source, false).unwrap();

        prop_assert_eq!(
            report.loaded.len() + report.missing_keys.len() + report.mismatched_keys.len(),
            target.len()
        );
        let shared = target_keys.iter().filter(|k| source_keys.contains(k)).count();
        prop_assert_eq!(report.unexpected_keys.len(), source_keys.len() - shared);
        for key in &report.loaded {
            prop_assert_eq!(&target[key].data, &vec![1.0f32, 1.0]);
        }
        for key in &report.missing_keys {
            prop_assert_eq!(&target[key].data, &vec![0.0f32, 0.0]);
        }
        if mismatch {
            prop_assert!(report.loaded.is_empty());
        }
    }
}
