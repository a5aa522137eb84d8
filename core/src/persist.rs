use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::db::{self, Database, PlanHeader};
use crate::error::{PlanError, PlanResult};
use crate::models::{MacroSnapshot, MacroTargets, Macros, PlanItem, SnapshotTarget};

/// Exponential backoff for writes that hit a busy or locked database.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 8,
            initial_delay: Duration::from_millis(200),
            multiplier: 1.6,
            max_delay: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping between attempts.
    #[must_use]
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.multiplier.max(1.0)).min(self.max_delay)
    }
}

/// Run `f` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up. Exhaustion is reported as
/// [`PlanError::PersistenceFailure`] wrapping the last busy error.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut f: impl FnMut() -> PlanResult<T>,
) -> PlanResult<T> {
    let max_attempts = policy.attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                if attempt >= max_attempts {
                    error!(
                        operation,
                        attempts = attempt,
                        error = %e,
                        "database stayed busy; giving up"
                    );
                    return Err(PlanError::PersistenceFailure {
                        operation,
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay = ?delay,
                    error = %e,
                    "database busy, retrying after backoff"
                );
                thread::sleep(delay);
                delay = policy.next_delay(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

/// A generated plan ready to be written.
#[derive(Debug, Clone)]
pub struct PlanDraft {
    pub date: NaiveDate,
    pub target_calories: f64,
    pub meal_count: i64,
    pub macro_targets: MacroTargets,
    pub slot_labels: Option<Vec<String>>,
    pub items: Vec<PlanItem>,
    pub totals: Macros,
}

impl PlanDraft {
    #[must_use]
    pub fn snapshot(&self) -> MacroSnapshot {
        MacroSnapshot {
            target: SnapshotTarget {
                calories: self.target_calories,
                macros: self.macro_targets,
            },
            actual: self.totals,
            slots: self.slot_labels.clone(),
        }
    }
}

/// Create or overwrite the plan for `draft.date` together with its items.
/// Header and items commit together; a failed attempt leaves the previously
/// stored plan untouched.
pub fn save_plan(db: &Database, draft: &PlanDraft, policy: &RetryPolicy) -> PlanResult<i64> {
    let snapshot = draft.snapshot();
    let header = PlanHeader {
        date: draft.date,
        target_calories: draft.target_calories,
        meal_count: draft.meal_count,
        snapshot: &snapshot,
        totals: draft.totals,
    };

    let plan_id = with_retry(policy, "save meal plan", || {
        db.write(|conn| {
            let plan_id = db::upsert_plan_header(conn, &header)?;
            db::replace_plan_items(conn, plan_id, &draft.items)?;
            Ok(plan_id)
        })
    })?;

    info!(
        date = %draft.date,
        plan_id,
        items = draft.items.len(),
        calories = draft.totals.calories,
        "saved meal plan"
    );
    Ok(plan_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemType, NewRecipe};

    fn busy() -> PlanError {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        )
        .into()
    }

    fn draft(date: NaiveDate, items: Vec<PlanItem>) -> PlanDraft {
        let totals = items.iter().map(|i| i.macros).sum();
        PlanDraft {
            date,
            target_calories: 1800.0,
            meal_count: 3,
            macro_targets: MacroTargets::default(),
            slot_labels: None,
            items,
            totals,
        }
    }

    fn recipe_items(db: &Database, titles: &[&str]) -> Vec<PlanItem> {
        titles
            .iter()
            .map(|title| {
                let recipe = db
                    .insert_recipe(&NewRecipe {
                        title: (*title).to_string(),
                        calories: Some(500.0),
                        protein_g: Some(25.0),
                        ..NewRecipe::default()
                    })
                    .unwrap();
                PlanItem::recipe(&recipe)
            })
            .collect()
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 8);
        assert_eq!(policy.initial_delay, Duration::from_millis(200));
        let second = policy.next_delay(policy.initial_delay);
        assert!((second.as_secs_f64() - 0.32).abs() < 1e-6);
        assert_eq!(
            policy.next_delay(Duration::from_millis(1200)),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_retry_recovers_from_busy() {
        let mut calls = 0;
        let result = with_retry(&RetryPolicy::immediate(5), "test", || {
            calls += 1;
            if calls < 3 { Err(busy()) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_retry_gives_up_after_attempts() {
        let mut calls = 0;
        let result: PlanResult<()> = with_retry(&RetryPolicy::immediate(4), "test", || {
            calls += 1;
            Err(busy())
        });
        assert_eq!(calls, 4);
        assert!(matches!(
            result,
            Err(PlanError::PersistenceFailure { attempts: 4, .. })
        ));
    }

    #[test]
    fn test_retry_does_not_retry_other_errors() {
        let mut calls = 0;
        let result: PlanResult<()> = with_retry(&RetryPolicy::immediate(4), "test", || {
            calls += 1;
            Err(PlanError::not_found("plan item", 1))
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(PlanError::NotFound { .. })));
    }

    #[test]
    fn test_save_plan_writes_items_in_order() {
        let db = Database::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let items = recipe_items(&db, &["Yoghurt bowl", "Broodje kip", "Stamppot"]);

        let plan_id = save_plan(&db, &draft(date, items), &RetryPolicy::immediate(1)).unwrap();

        let stored = db.get_plan_items(plan_id).unwrap();
        let notes: Vec<&str> = stored.iter().filter_map(|i| i.notes.as_deref()).collect();
        assert_eq!(notes, ["Yoghurt bowl", "Broodje kip", "Stamppot"]);
        assert_eq!(stored[2].meal_index, 2);
        assert!(stored.iter().all(|i| i.item_type == ItemType::Recipe));

        let plan = db.get_plan(plan_id).unwrap();
        assert!((plan.totals.calories - 1500.0).abs() < 0.1);
        let snapshot = plan.snapshot.unwrap();
        assert!((snapshot.actual.calories - 1500.0).abs() < 0.1);
        assert!((snapshot.target.calories - 1800.0).abs() < 0.1);
    }

    #[test]
    fn test_save_plan_twice_replaces_items() {
        let db = Database::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let first = recipe_items(&db, &["A", "B", "C"]);
        let second = recipe_items(&db, &["D"]);

        let id1 = save_plan(&db, &draft(date, first), &RetryPolicy::immediate(1)).unwrap();
        let id2 = save_plan(&db, &draft(date, second), &RetryPolicy::immediate(1)).unwrap();

        assert_eq!(id1, id2);
        assert_eq!(db.list_plans(10).unwrap().len(), 1);
        let items = db.get_plan_items(id2).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].notes.as_deref(), Some("D"));
        assert!((db.get_plan(id2).unwrap().totals.calories - 500.0).abs() < 0.1);
    }

    #[test]
    fn test_contended_save_fails_and_keeps_previous_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plate.db");
        let db = Database::open_with_busy_timeout(&path, Duration::ZERO).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let original = recipe_items(&db, &["A", "B"]);
        let replacement = recipe_items(&db, &["C"]);
        let plan_id = save_plan(&db, &draft(date, original), &RetryPolicy::immediate(1)).unwrap();

        let blocker = rusqlite::Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

        let err = save_plan(&db, &draft(date, replacement), &RetryPolicy::immediate(3)).unwrap_err();
        assert!(matches!(
            err,
            PlanError::PersistenceFailure { attempts: 3, .. }
        ));

        blocker.execute_batch("ROLLBACK").unwrap();
        let items = db.get_plan_items(plan_id).unwrap();
        let notes: Vec<&str> = items.iter().filter_map(|i| i.notes.as_deref()).collect();
        assert_eq!(notes, ["A", "B"]);
        assert!((db.get_plan(plan_id).unwrap().totals.calories - 1000.0).abs() < 0.1);
    }
}
