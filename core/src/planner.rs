use chrono::{Days, NaiveDate};
use tracing::{info, warn};

use crate::catalog;
use crate::db::Database;
use crate::error::PlanResult;
use crate::gap_filler;
use crate::models::{DailyPlan, Macros, PlanItem, PlanRequest, WeekDay};
use crate::persist::{PlanDraft, RetryPolicy, save_plan};
use crate::selector::{self, SlotTarget};

/// Build and store the plan for one day, replacing any plan already stored
/// for `date`.
pub fn generate_daily_plan(
    db: &Database,
    request: &PlanRequest,
    date: NaiveDate,
    policy: &RetryPolicy,
) -> PlanResult<DailyPlan> {
    let slots = request.slots();
    let candidates = catalog::load_candidates(db.conn(), &request.exclusions)?;

    let slot_target = SlotTarget::per_meal(request.target_calories, &request.macro_targets, slots);
    let chosen = selector::select_meals(
        &candidates.recipes,
        slots,
        &slot_target,
        request.preferred_tags.as_deref(),
    );
    let unfilled_slots = slots - chosen.len();
    if unfilled_slots > 0 {
        warn!(%date, unfilled_slots, "not enough recipes to fill every meal slot");
    }

    let mut items: Vec<PlanItem> = chosen.into_iter().map(PlanItem::recipe).collect();
    let mut totals: Macros = items.iter().map(|i| i.macros).sum();

    if !candidates.products.is_empty() {
        gap_filler::fill_gaps(
            &candidates.products,
            &mut items,
            &mut totals,
            request.target_calories,
            &request.macro_targets,
        );
    }

    let draft = PlanDraft {
        date,
        target_calories: request.target_calories,
        meal_count: i64::try_from(slots).unwrap_or(i64::MAX),
        macro_targets: request.macro_targets,
        slot_labels: request.slot_labels.clone(),
        items,
        totals,
    };
    let plan_id = save_plan(db, &draft, policy)?;

    Ok(DailyPlan {
        plan_id,
        date,
        items: draft.items,
        totals,
        unfilled_slots,
    })
}

/// Plan `days` consecutive days starting at `start`. Each day is planned on
/// its own, so recipes may repeat across days.
pub fn generate_weekly_plan(
    db: &Database,
    request: &PlanRequest,
    start: NaiveDate,
    days: u32,
    policy: &RetryPolicy,
) -> PlanResult<Vec<WeekDay>> {
    let mut week = Vec::with_capacity(days as usize);
    for offset in 0..days {
        let Some(date) = start.checked_add_days(Days::new(u64::from(offset))) else {
            warn!(%start, offset, "date out of range; stopping weekly plan early");
            break;
        };
        let day = generate_daily_plan(db, request, date, policy)?;
        week.push(WeekDay {
            date,
            plan_id: day.plan_id,
            totals: day.totals,
        });
    }
    info!(%start, days = week.len(), "generated weekly plan");
    Ok(week)
}
