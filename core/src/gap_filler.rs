use tracing::debug;

use crate::models::{MacroTargets, Macros, PlanItem, Product};
use crate::selector::{CARBS_WEIGHT, FAT_WEIGHT, PROTEIN_WEIGHT};

pub const MAX_ITERATIONS: usize = 2;

const CALORIE_WEIGHT: f64 = 0.5;
const MACRO_DEFAULT_GRAMS: f64 = 50.0;
const MACRO_MIN_GRAMS: f64 = 25.0;
const MACRO_MAX_GRAMS: f64 = 300.0;
const CALORIE_MIN_GRAMS: f64 = 50.0;
const CALORIE_MAX_GRAMS: f64 = 200.0;
const CALORIE_DEFAULT_GRAMS: f64 = 100.0;
/// Calorie gaps at or below this share of the target get a flat default portion.
const CALORIE_GAP_THRESHOLD: f64 = 0.05;

/// Day-level error of `totals` against the targets. With any macro target
/// set, calories weigh in at half; otherwise only calories count.
#[must_use]
pub fn weighted_error(totals: Macros, calories: f64, macros: &MacroTargets) -> f64 {
    let calorie_gap = (calories - totals.calories).abs();
    if macros.is_empty() {
        return calorie_gap;
    }
    let mut err = CALORIE_WEIGHT * calorie_gap;
    if let Some(p) = macros.protein_g {
        err += PROTEIN_WEIGHT * (p - totals.protein_g).abs();
    }
    if let Some(c) = macros.carbs_g {
        err += CARBS_WEIGHT * (c - totals.carbs_g).abs();
    }
    if let Some(f) = macros.fat_g {
        err += FAT_WEIGHT * (f - totals.fat_g).abs();
    }
    err
}

/// Portion size to try for `product` given the current totals.
#[must_use]
pub fn trial_grams(product: &Product, totals: Macros, calories: f64, macros: &MacroTargets) -> f64 {
    let per = product.per_100();

    if macros.is_empty() {
        let gap = calories - totals.calories;
        if gap > CALORIE_GAP_THRESHOLD * calories && per.calories > 0.0 {
            return (gap / per.calories * 100.0).clamp(CALORIE_MIN_GRAMS, CALORIE_MAX_GRAMS);
        }
        return CALORIE_DEFAULT_GRAMS;
    }

    let needs = [
        (macros.protein_g, totals.protein_g, per.protein_g),
        (macros.carbs_g, totals.carbs_g, per.carbs_g),
        (macros.fat_g, totals.fat_g, per.fat_g),
    ];
    needs
        .into_iter()
        .filter_map(|(target, current, per_100)| {
            let deficit = target? - current;
            (deficit > 0.0 && per_100 > 0.0).then(|| deficit / per_100 * 100.0)
        })
        .reduce(f64::max)
        .unwrap_or(MACRO_DEFAULT_GRAMS)
        .clamp(MACRO_MIN_GRAMS, MACRO_MAX_GRAMS)
}

/// Append up to [`MAX_ITERATIONS`] product portions, each one the single best
/// improvement over the current totals. Stops early when no product lowers
/// the error. Earlier products in `products` win ties. Returns how many were
/// added; `items` and `totals` are updated in place.
pub fn fill_gaps(
    products: &[Product],
    items: &mut Vec<PlanItem>,
    totals: &mut Macros,
    calories: f64,
    macros: &MacroTargets,
) -> usize {
    let mut added = 0;

    for iteration in 0..MAX_ITERATIONS {
        let current_err = weighted_error(*totals, calories, macros);
        let mut best: Option<(f64, &Product, f64)> = None;

        for product in products {
            if product.calories_per_100.is_none_or(|kcal| kcal <= 0.0) {
                continue;
            }
            let grams = trial_grams(product, *totals, calories, macros);
            let err = weighted_error(*totals + product.portion(grams), calories, macros);
            if best.is_none_or(|(best_err, _, _)| err < best_err) {
                best = Some((err, product, grams));
            }
        }

        match best {
            Some((err, product, grams)) if err < current_err => {
                debug!(
                    iteration,
                    product_id = product.id,
                    name = %product.name,
                    grams,
                    error_before = current_err,
                    error_after = err,
                    "added gap-filling product"
                );
                let item = PlanItem::product(product, grams);
                *totals += item.macros;
                items.push(item);
                added += 1;
            }
            _ => break,
        }
    }

    added
}
