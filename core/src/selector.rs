use tracing::debug;

use crate::models::{MacroTargets, Recipe};

pub const PROTEIN_WEIGHT: f64 = 2.0;
pub const CARBS_WEIGHT: f64 = 1.0;
pub const FAT_WEIGHT: f64 = 1.2;

/// Calorie and macro budget for a single meal slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotTarget {
    pub calories: f64,
    pub macros: MacroTargets,
}

impl SlotTarget {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn per_meal(day_calories: f64, day_macros: &MacroTargets, meal_count: usize) -> Self {
        Self {
            calories: day_calories / meal_count.max(1) as f64,
            macros: day_macros.per_meal(meal_count),
        }
    }
}

/// Distance of one recipe from the slot target. Recipes without a positive
/// calorie value score `+inf`.
#[must_use]
pub fn score_recipe(recipe: &Recipe, target: &SlotTarget) -> f64 {
    let calories = match recipe.calories {
        Some(kcal) if kcal > 0.0 => kcal,
        _ => return f64::INFINITY,
    };
    let mut score = (target.calories - calories).abs();
    let per = recipe.per_serving();
    if let Some(p) = target.macros.protein_g {
        score += PROTEIN_WEIGHT * (p - per.protein_g).abs();
    }
    if let Some(c) = target.macros.carbs_g {
        score += CARBS_WEIGHT * (c - per.carbs_g).abs();
    }
    if let Some(f) = target.macros.fat_g {
        score += FAT_WEIGHT * (f - per.fat_g).abs();
    }
    score
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Pick one distinct recipe per slot. Slot `i` prefers recipes tagged with
/// `preferred_tags[i]`, falling back to the whole remaining pool when none
/// match. Lowest score wins; ties go to the lowest recipe id. Slots are
/// skipped once the pool is exhausted, so fewer than `meal_count` recipes may
/// come back.
#[must_use]
pub fn select_meals<'a>(
    recipes: &'a [Recipe],
    meal_count: usize,
    target: &SlotTarget,
    preferred_tags: Option<&[Vec<String>]>,
) -> Vec<&'a Recipe> {
    let mut chosen: Vec<&Recipe> = Vec::with_capacity(meal_count.min(recipes.len()));

    for slot in 0..meal_count {
        let pool: Vec<&Recipe> = recipes
            .iter()
            .filter(|r| !chosen.iter().any(|c| c.id == r.id))
            .collect();
        if pool.is_empty() {
            debug!(slot, unfilled = meal_count - slot, "recipe pool exhausted");
            break;
        }

        let wanted = preferred_tags
            .and_then(|tags| tags.get(slot))
            .map(|tags| normalize_tags(tags))
            .unwrap_or_default();
        let narrowed: Vec<&Recipe> = if wanted.is_empty() {
            Vec::new()
        } else {
            pool.iter().copied().filter(|r| r.has_any_tag(&wanted)).collect()
        };
        let candidates = if narrowed.is_empty() { pool } else { narrowed };

        let best = candidates
            .into_iter()
            .map(|r| (score_recipe(r, target), r))
            .min_by(|(sa, ra), (sb, rb)| sa.total_cmp(sb).then(ra.id.cmp(&rb.id)));

        if let Some((score, recipe)) = best {
            debug!(slot, recipe_id = recipe.id, title = %recipe.title, score, "selected recipe");
            chosen.push(recipe);
        }
    }

    chosen
}
