use rusqlite::Connection;
use tracing::info;

use crate::db::{self, Database};
use crate::error::{PlanError, PlanResult};
use crate::models::{ItemType, Macros, SubstituteCandidate};
use crate::persist::{RetryPolicy, with_retry};

/// Re-derive a plan's totals from its current items and catalog values, and
/// store them together with the snapshot's `actual` block. Items whose recipe
/// or product no longer exists count as zero.
pub fn recompute_plan_totals(conn: &Connection, plan_id: i64) -> PlanResult<Macros> {
    let plan = db::get_plan(conn, plan_id)?;
    let mut totals = Macros::default();
    for item in db::plan_items(conn, plan_id)? {
        let (contribution, _) = db::item_contribution(conn, &item)?;
        totals += contribution;
    }
    let snapshot = plan.snapshot.map(|mut s| {
        s.actual = totals;
        s
    });
    db::write_plan_totals(conn, plan_id, totals, snapshot.as_ref())?;
    Ok(totals)
}

/// Change the servings of one plan item. Returns the plan's new totals.
pub fn update_item_servings(
    db: &Database,
    item_id: i64,
    servings: f64,
    policy: &RetryPolicy,
) -> PlanResult<Macros> {
    if !servings.is_finite() || servings <= 0.0 {
        return Err(PlanError::InvalidServings(servings));
    }

    let totals = with_retry(policy, "update item servings", || {
        db.write(|conn| {
            let item = db::get_plan_item(conn, item_id)?;
            db::set_item_servings(conn, item_id, servings)?;
            recompute_plan_totals(conn, item.meal_plan_id)
        })
    })?;

    info!(item_id, servings, calories = totals.calories, "updated plan item servings");
    Ok(totals)
}

/// Point a recipe item at a different recipe. Servings are kept. Returns the
/// plan's new totals.
pub fn substitute_item(
    db: &Database,
    item_id: i64,
    new_recipe_id: i64,
    policy: &RetryPolicy,
) -> PlanResult<Macros> {
    let totals = with_retry(policy, "substitute plan item", || {
        db.write(|conn| {
            let item = db::get_plan_item(conn, item_id)?;
            if item.item_type != ItemType::Recipe {
                return Err(PlanError::NotARecipeItem(item_id));
            }
            let recipe = db::get_recipe(conn, new_recipe_id)?;
            db::set_item_recipe(conn, item_id, recipe.id, &recipe.title)?;
            recompute_plan_totals(conn, item.meal_plan_id)
        })
    })?;

    info!(item_id, new_recipe_id, calories = totals.calories, "substituted plan item");
    Ok(totals)
}

/// Recipes sharing tags with `recipe_id`, most shared tags first.
pub fn rank_substitutes(
    db: &Database,
    recipe_id: i64,
    limit: usize,
) -> PlanResult<Vec<SubstituteCandidate>> {
    let conn = db.conn();
    db::get_recipe(conn, recipe_id)?;
    db::recipes_sharing_tags(conn, recipe_id, limit)?
        .into_iter()
        .map(|(id, shared_tags)| {
            Ok(SubstituteCandidate {
                recipe: db::get_recipe(conn, id)?,
                shared_tags,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::{MacroTargets, NewProduct, NewRecipe, PlanItem, Tag};
    use crate::persist::{PlanDraft, save_plan};

    fn new_recipe(title: &str, calories: f64, tags: &[&str]) -> NewRecipe {
        NewRecipe {
            title: title.to_string(),
            calories: Some(calories),
            protein_g: Some(calories / 20.0),
            carbs_g: Some(calories / 10.0),
            fat_g: Some(calories / 40.0),
            tags: tags
                .iter()
                .map(|t| Tag {
                    name: (*t).to_string(),
                    tag_type: None,
                })
                .collect(),
            ..NewRecipe::default()
        }
    }

    struct Fixture {
        db: Database,
        plan_id: i64,
        recipe_item: i64,
        product_item: i64,
        spare_recipe: i64,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let main = db.insert_recipe(&new_recipe("Curry", 400.0, &["diner"])).unwrap();
        let side = db.insert_recipe(&new_recipe("Salade", 250.0, &["lunch"])).unwrap();
        let spare = db
            .insert_recipe(&new_recipe("Nasi", 600.0, &["diner"]))
            .unwrap();
        let quark = db
            .insert_product(&NewProduct {
                name: "Kwark".to_string(),
                calories_per_100: Some(60.0),
                protein_per_100: Some(10.0),
                ..NewProduct::default()
            })
            .unwrap();

        let items = vec![
            PlanItem::recipe(&main),
            PlanItem::recipe(&side),
            PlanItem::product(&quark, 150.0),
        ];
        let totals = items.iter().map(|i| i.macros).sum();
        let draft = PlanDraft {
            date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            target_calories: 1500.0,
            meal_count: 2,
            macro_targets: MacroTargets::default(),
            slot_labels: None,
            items,
            totals,
        };
        let plan_id = save_plan(&db, &draft, &RetryPolicy::immediate(1)).unwrap();
        let stored = db.get_plan_items(plan_id).unwrap();
        Fixture {
            plan_id,
            recipe_item: stored[0].id,
            product_item: stored[2].id,
            spare_recipe: spare.id,
            db,
        }
    }

    fn item_sum(db: &Database, plan_id: i64) -> f64 {
        db.get_plan_items(plan_id)
            .unwrap()
            .iter()
            .map(|i| db::item_contribution(db.conn(), i).unwrap().0.calories)
            .sum()
    }

    #[test]
    fn test_update_servings_adds_exact_calories() {
        let f = fixture();
        let before = f.db.get_plan(f.plan_id).unwrap().totals.calories;
        assert!((before - 740.0).abs() < 0.1);

        let totals =
            update_item_servings(&f.db, f.recipe_item, 2.0, &RetryPolicy::immediate(1)).unwrap();

        assert!((totals.calories - (before + 400.0)).abs() < 0.1);
        let plan = f.db.get_plan(f.plan_id).unwrap();
        assert!((plan.totals.calories - item_sum(&f.db, f.plan_id)).abs() < 0.1);
        assert!((plan.snapshot.unwrap().actual.calories - totals.calories).abs() < 0.1);
    }

    #[test]
    fn test_update_product_servings_uses_per_100() {
        let f = fixture();
        let totals =
            update_item_servings(&f.db, f.product_item, 2.5, &RetryPolicy::immediate(1)).unwrap();
        // 400 + 250 + 60 * 2.5
        assert!((totals.calories - 800.0).abs() < 0.1);
    }

    #[test]
    fn test_update_servings_rejects_bad_values() {
        let f = fixture();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = update_item_servings(&f.db, f.recipe_item, bad, &RetryPolicy::immediate(1))
                .unwrap_err();
            assert!(matches!(err, PlanError::InvalidServings(_)));
        }
        assert!((f.db.get_plan_item(f.recipe_item).unwrap().servings - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_update_missing_item_is_not_found() {
        let f = fixture();
        let err = update_item_servings(&f.db, 9999, 2.0, &RetryPolicy::immediate(1)).unwrap_err();
        assert!(matches!(err, PlanError::NotFound { id: 9999, .. }));
    }

    #[test]
    fn test_substitute_recipe_item() {
        let f = fixture();
        let totals =
            substitute_item(&f.db, f.recipe_item, f.spare_recipe, &RetryPolicy::immediate(1))
                .unwrap();

        let item = f.db.get_plan_item(f.recipe_item).unwrap();
        assert_eq!(item.item_id, f.spare_recipe);
        assert_eq!(item.notes.as_deref(), Some("Nasi"));
        // 600 + 250 + 90
        assert!((totals.calories - 940.0).abs() < 0.1);
        assert!((totals.calories - item_sum(&f.db, f.plan_id)).abs() < 0.1);
    }

    #[test]
    fn test_substitute_product_item_is_rejected() {
        let f = fixture();
        let err = substitute_item(&f.db, f.product_item, f.spare_recipe, &RetryPolicy::immediate(1))
            .unwrap_err();
        assert!(matches!(err, PlanError::NotARecipeItem(_)));
    }

    #[test]
    fn test_substitute_missing_recipe_leaves_plan_untouched() {
        let f = fixture();
        let before = f.db.get_plan_item(f.recipe_item).unwrap();
        let err = substitute_item(&f.db, f.recipe_item, 4242, &RetryPolicy::immediate(1))
            .unwrap_err();
        assert!(matches!(err, PlanError::NotFound { entity: "recipe", .. }));

        let after = f.db.get_plan_item(f.recipe_item).unwrap();
        assert_eq!(after.item_id, before.item_id);
        assert_eq!(after.notes, before.notes);
    }

    #[test]
    fn test_recompute_treats_missing_catalog_rows_as_zero() {
        let f = fixture();
        let curry_id = f.db.get_plan_item(f.recipe_item).unwrap().item_id;
        f.db.conn()
            .execute("DELETE FROM recipes WHERE id = ?1", [curry_id])
            .unwrap();

        let totals = f.db.write(|conn| recompute_plan_totals(conn, f.plan_id)).unwrap();
        assert!((totals.calories - 340.0).abs() < 0.1);
    }

    #[test]
    fn test_rank_substitutes() {
        let f = fixture();
        let curry_id = f.db.get_plan_item(f.recipe_item).unwrap().item_id;
        let ranked = rank_substitutes(&f.db, curry_id, 10).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].recipe.id, f.spare_recipe);
        assert_eq!(ranked[0].shared_tags, 1);

        assert!(rank_substitutes(&f.db, curry_id, 0).unwrap().is_empty());
        assert!(matches!(
            rank_substitutes(&f.db, 777, 10),
            Err(PlanError::NotFound { .. })
        ));
    }
}
