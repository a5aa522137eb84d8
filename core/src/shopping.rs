use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chrono::{Days, NaiveDate};
use tracing::debug;

use crate::db::{self, Database};
use crate::error::PlanResult;
use crate::models::{
    ItemType, MealPlanItem, ShoppingFreeItem, ShoppingIngredient, ShoppingList, ShoppingProduct,
    ShoppingRecipe,
};

/// Longest window a shopping list covers. Larger requests are clamped.
pub const MAX_SHOPPING_DAYS: u32 = 366;

#[derive(Default)]
struct IngredientTally {
    quantities: HashMap<(String, String), ShoppingIngredient>,
    free: HashMap<String, u32>,
}

impl IngredientTally {
    /// Add one recipe item. Quantities are stored for the whole recipe, so
    /// they scale by `item servings / recipe servings`. A recipe without a
    /// positive serving count is treated as one serving.
    fn add(&mut self, db: &Database, item: &MealPlanItem) -> PlanResult<()> {
        let Some(recipe) = db::find_recipe(db.conn(), item.item_id)? else {
            return Ok(());
        };
        let factor = match recipe.servings {
            Some(s) if s > 0.0 => item.servings / s,
            _ => item.servings,
        };
        for ingredient in db::recipe_ingredients(db.conn(), recipe.id)? {
            match (ingredient.quantity, ingredient.unit.as_deref()) {
                (Some(quantity), Some(unit)) => {
                    let key = (ingredient.name.to_lowercase(), unit.to_lowercase());
                    let entry = self
                        .quantities
                        .entry(key)
                        .or_insert_with(|| ShoppingIngredient {
                            name: ingredient.name.clone(),
                            unit: unit.to_string(),
                            quantity: 0.0,
                        });
                    entry.quantity += quantity * factor;
                }
                _ => {
                    let text = ingredient.raw.unwrap_or(ingredient.name);
                    *self.free.entry(text).or_default() += 1;
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> (Vec<ShoppingIngredient>, Vec<ShoppingFreeItem>) {
        let mut quantities: Vec<(_, _)> = self.quantities.into_iter().collect();
        quantities.sort_by(|a, b| a.0.cmp(&b.0));
        let mut free: Vec<ShoppingFreeItem> = self
            .free
            .into_iter()
            .map(|(text, count)| ShoppingFreeItem { text, count })
            .collect();
        free.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.text.cmp(&b.text)));
        (quantities.into_iter().map(|(_, i)| i).collect(), free)
    }
}

/// Everything needed for the plans stored in `[start, start + days)`:
/// recipe ingredients summed per name and unit, free-text ingredients
/// counted, recipe servings summed per recipe and product grams summed per
/// product. `days` is clamped to `MAX_SHOPPING_DAYS`.
pub fn shopping_list(db: &Database, start: NaiveDate, days: u32) -> PlanResult<ShoppingList> {
    let days = days.min(MAX_SHOPPING_DAYS);
    let end = start
        .checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX);
    let plans = db.plans_between(start, end)?;

    let mut tally = IngredientTally::default();
    let mut recipes: HashMap<i64, ShoppingRecipe> = HashMap::new();
    let mut products: HashMap<i64, ShoppingProduct> = HashMap::new();

    for plan in &plans {
        for item in db.get_plan_items(plan.id)? {
            match item.item_type {
                ItemType::Recipe => {
                    tally.add(db, &item)?;
                    let entry = match recipes.entry(item.item_id) {
                        Entry::Occupied(e) => e.into_mut(),
                        Entry::Vacant(e) => {
                            let (_, title) = db::item_contribution(db.conn(), &item)?;
                            e.insert(ShoppingRecipe {
                                recipe_id: item.item_id,
                                title,
                                servings: 0.0,
                            })
                        }
                    };
                    entry.servings += item.servings;
                }
                ItemType::Product => {
                    let entry = match products.entry(item.item_id) {
                        Entry::Occupied(e) => e.into_mut(),
                        Entry::Vacant(e) => {
                            let (_, name) = db::item_contribution(db.conn(), &item)?;
                            e.insert(ShoppingProduct {
                                product_id: item.item_id,
                                name,
                                grams: 0.0,
                            })
                        }
                    };
                    entry.grams += item.servings * 100.0;
                }
            }
        }
    }

    let mut recipes: Vec<ShoppingRecipe> = recipes.into_values().collect();
    recipes.sort_by(|a, b| a.title.cmp(&b.title).then(a.recipe_id.cmp(&b.recipe_id)));
    let mut products: Vec<ShoppingProduct> = products.into_values().collect();
    products.sort_by(|a, b| a.name.cmp(&b.name).then(a.product_id.cmp(&b.product_id)));

    let (ingredients, other_ingredients) = tally.finish();

    debug!(
        %start,
        days,
        plans = plans.len(),
        ingredients = ingredients.len(),
        recipes = recipes.len(),
        products = products.len(),
        "built shopping list"
    );
    Ok(ShoppingList {
        start,
        days,
        ingredients,
        other_ingredients,
        recipes,
        products,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ingredient, MacroTargets, NewProduct, NewRecipe, PlanItem};
    use crate::persist::{PlanDraft, RetryPolicy, save_plan};

    fn save(db: &Database, date: NaiveDate, items: Vec<PlanItem>) {
        let totals = items.iter().map(|i| i.macros).sum();
        let draft = PlanDraft {
            date,
            target_calories: 2000.0,
            meal_count: 2,
            macro_targets: MacroTargets::default(),
            slot_labels: None,
            items,
            totals,
        };
        save_plan(db, &draft, &RetryPolicy::immediate(1)).unwrap();
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, d).unwrap()
    }

    #[test]
    fn test_aggregates_over_window() {
        let db = Database::open_in_memory().unwrap();
        let soup = db
            .insert_recipe(&NewRecipe {
                title: "Soep".to_string(),
                calories: Some(300.0),
                ..NewRecipe::default()
            })
            .unwrap();
        let curry = db
            .insert_recipe(&NewRecipe {
                title: "Curry".to_string(),
                calories: Some(650.0),
                ..NewRecipe::default()
            })
            .unwrap();
        let quark = db
            .insert_product(&NewProduct {
                name: "Kwark".to_string(),
                calories_per_100: Some(60.0),
                ..NewProduct::default()
            })
            .unwrap();

        save(&db, day(1), vec![PlanItem::recipe(&soup), PlanItem::product(&quark, 150.0)]);
        save(&db, day(2), vec![PlanItem::recipe(&soup), PlanItem::recipe(&curry)]);
        save(&db, day(3), vec![PlanItem::product(&quark, 200.0)]);
        // Outside the window
        save(&db, day(4), vec![PlanItem::recipe(&curry)]);

        let list = shopping_list(&db, day(1), 3).unwrap();
        let titles: Vec<&str> = list.recipes.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Curry", "Soep"]);
        assert!((list.recipes[1].servings - 2.0).abs() < 0.001);
        assert!((list.recipes[0].servings - 1.0).abs() < 0.001);
        assert_eq!(list.products.len(), 1);
        assert!((list.products[0].grams - 350.0).abs() < 0.001);
    }

    fn quantity(name: &str, amount: f64, unit: &str) -> Ingredient {
        Ingredient {
            name: name.to_string(),
            quantity: Some(amount),
            unit: Some(unit.to_string()),
            raw: None,
        }
    }

    #[test]
    fn test_sums_ingredients_per_name_and_unit() {
        let db = Database::open_in_memory().unwrap();
        // Four servings: 400 g pasta, 2 uien, zout without amount
        let pasta = db
            .insert_recipe(&NewRecipe {
                title: "Pasta".to_string(),
                servings: Some(4.0),
                calories: Some(550.0),
                ingredients: vec![
                    quantity("Spaghetti", 400.0, "g"),
                    quantity("Ui", 2.0, "stuk"),
                    Ingredient {
                        name: "Zout".to_string(),
                        raw: Some("zout naar smaak".to_string()),
                        ..Ingredient::default()
                    },
                ],
                ..NewRecipe::default()
            })
            .unwrap();
        // No serving count: quantities count as one serving
        let salad = db
            .insert_recipe(&NewRecipe {
                title: "Salade".to_string(),
                calories: Some(300.0),
                ingredients: vec![
                    quantity("ui", 1.0, "STUK"),
                    quantity("Sla", 100.0, "g"),
                    Ingredient {
                        name: "Zout".to_string(),
                        raw: Some("zout naar smaak".to_string()),
                        ..Ingredient::default()
                    },
                    Ingredient {
                        name: "Peper".to_string(),
                        ..Ingredient::default()
                    },
                ],
                ..NewRecipe::default()
            })
            .unwrap();

        let mut double = PlanItem::recipe(&pasta);
        double.servings = 2.0;
        save(&db, day(1), vec![double, PlanItem::recipe(&salad)]);
        save(&db, day(2), vec![PlanItem::recipe(&pasta)]);

        let list = shopping_list(&db, day(1), 2).unwrap();
        let sums: Vec<(&str, &str, f64)> = list
            .ingredients
            .iter()
            .map(|i| (i.name.as_str(), i.unit.as_str(), i.quantity))
            .collect();
        assert_eq!(sums.len(), 3);
        assert_eq!((sums[0].0, sums[0].1), ("Sla", "g"));
        assert!((sums[0].2 - 100.0).abs() < 0.001);
        // 3 pasta servings of 400 g per 4 servings
        assert_eq!((sums[1].0, sums[1].1), ("Spaghetti", "g"));
        assert!((sums[1].2 - 300.0).abs() < 0.001);
        // 3 servings * 0.5 stuk + 1 stuk from the salad
        assert_eq!(sums[2].0, "Ui");
        assert!((sums[2].2 - 2.5).abs() < 0.001);

        assert_eq!(
            list.other_ingredients,
            vec![
                ShoppingFreeItem {
                    text: "zout naar smaak".to_string(),
                    count: 3,
                },
                ShoppingFreeItem {
                    text: "Peper".to_string(),
                    count: 1,
                },
            ]
        );
    }

    #[test]
    fn test_days_clamped_to_maximum() {
        let db = Database::open_in_memory().unwrap();
        let soup = db
            .insert_recipe(&NewRecipe {
                title: "Soep".to_string(),
                calories: Some(300.0),
                ..NewRecipe::default()
            })
            .unwrap();
        save(&db, day(1), vec![PlanItem::recipe(&soup)]);

        let list = shopping_list(&db, day(1), u32::MAX).unwrap();
        assert_eq!(list.days, MAX_SHOPPING_DAYS);
        assert_eq!(list.recipes.len(), 1);
    }

    #[test]
    fn test_missing_catalog_rows_fall_back_to_notes() {
        let db = Database::open_in_memory().unwrap();
        let gone = db
            .insert_recipe(&NewRecipe {
                title: "Lasagne".to_string(),
                calories: Some(700.0),
                ..NewRecipe::default()
            })
            .unwrap();
        save(&db, day(10), vec![PlanItem::recipe(&gone)]);
        db.conn()
            .execute("DELETE FROM recipes WHERE id = ?1", [gone.id])
            .unwrap();

        let list = shopping_list(&db, day(10), 1).unwrap();
        assert_eq!(list.recipes[0].title, "Lasagne");
    }

    #[test]
    fn test_empty_window() {
        let db = Database::open_in_memory().unwrap();
        let list = shopping_list(&db, day(1), 7).unwrap();
        assert!(list.recipes.is_empty());
        assert!(list.products.is_empty());
        assert_eq!(list.days, 7);
    }
}
