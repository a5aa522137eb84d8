use anyhow::Result;

use plate_core::service::PlannerService;

use super::helpers::{exit_if_not_found, print_recipe_table, print_totals};

pub(crate) fn cmd_item_servings(
    svc: &PlannerService,
    item_id: i64,
    servings: f64,
    json: bool,
) -> Result<()> {
    let totals = match svc.update_item_servings(item_id, servings) {
        Ok(totals) => totals,
        Err(e) => {
            exit_if_not_found(&e, json);
            return Err(e.into());
        }
    };

    if json {
        println!(
            "{}",
            serde_json::json!({ "item_id": item_id, "servings": servings, "totals": totals })
        );
    } else {
        println!("Item {item_id} set to {servings} serving(s).");
        print_totals("Plan total", &totals, None);
    }
    Ok(())
}

pub(crate) fn cmd_item_substitute(
    svc: &PlannerService,
    item_id: i64,
    recipe_id: i64,
    json: bool,
) -> Result<()> {
    let totals = match svc.substitute_item(item_id, recipe_id) {
        Ok(totals) => totals,
        Err(e) => {
            exit_if_not_found(&e, json);
            return Err(e.into());
        }
    };

    if json {
        println!(
            "{}",
            serde_json::json!({ "item_id": item_id, "recipe_id": recipe_id, "totals": totals })
        );
    } else {
        println!("Item {item_id} now uses recipe {recipe_id}.");
        print_totals("Plan total", &totals, None);
    }
    Ok(())
}

pub(crate) fn cmd_item_alternatives(
    svc: &PlannerService,
    recipe_id: i64,
    limit: usize,
    json: bool,
) -> Result<()> {
    let candidates = match svc.rank_substitutes(recipe_id, limit) {
        Ok(candidates) => candidates,
        Err(e) => {
            exit_if_not_found(&e, json);
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
    } else if candidates.is_empty() {
        println!("No recipes share a tag with recipe {recipe_id}.");
    } else {
        let recipes: Vec<_> = candidates.iter().map(|c| &c.recipe).collect();
        let shared: Vec<i64> = candidates.iter().map(|c| c.shared_tags).collect();
        print_recipe_table(&recipes, Some(&shared));
    }
    Ok(())
}
