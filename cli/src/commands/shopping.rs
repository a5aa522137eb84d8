use anyhow::{Result, bail};
use chrono::NaiveDate;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use plate_core::models::ShoppingList;
use plate_core::service::PlannerService;
use plate_core::shopping::MAX_SHOPPING_DAYS;

use super::helpers::truncate;

#[derive(Tabled)]
struct ShoppingRow {
    #[tabled(rename = "Item")]
    name: String,
    #[tabled(rename = "Amount")]
    amount: String,
}

fn check_days(days: u32) -> Result<()> {
    if days == 0 || days > MAX_SHOPPING_DAYS {
        bail!("--days must be between 1 and {MAX_SHOPPING_DAYS}");
    }
    Ok(())
}

fn ingredient_rows(list: &ShoppingList) -> Vec<ShoppingRow> {
    list.ingredients
        .iter()
        .map(|i| ShoppingRow {
            name: truncate(&i.name, 45),
            amount: format!("{:.1} {}", i.quantity, i.unit),
        })
        .chain(list.other_ingredients.iter().map(|f| ShoppingRow {
            name: truncate(&f.text, 45),
            amount: format!("{}x", f.count),
        }))
        .collect()
}

fn planned_rows(list: &ShoppingList) -> Vec<ShoppingRow> {
    list.recipes
        .iter()
        .map(|r| ShoppingRow {
            name: truncate(&r.title, 45),
            amount: format!("{:.1} serving(s)", r.servings),
        })
        .chain(list.products.iter().map(|p| ShoppingRow {
            name: truncate(&p.name, 45),
            amount: format!("{:.0} g", p.grams),
        }))
        .collect()
}

fn print_table(rows: &[ShoppingRow]) {
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_shopping(
    svc: &PlannerService,
    start: NaiveDate,
    days: u32,
    json: bool,
) -> Result<()> {
    check_days(days)?;
    let list = svc.shopping_list(start, days)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }
    if list.recipes.is_empty() && list.products.is_empty() {
        println!("No planned items between {start} and the following {days} day(s).");
        return Ok(());
    }

    println!("Shopping list for {days} day(s) from {start}");
    let ingredients = ingredient_rows(&list);
    if !ingredients.is_empty() {
        println!("\nIngredients");
        print_table(&ingredients);
    }
    println!("\nPlanned recipes and products");
    print_table(&planned_rows(&list));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plate_core::models::{ShoppingFreeItem, ShoppingIngredient, ShoppingProduct};

    #[test]
    fn test_check_days_bounds() {
        assert!(check_days(0).is_err());
        assert!(check_days(1).is_ok());
        assert!(check_days(MAX_SHOPPING_DAYS).is_ok());
        assert!(check_days(MAX_SHOPPING_DAYS + 1).is_err());
        assert!(check_days(u32::MAX).is_err());
    }

    #[test]
    fn test_rows_list_quantities_before_free_text() {
        let list = ShoppingList {
            start: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
            days: 7,
            ingredients: vec![ShoppingIngredient {
                name: "Spaghetti".to_string(),
                unit: "g".to_string(),
                quantity: 300.0,
            }],
            other_ingredients: vec![ShoppingFreeItem {
                text: "zout naar smaak".to_string(),
                count: 3,
            }],
            recipes: Vec::new(),
            products: vec![ShoppingProduct {
                product_id: 1,
                name: "Kwark".to_string(),
                grams: 350.0,
            }],
        };
        let rows = ingredient_rows(&list);
        assert_eq!(rows[0].amount, "300.0 g");
        assert_eq!(rows[1].name, "zout naar smaak");
        assert_eq!(rows[1].amount, "3x");
        assert_eq!(planned_rows(&list)[0].amount, "350 g");
    }
}
