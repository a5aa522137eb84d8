use std::path::Path;

use anyhow::{Context, Result};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use plate_core::import::{CatalogBundle, ImportSummary, parse_bundle, parse_products_csv};
use plate_core::models::{Product, Recipe};
use plate_core::service::PlannerService;

use super::helpers::{print_recipe_table, truncate};

/// Read a catalog file. `.csv` files are products; anything else is a JSON
/// bundle with `recipes` and `products`.
pub(crate) fn read_catalog_file(path: &Path) -> Result<CatalogBundle> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        Ok(CatalogBundle {
            recipes: Vec::new(),
            products: parse_products_csv(file)?,
        })
    } else {
        parse_bundle(file)
    }
}

pub(crate) fn cmd_catalog_import(
    svc: &PlannerService,
    path: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let bundle = read_catalog_file(path)?;

    if bundle.recipes.is_empty() && bundle.products.is_empty() {
        if json {
            println!(
                "{}",
                serde_json::json!({ "error": "No recipes or products found in file" })
            );
        } else {
            eprintln!("No recipes or products found in file.");
        }
        return Ok(());
    }

    let summary = svc.import_catalog(&bundle, dry_run)?;

    if json {
        let mut value = serde_json::to_value(&summary)?;
        value["dry_run"] = serde_json::Value::Bool(dry_run);
        println!("{value}");
    } else {
        print_import_summary(&summary, dry_run);
    }
    Ok(())
}

fn print_import_summary(summary: &ImportSummary, dry_run: bool) {
    if dry_run {
        println!("Dry run, no changes made.\n");
        println!("  Recipes to add:     {}", summary.recipes_added);
        println!("  Recipes to update:  {}", summary.recipes_updated);
        println!("  Products to add:    {}", summary.products_added);
        println!("  Products to update: {}", summary.products_updated);
    } else {
        println!("Import complete.\n");
        println!("  Recipes added:      {}", summary.recipes_added);
        println!("  Recipes updated:    {}", summary.recipes_updated);
        println!("  Products added:     {}", summary.products_added);
        println!("  Products updated:   {}", summary.products_updated);
    }
    if summary.skipped > 0 {
        println!("  Skipped (no name):  {}", summary.skipped);
    }
}

fn matches_search(name: &str, search: Option<&str>) -> bool {
    search.is_none_or(|q| name.to_lowercase().contains(&q.trim().to_lowercase()))
}

/// Exact, case-insensitive match against any tag of the recipe.
fn matches_tag(recipe: &Recipe, tag: Option<&str>) -> bool {
    tag.is_none_or(|t| recipe.has_any_tag(&[t.trim().to_lowercase()]))
}

pub(crate) fn cmd_catalog_recipes(
    svc: &PlannerService,
    search: Option<&str>,
    tag: Option<&str>,
    json: bool,
) -> Result<()> {
    let recipes: Vec<Recipe> = svc
        .list_recipes()?
        .into_iter()
        .filter(|r| matches_search(&r.title, search) && matches_tag(r, tag))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
    } else if recipes.is_empty() {
        println!("No recipes found.");
    } else {
        let refs: Vec<&Recipe> = recipes.iter().collect();
        print_recipe_table(&refs, None);
    }
    Ok(())
}

pub(crate) fn cmd_catalog_products(
    svc: &PlannerService,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    let products: Vec<Product> = svc
        .list_products()?
        .into_iter()
        .filter(|p| matches_search(&p.name, search))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&products)?);
        return Ok(());
    }
    if products.is_empty() {
        println!("No products found.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct ProductRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Brand")]
        brand: String,
        #[tabled(rename = "Cal/100g")]
        calories: String,
        #[tabled(rename = "P/100g")]
        protein: String,
        #[tabled(rename = "C/100g")]
        carbs: String,
        #[tabled(rename = "F/100g")]
        fat: String,
        #[tabled(rename = "SKU")]
        sku: String,
    }

    let rows: Vec<ProductRow> = products
        .iter()
        .map(|p| ProductRow {
            id: p.id,
            name: truncate(&p.name, 35),
            brand: p
                .brand
                .as_deref()
                .map(|b| truncate(b, 20))
                .unwrap_or_default(),
            calories: p.calories_per_100.map_or("-".into(), |v| format!("{v:.0}")),
            protein: p.protein_per_100.map_or("-".into(), |v| format!("{v:.1}")),
            carbs: p.carbs_per_100.map_or("-".into(), |v| format!("{v:.1}")),
            fat: p.fat_per_100.map_or("-".into(), |v| format!("{v:.1}")),
            sku: p.sku.clone().unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plate_core::models::Tag;
    use std::io::Write;

    #[test]
    fn test_read_csv_and_json_files() {
        let dir = tempfile::tempdir().unwrap();

        let csv_path = dir.path().join("products.CSV");
        let mut f = std::fs::File::create(&csv_path).unwrap();
        writeln!(f, "name,sku,kcal_per_100").unwrap();
        writeln!(f, "Kwark,K1,60").unwrap();
        let bundle = read_catalog_file(&csv_path).unwrap();
        assert_eq!(bundle.products.len(), 1);
        assert!(bundle.recipes.is_empty());

        let json_path = dir.path().join("catalog.json");
        std::fs::write(&json_path, r#"{"recipes": [{"title": "Dahl", "calories": 450}]}"#)
            .unwrap();
        let bundle = read_catalog_file(&json_path).unwrap();
        assert_eq!(bundle.recipes[0].title, "Dahl");
        assert!(bundle.products.is_empty());

        assert!(read_catalog_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_matches_search() {
        assert!(matches_search("Griekse Yoghurt", None));
        assert!(matches_search("Griekse Yoghurt", Some(" yoghurt")));
        assert!(!matches_search("Griekse Yoghurt", Some("kwark")));
    }

    #[test]
    fn test_matches_tag_is_exact_and_case_insensitive() {
        let recipe = Recipe {
            id: 1,
            title: "Shakshuka".to_string(),
            source: None,
            url: None,
            servings: Some(2.0),
            calories: Some(420.0),
            protein_g: None,
            carbs_g: None,
            fat_g: None,
            fiber_g: None,
            tags: vec![
                Tag {
                    name: "Ontbijt".to_string(),
                    tag_type: Some("course".to_string()),
                },
                Tag {
                    name: "vegetarisch".to_string(),
                    tag_type: None,
                },
            ],
        };
        assert!(matches_tag(&recipe, None));
        assert!(matches_tag(&recipe, Some("ontbijt")));
        assert!(matches_tag(&recipe, Some(" VEGETARISCH ")));
        assert!(!matches_tag(&recipe, Some("ontbij")));
        assert!(!matches_tag(&recipe, Some("lunch")));
    }
}
