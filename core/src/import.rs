use std::collections::HashSet;
use std::io::Read;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{self, Database};
use crate::models::{NewProduct, NewRecipe};

/// Normalized catalog data, as read from a JSON bundle or a products CSV.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogBundle {
    #[serde(default)]
    pub recipes: Vec<NewRecipe>,
    #[serde(default)]
    pub products: Vec<NewProduct>,
}

/// What an import did, or would do for a dry run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub recipes_added: usize,
    pub recipes_updated: usize,
    pub products_added: usize,
    pub products_updated: usize,
    /// Entries without a title or name.
    pub skipped: usize,
}

pub fn parse_bundle<R: Read>(reader: R) -> Result<CatalogBundle> {
    serde_json::from_reader(reader).context("Failed to parse catalog JSON")
}

/// Parse a products CSV. Header names are matched case-insensitively:
/// `name` is required; `brand`, `sku`, `kcal_per_100`, `protein_g_per_100`,
/// `carbs_g_per_100`, `fat_g_per_100` and `fiber_g_per_100` are optional.
pub fn parse_products_csv<R: Read>(reader: R) -> Result<Vec<NewProduct>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();
    let col =
        |name: &str| -> Option<usize> { headers.iter().position(|h| h.eq_ignore_ascii_case(name)) };

    let Some(idx_name) = col("name") else {
        bail!("Missing required column: name");
    };
    let idx_brand = col("brand");
    let idx_sku = col("sku");
    let idx_kcal = col("kcal_per_100");
    let idx_protein = col("protein_g_per_100");
    let idx_carbs = col("carbs_g_per_100");
    let idx_fat = col("fat_g_per_100");
    let idx_fiber = col("fiber_g_per_100");

    let mut products = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 2))?;

        let text = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
        };
        let number = |idx: Option<usize>| -> Result<Option<f64>> {
            match text(idx) {
                None => Ok(None),
                Some(v) => v
                    .replace(',', ".")
                    .parse::<f64>()
                    .map(Some)
                    .with_context(|| format!("Invalid number '{v}' on CSV row {}", line_num + 2)),
            }
        };

        let Some(name) = text(Some(idx_name)) else {
            continue;
        };
        products.push(NewProduct {
            name,
            brand: text(idx_brand),
            sku: text(idx_sku),
            calories_per_100: number(idx_kcal)?,
            protein_per_100: number(idx_protein)?,
            carbs_per_100: number(idx_carbs)?,
            fat_per_100: number(idx_fat)?,
            fiber_per_100: number(idx_fiber)?,
        });
    }

    Ok(products)
}

/// Write a bundle to the catalog in one transaction. Recipes with a known URL
/// and products with a known SKU are updated in place. With `dry_run` nothing
/// is written and the summary reports what would happen.
pub fn import_catalog(db: &Database, bundle: &CatalogBundle, dry_run: bool) -> Result<ImportSummary> {
    let summary = if dry_run {
        preview(db, bundle)?
    } else {
        db.write(|conn| {
            let mut summary = ImportSummary::default();
            for recipe in &bundle.recipes {
                if recipe.title.trim().is_empty() {
                    summary.skipped += 1;
                    continue;
                }
                let (_, inserted) = db::upsert_recipe(conn, recipe)?;
                if inserted {
                    summary.recipes_added += 1;
                } else {
                    summary.recipes_updated += 1;
                }
            }
            for product in &bundle.products {
                if product.name.trim().is_empty() {
                    summary.skipped += 1;
                    continue;
                }
                let (_, inserted) = db::upsert_product(conn, product)?;
                if inserted {
                    summary.products_added += 1;
                } else {
                    summary.products_updated += 1;
                }
            }
            Ok(summary)
        })
        .context("Catalog import failed")?
    };

    if summary.skipped > 0 {
        warn!(skipped = summary.skipped, "skipped catalog entries without a name");
    }
    info!(
        dry_run,
        recipes_added = summary.recipes_added,
        recipes_updated = summary.recipes_updated,
        products_added = summary.products_added,
        products_updated = summary.products_updated,
        "catalog import finished"
    );
    Ok(summary)
}

fn preview(db: &Database, bundle: &CatalogBundle) -> Result<ImportSummary> {
    let conn = db.conn();
    let mut summary = ImportSummary::default();
    let mut seen_urls: HashSet<&str> = HashSet::new();
    let mut seen_skus: HashSet<&str> = HashSet::new();

    for recipe in &bundle.recipes {
        if recipe.title.trim().is_empty() {
            summary.skipped += 1;
            continue;
        }
        let known = match recipe.url.as_deref() {
            Some(url) => !seen_urls.insert(url) || db::recipe_id_by_url(conn, url)?.is_some(),
            None => false,
        };
        if known {
            summary.recipes_updated += 1;
        } else {
            summary.recipes_added += 1;
        }
    }
    for product in &bundle.products {
        if product.name.trim().is_empty() {
            summary.skipped += 1;
            continue;
        }
        let known = match product.sku.as_deref() {
            Some(sku) => !seen_skus.insert(sku) || db::product_id_by_sku(conn, sku)?.is_some(),
            None => false,
        };
        if known {
            summary.products_updated += 1;
        } else {
            summary.products_added += 1;
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
Name,Brand,SKU,kcal_per_100,protein_g_per_100,carbs_g_per_100,fat_g_per_100,fiber_g_per_100
Magere kwark,Huismerk,8710400000011,60,10.3,4,0.2,
Pindakaas,,8710400000028,\"620,5\",25,12,50,6
,,,,,,,
Havermout,Quaker,,375,13,60,7,10
";

    #[test]
    fn test_parse_products_csv() {
        let products = parse_products_csv(CSV.as_bytes()).unwrap();
        assert_eq!(products.len(), 3);

        assert_eq!(products[0].name, "Magere kwark");
        assert_eq!(products[0].brand.as_deref(), Some("Huismerk"));
        assert_eq!(products[0].fiber_per_100, None);
        assert!((products[1].calories_per_100.unwrap() - 620.5).abs() < 0.001);
        assert_eq!(products[1].brand, None);
        assert_eq!(products[2].sku, None);
    }

    #[test]
    fn test_parse_csv_requires_name_column() {
        let err = parse_products_csv("sku,kcal_per_100\n123,50\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_parse_csv_rejects_bad_number() {
        let err = parse_products_csv("name,kcal_per_100\nKaas,veel\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("veel"));
    }

    #[test]
    fn test_parse_bundle() {
        let json = r#"{
            "recipes": [{"title": "Shakshuka", "url": "https://example.org/shakshuka",
                         "calories": 420, "tags": [{"name": "ontbijt"}],
                         "ingredients": [{"name": "Eieren", "quantity": 4, "unit": "stuk"},
                                         {"name": "Komijn", "raw": "snufje komijn"}]}],
            "products": [{"name": "Eieren", "sku": "EGG-10", "calories_per_100": 143}]
        }"#;
        let bundle = parse_bundle(json.as_bytes()).unwrap();
        assert_eq!(bundle.recipes.len(), 1);
        assert_eq!(bundle.recipes[0].tags[0].name, "ontbijt");
        let ingredients = &bundle.recipes[0].ingredients;
        assert_eq!(ingredients[0].quantity, Some(4.0));
        assert_eq!(ingredients[0].unit.as_deref(), Some("stuk"));
        assert_eq!(ingredients[1].raw.as_deref(), Some("snufje komijn"));
        assert_eq!(bundle.products[0].sku.as_deref(), Some("EGG-10"));

        let empty = parse_bundle("{}".as_bytes()).unwrap();
        assert!(empty.recipes.is_empty() && empty.products.is_empty());
    }

    #[test]
    fn test_import_upserts_by_sku_and_url() {
        let db = Database::open_in_memory().unwrap();
        let bundle = CatalogBundle {
            recipes: vec![NewRecipe {
                title: "Linzensoep".to_string(),
                url: Some("https://example.org/linzensoep".to_string()),
                calories: Some(380.0),
                ..NewRecipe::default()
            }],
            products: parse_products_csv(CSV.as_bytes()).unwrap(),
        };

        let first = import_catalog(&db, &bundle, false).unwrap();
        assert_eq!(first.recipes_added, 1);
        assert_eq!(first.products_added, 3);
        assert_eq!(first.products_updated, 0);

        let second = import_catalog(&db, &bundle, false).unwrap();
        assert_eq!(second.recipes_updated, 1);
        assert_eq!(second.products_updated, 2);
        // No SKU means no way to match; inserted again
        assert_eq!(second.products_added, 1);
        assert_eq!(db.list_recipes().unwrap().len(), 1);
        assert_eq!(db.list_products().unwrap().len(), 4);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let products = parse_products_csv(CSV.as_bytes()).unwrap();
        import_catalog(
            &db,
            &CatalogBundle {
                recipes: Vec::new(),
                products: products[..1].to_vec(),
            },
            false,
        )
        .unwrap();

        let bundle = CatalogBundle {
            recipes: vec![NewRecipe {
                title: "  ".to_string(),
                ..NewRecipe::default()
            }],
            products,
        };
        let summary = import_catalog(&db, &bundle, true).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                recipes_added: 0,
                recipes_updated: 0,
                products_added: 2,
                products_updated: 1,
                skipped: 1,
            }
        );
        assert_eq!(db.list_products().unwrap().len(), 1);
        assert!(db.list_recipes().unwrap().is_empty());
    }
}
