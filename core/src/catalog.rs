use rusqlite::Connection;
use tracing::{debug, warn};

use crate::db;
use crate::error::PlanResult;
use crate::models::{Product, Recipe};

/// Catalog rows eligible for one planning run, both in ascending id order.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub recipes: Vec<Recipe>,
    pub products: Vec<Product>,
}

/// Trim and lowercase exclusion terms, dropping blanks.
#[must_use]
pub fn normalize_exclusions(exclusions: &[String]) -> Vec<String> {
    exclusions
        .iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// True when `name` contains any (already normalized) exclusion term.
#[must_use]
pub fn is_excluded(name: &str, exclusions: &[String]) -> bool {
    if exclusions.is_empty() {
        return false;
    }
    let name = name.to_lowercase();
    exclusions.iter().any(|ex| name.contains(ex.as_str()))
}

pub fn load_candidates(conn: &Connection, exclusions: &[String]) -> PlanResult<Candidates> {
    let exclusions = normalize_exclusions(exclusions);

    let mut recipes = db::all_recipes(conn)?;
    let total_recipes = recipes.len();
    recipes.retain(|r| !is_excluded(&r.title, &exclusions));

    let mut products = db::all_products(conn)?;
    let total_products = products.len();
    products.retain(|p| !is_excluded(&p.name, &exclusions));

    debug!(
        recipes = recipes.len(),
        recipes_excluded = total_recipes - recipes.len(),
        products = products.len(),
        products_excluded = total_products - products.len(),
        "loaded plan candidates"
    );
    if recipes.is_empty() {
        warn!("no recipes available after exclusions; plan slots will stay empty");
    }
    if products.is_empty() {
        debug!("no products available; gap filling skipped");
    }

    Ok(Candidates { recipes, products })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{NewProduct, NewRecipe, Tag};

    fn recipe(title: &str, tags: &[&str]) -> NewRecipe {
        NewRecipe {
            title: title.to_string(),
            calories: Some(400.0),
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

    #[test]
    fn test_normalize_exclusions_drops_blanks() {
        let ex = normalize_exclusions(&[" Noten ".to_string(), String::new(), "  ".to_string()]);
        assert_eq!(ex, vec!["noten".to_string()]);
    }

    #[test]
    fn test_empty_term_excludes_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.insert_recipe(&recipe("Pasta pesto", &[])).unwrap();
        let c = load_candidates(db.conn(), &[String::new()]).unwrap();
        assert_eq!(c.recipes.len(), 1);
    }

    #[test]
    fn test_exclusion_is_case_insensitive_substring() {
        let db = Database::open_in_memory().unwrap();
        db.insert_recipe(&recipe("Notenmix salade", &["lunch"]))
            .unwrap();
        db.insert_recipe(&recipe("Tomatensoep", &["lunch"])).unwrap();
        db.insert_product(&NewProduct {
            name: "Gemengde NOTEN".to_string(),
            calories_per_100: Some(600.0),
            ..NewProduct::default()
        })
        .unwrap();
        db.insert_product(&NewProduct {
            name: "Volle yoghurt".to_string(),
            calories_per_100: Some(60.0),
            ..NewProduct::default()
        })
        .unwrap();

        let c = load_candidates(db.conn(), &["noten".to_string()]).unwrap();
        let titles: Vec<&str> = c.recipes.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Tomatensoep"]);
        assert_eq!(c.products.len(), 1);
        assert_eq!(c.products[0].name, "Volle yoghurt");
    }

    #[test]
    fn test_empty_catalog_is_not_an_error() {
        let db = Database::open_in_memory().unwrap();
        let c = load_candidates(db.conn(), &[]).unwrap();
        assert!(c.recipes.is_empty());
        assert!(c.products.is_empty());
    }
}
