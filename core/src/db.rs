use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};

use crate::error::{PlanError, PlanResult};
use crate::models::{
    Ingredient, ItemType, MacroSnapshot, MacroSplit, Macros, MealPlan, MealPlanItem, NewProduct, NewRecipe,
    PlanDetail, PlanDetailItem, PlanItem, Product, Recipe, Tag, validate_macro_split,
};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open a file-backed store in WAL mode. `busy_timeout` is how long SQLite
    /// itself waits on a locked database before reporting busy.
    pub fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened database");
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", "ON")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    source TEXT,
                    url TEXT UNIQUE,
                    servings REAL,
                    kcal_per_serving REAL,
                    protein_g REAL,
                    carbs_g REAL,
                    fat_g REAL,
                    fiber_g REAL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_tags (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    tag TEXT NOT NULL,
                    tag_type TEXT
                );

                CREATE TABLE IF NOT EXISTS products (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    brand TEXT,
                    sku TEXT UNIQUE,
                    kcal_per_100 REAL,
                    protein_per_100 REAL,
                    carbs_per_100 REAL,
                    fat_per_100 REAL,
                    fiber_per_100 REAL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_plans (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    date TEXT NOT NULL UNIQUE,
                    target_calories REAL NOT NULL,
                    meal_count INTEGER NOT NULL,
                    macros_json TEXT,
                    total_calories REAL NOT NULL DEFAULT 0,
                    total_protein REAL NOT NULL DEFAULT 0,
                    total_carbs REAL NOT NULL DEFAULT 0,
                    total_fat REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_plan_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    meal_plan_id INTEGER NOT NULL REFERENCES meal_plans(id) ON DELETE CASCADE,
                    meal_index INTEGER NOT NULL,
                    item_type TEXT NOT NULL CHECK (item_type IN ('recipe', 'product')),
                    item_id INTEGER NOT NULL,
                    servings REAL NOT NULL,
                    notes TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_recipe_tags_recipe ON recipe_tags(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_recipe_tags_tag ON recipe_tags(tag);
                CREATE INDEX IF NOT EXISTS idx_meal_plan_items_plan ON meal_plan_items(meal_plan_id);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 2;",
            )?;
        }

        if version < 3 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    quantity REAL,
                    unit TEXT,
                    raw TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_ingredients_recipe ON ingredients(recipe_id);

                PRAGMA user_version = 3;",
            )?;
        }

        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside an immediate (write-locking) transaction. The transaction
    /// rolls back when `f` or the commit fails.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Connection) -> PlanResult<T>) -> PlanResult<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // --- Catalog ---

    pub fn insert_recipe(&self, recipe: &NewRecipe) -> PlanResult<Recipe> {
        let id = self.write(|conn| insert_recipe(conn, recipe))?;
        get_recipe(&self.conn, id)
    }

    pub fn get_recipe(&self, id: i64) -> PlanResult<Recipe> {
        get_recipe(&self.conn, id)
    }

    pub fn list_recipes(&self) -> PlanResult<Vec<Recipe>> {
        all_recipes(&self.conn)
    }

    pub fn recipe_ingredients(&self, recipe_id: i64) -> PlanResult<Vec<Ingredient>> {
        recipe_ingredients(&self.conn, recipe_id)
    }

    pub fn insert_product(&self, product: &NewProduct) -> PlanResult<Product> {
        let (id, _) = self.write(|conn| upsert_product(conn, product))?;
        get_product(&self.conn, id)
    }

    pub fn get_product(&self, id: i64) -> PlanResult<Product> {
        get_product(&self.conn, id)
    }

    pub fn list_products(&self) -> PlanResult<Vec<Product>> {
        all_products(&self.conn)
    }

    // --- Plans ---

    pub fn get_plan_by_date(&self, date: NaiveDate) -> PlanResult<Option<MealPlan>> {
        find_plan_by_date(&self.conn, date)
    }

    pub fn get_plan(&self, id: i64) -> PlanResult<MealPlan> {
        get_plan(&self.conn, id)
    }

    pub fn get_plan_items(&self, plan_id: i64) -> PlanResult<Vec<MealPlanItem>> {
        plan_items(&self.conn, plan_id)
    }

    pub fn get_plan_item(&self, id: i64) -> PlanResult<MealPlanItem> {
        get_plan_item(&self.conn, id)
    }

    /// The plan stored for `date` with each item resolved against the
    /// current catalog.
    pub fn get_plan_detail(&self, date: NaiveDate) -> PlanResult<Option<PlanDetail>> {
        let Some(plan) = find_plan_by_date(&self.conn, date)? else {
            return Ok(None);
        };
        let items = plan_items(&self.conn, plan.id)?
            .into_iter()
            .map(|item| {
                let (macros, title) = item_contribution(&self.conn, &item)?;
                Ok(PlanDetailItem {
                    item,
                    title,
                    macros,
                })
            })
            .collect::<PlanResult<Vec<_>>>()?;
        Ok(Some(PlanDetail { plan, items }))
    }

    /// Most recent plans first.
    pub fn list_plans(&self, limit: usize) -> PlanResult<Vec<MealPlan>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM meal_plans ORDER BY date DESC LIMIT ?1"
        ))?;
        let plans = stmt
            .query_map(params![limit], plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    /// Plans with `start <= date < end`, oldest first.
    pub fn plans_between(&self, start: NaiveDate, end: NaiveDate) -> PlanResult<Vec<MealPlan>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM meal_plans WHERE date >= ?1 AND date < ?2 ORDER BY date"
        ))?;
        let plans = stmt
            .query_map(params![date_key(start), date_key(end)], plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    // --- Settings ---

    pub fn set_setting(&self, key: &str, value: &str) -> PlanResult<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> PlanResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Stored default macro split, or 30/35/35 when none was saved.
    pub fn macro_split(&self) -> Result<MacroSplit> {
        match self.get_setting("macro_split")? {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Stored macro split '{raw}' is invalid")),
            None => Ok(MacroSplit::default()),
        }
    }

    pub fn set_macro_split(&self, split: MacroSplit) -> Result<()> {
        validate_macro_split(split.protein_pct, split.carbs_pct, split.fat_pct)?;
        let raw = format!(
            "{}/{}/{}",
            split.protein_pct, split.carbs_pct, split.fat_pct
        );
        self.set_setting("macro_split", &raw)?;
        Ok(())
    }
}

// --- Row mapping helpers ---

pub(crate) fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn date_from_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const RECIPE_COLUMNS: &str =
    "id, title, source, url, servings, kcal_per_serving, protein_g, carbs_g, fat_g, fiber_g";

fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
    Ok(Recipe {
        id: row.get(0)?,
        title: row.get(1)?,
        source: row.get(2)?,
        url: row.get(3)?,
        servings: row.get(4)?,
        calories: row.get(5)?,
        protein_g: row.get(6)?,
        carbs_g: row.get(7)?,
        fat_g: row.get(8)?,
        fiber_g: row.get(9)?,
        tags: Vec::new(),
    })
}

const PRODUCT_COLUMNS: &str = "id, name, brand, sku, kcal_per_100, protein_per_100, carbs_per_100, fat_per_100, fiber_per_100";

fn product_from_row(row: &rusqlite::Row) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        brand: row.get(2)?,
        sku: row.get(3)?,
        calories_per_100: row.get(4)?,
        protein_per_100: row.get(5)?,
        carbs_per_100: row.get(6)?,
        fat_per_100: row.get(7)?,
        fiber_per_100: row.get(8)?,
    })
}

const PLAN_COLUMNS: &str = "id, date, target_calories, meal_count, macros_json, total_calories, total_protein, total_carbs, total_fat, created_at";

fn plan_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealPlan> {
    let snapshot = row
        .get::<_, Option<String>>(4)?
        .map(|raw| serde_json::from_str::<MacroSnapshot>(&raw))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(MealPlan {
        id: row.get(0)?,
        date: date_from_column(row, 1)?,
        target_calories: row.get(2)?,
        meal_count: row.get(3)?,
        snapshot,
        totals: Macros {
            calories: row.get(5)?,
            protein_g: row.get(6)?,
            carbs_g: row.get(7)?,
            fat_g: row.get(8)?,
        },
        created_at: row.get(9)?,
    })
}

const ITEM_COLUMNS: &str = "id, meal_plan_id, meal_index, item_type, item_id, servings, notes";

fn plan_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealPlanItem> {
    Ok(MealPlanItem {
        id: row.get(0)?,
        meal_plan_id: row.get(1)?,
        meal_index: row.get(2)?,
        item_type: row.get(3)?,
        item_id: row.get(4)?,
        servings: row.get(5)?,
        notes: row.get(6)?,
    })
}

// --- Catalog queries ---

pub(crate) fn find_recipe(conn: &Connection, id: i64) -> PlanResult<Option<Recipe>> {
    let recipe = conn
        .query_row(
            &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?1"),
            params![id],
            recipe_from_row,
        )
        .optional()?;
    let Some(mut recipe) = recipe else {
        return Ok(None);
    };
    let mut stmt =
        conn.prepare("SELECT tag, tag_type FROM recipe_tags WHERE recipe_id = ?1 ORDER BY id")?;
    recipe.tags = stmt
        .query_map(params![id], |row| {
            Ok(Tag {
                name: row.get(0)?,
                tag_type: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(recipe))
}

pub(crate) fn get_recipe(conn: &Connection, id: i64) -> PlanResult<Recipe> {
    find_recipe(conn, id)?.ok_or_else(|| PlanError::not_found("recipe", id))
}

/// Ingredients of a recipe in insertion order. Empty for unknown ids.
pub(crate) fn recipe_ingredients(conn: &Connection, recipe_id: i64) -> PlanResult<Vec<Ingredient>> {
    let mut stmt = conn.prepare(
        "SELECT name, quantity, unit, raw FROM ingredients WHERE recipe_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![recipe_id], |row| {
            Ok(Ingredient {
                name: row.get(0)?,
                quantity: row.get(1)?,
                unit: row.get(2)?,
                raw: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All recipes with their tags, ordered by id.
pub(crate) fn all_recipes(conn: &Connection) -> PlanResult<Vec<Recipe>> {
    let mut tags: HashMap<i64, Vec<Tag>> = HashMap::new();
    {
        let mut stmt = conn.prepare("SELECT recipe_id, tag, tag_type FROM recipe_tags ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Tag {
                    name: row.get(1)?,
                    tag_type: row.get(2)?,
                },
            ))
        })?;
        for row in rows {
            let (recipe_id, tag) = row?;
            tags.entry(recipe_id).or_default().push(tag);
        }
    }

    let mut stmt = conn.prepare(&format!("SELECT {RECIPE_COLUMNS} FROM recipes ORDER BY id"))?;
    let mut recipes = stmt
        .query_map([], recipe_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for recipe in &mut recipes {
        recipe.tags = tags.remove(&recipe.id).unwrap_or_default();
    }
    Ok(recipes)
}

pub(crate) fn find_product(conn: &Connection, id: i64) -> PlanResult<Option<Product>> {
    let product = conn
        .query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
            params![id],
            product_from_row,
        )
        .optional()?;
    Ok(product)
}

pub(crate) fn get_product(conn: &Connection, id: i64) -> PlanResult<Product> {
    find_product(conn, id)?.ok_or_else(|| PlanError::not_found("product", id))
}

/// All products ordered by id.
pub(crate) fn all_products(conn: &Connection) -> PlanResult<Vec<Product>> {
    let mut stmt = conn.prepare(&format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id"))?;
    let products = stmt
        .query_map([], product_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(products)
}

/// Recipes other than `recipe_id` sharing at least one tag with it, with the
/// number of distinct shared tags. Most overlap first, then lowest id.
pub(crate) fn recipes_sharing_tags(
    conn: &Connection,
    recipe_id: i64,
    limit: usize,
) -> PlanResult<Vec<(i64, i64)>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT other.recipe_id, COUNT(DISTINCT lower(other.tag)) AS shared
         FROM recipe_tags other
         JOIN recipe_tags mine ON lower(mine.tag) = lower(other.tag)
         WHERE mine.recipe_id = ?1 AND other.recipe_id != ?1
         GROUP BY other.recipe_id
         ORDER BY shared DESC, other.recipe_id ASC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![recipe_id, limit], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn insert_recipe(conn: &Connection, recipe: &NewRecipe) -> PlanResult<i64> {
    let now = Local::now().to_rfc3339();
    conn.execute(
        "INSERT INTO recipes (title, source, url, servings, kcal_per_serving, protein_g, carbs_g, fat_g, fiber_g, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            recipe.title,
            recipe.source,
            recipe.url,
            recipe.servings,
            recipe.calories,
            recipe.protein_g,
            recipe.carbs_g,
            recipe.fat_g,
            recipe.fiber_g,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    insert_tags(conn, id, &recipe.tags)?;
    insert_ingredients(conn, id, &recipe.ingredients)?;
    Ok(id)
}

pub(crate) fn recipe_id_by_url(conn: &Connection, url: &str) -> PlanResult<Option<i64>> {
    let id = conn
        .query_row("SELECT id FROM recipes WHERE url = ?1", params![url], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(id)
}

pub(crate) fn product_id_by_sku(conn: &Connection, sku: &str) -> PlanResult<Option<i64>> {
    let id = conn
        .query_row("SELECT id FROM products WHERE sku = ?1", params![sku], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(id)
}

/// Insert or, when a recipe with the same URL exists, update it in place and
/// replace its tags and ingredients. Returns `(id, inserted)`.
pub(crate) fn upsert_recipe(conn: &Connection, recipe: &NewRecipe) -> PlanResult<(i64, bool)> {
    let existing = match &recipe.url {
        Some(url) => recipe_id_by_url(conn, url)?,
        None => None,
    };
    let Some(id) = existing else {
        return Ok((insert_recipe(conn, recipe)?, true));
    };
    conn.execute(
        "UPDATE recipes SET title = ?1, source = ?2, servings = ?3, kcal_per_serving = ?4,
         protein_g = ?5, carbs_g = ?6, fat_g = ?7, fiber_g = ?8 WHERE id = ?9",
        params![
            recipe.title,
            recipe.source,
            recipe.servings,
            recipe.calories,
            recipe.protein_g,
            recipe.carbs_g,
            recipe.fat_g,
            recipe.fiber_g,
            id,
        ],
    )?;
    conn.execute("DELETE FROM recipe_tags WHERE recipe_id = ?1", params![id])?;
    insert_tags(conn, id, &recipe.tags)?;
    conn.execute("DELETE FROM ingredients WHERE recipe_id = ?1", params![id])?;
    insert_ingredients(conn, id, &recipe.ingredients)?;
    Ok((id, false))
}

fn insert_tags(conn: &Connection, recipe_id: i64, tags: &[Tag]) -> PlanResult<()> {
    let mut stmt =
        conn.prepare("INSERT INTO recipe_tags (recipe_id, tag, tag_type) VALUES (?1, ?2, ?3)")?;
    for tag in tags {
        let name = tag.name.trim();
        if name.is_empty() {
            continue;
        }
        stmt.execute(params![recipe_id, name, tag.tag_type])?;
    }
    Ok(())
}

/// Ingredients with neither a name nor raw text are dropped. A blank name
/// falls back to the raw text.
fn insert_ingredients(conn: &Connection, recipe_id: i64, ingredients: &[Ingredient]) -> PlanResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO ingredients (recipe_id, name, quantity, unit, raw) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for ingredient in ingredients {
        let raw = ingredient
            .raw
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        let name = match ingredient.name.trim() {
            "" => match raw {
                Some(r) => r,
                None => continue,
            },
            n => n,
        };
        let unit = ingredient
            .unit
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());
        let quantity = ingredient.quantity.filter(|q| q.is_finite());
        stmt.execute(params![recipe_id, name, quantity, unit, raw])?;
    }
    Ok(())
}

/// Insert or, when a product with the same SKU exists, update it in place.
/// Returns `(id, inserted)`.
pub(crate) fn upsert_product(conn: &Connection, product: &NewProduct) -> PlanResult<(i64, bool)> {
    let existing = match &product.sku {
        Some(sku) => product_id_by_sku(conn, sku)?,
        None => None,
    };
    if let Some(id) = existing {
        conn.execute(
            "UPDATE products SET name = ?1, brand = ?2, kcal_per_100 = ?3, protein_per_100 = ?4,
             carbs_per_100 = ?5, fat_per_100 = ?6, fiber_per_100 = ?7 WHERE id = ?8",
            params![
                product.name,
                product.brand,
                product.calories_per_100,
                product.protein_per_100,
                product.carbs_per_100,
                product.fat_per_100,
                product.fiber_per_100,
                id,
            ],
        )?;
        return Ok((id, false));
    }

    let now = Local::now().to_rfc3339();
    conn.execute(
        "INSERT INTO products (name, brand, sku, kcal_per_100, protein_per_100, carbs_per_100, fat_per_100, fiber_per_100, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            product.name,
            product.brand,
            product.sku,
            product.calories_per_100,
            product.protein_per_100,
            product.carbs_per_100,
            product.fat_per_100,
            product.fiber_per_100,
            now,
        ],
    )?;
    Ok((conn.last_insert_rowid(), true))
}

// --- Plan queries ---

pub(crate) fn find_plan_by_date(conn: &Connection, date: NaiveDate) -> PlanResult<Option<MealPlan>> {
    let plan = conn
        .query_row(
            &format!("SELECT {PLAN_COLUMNS} FROM meal_plans WHERE date = ?1"),
            params![date_key(date)],
            plan_from_row,
        )
        .optional()?;
    Ok(plan)
}

pub(crate) fn get_plan(conn: &Connection, id: i64) -> PlanResult<MealPlan> {
    conn.query_row(
        &format!("SELECT {PLAN_COLUMNS} FROM meal_plans WHERE id = ?1"),
        params![id],
        plan_from_row,
    )
    .optional()?
    .ok_or_else(|| PlanError::not_found("meal plan", id))
}

pub(crate) fn get_plan_item(conn: &Connection, id: i64) -> PlanResult<MealPlanItem> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM meal_plan_items WHERE id = ?1"),
        params![id],
        plan_item_from_row,
    )
    .optional()?
    .ok_or_else(|| PlanError::not_found("plan item", id))
}

pub(crate) fn plan_items(conn: &Connection, plan_id: i64) -> PlanResult<Vec<MealPlanItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM meal_plan_items WHERE meal_plan_id = ?1 ORDER BY meal_index, id"
    ))?;
    let items = stmt
        .query_map(params![plan_id], plan_item_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

pub(crate) struct PlanHeader<'a> {
    pub date: NaiveDate,
    pub target_calories: f64,
    pub meal_count: i64,
    pub snapshot: &'a MacroSnapshot,
    pub totals: Macros,
}

/// Insert the plan for `header.date`, or overwrite the existing one. Returns the plan id.
pub(crate) fn upsert_plan_header(conn: &Connection, header: &PlanHeader<'_>) -> PlanResult<i64> {
    let now = Local::now().to_rfc3339();
    let snapshot = serde_json::to_string(header.snapshot)?;
    let id = conn.query_row(
        "INSERT INTO meal_plans (date, target_calories, meal_count, macros_json,
                                 total_calories, total_protein, total_carbs, total_fat,
                                 created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
         ON CONFLICT(date) DO UPDATE SET
             target_calories = excluded.target_calories,
             meal_count = excluded.meal_count,
             macros_json = excluded.macros_json,
             total_calories = excluded.total_calories,
             total_protein = excluded.total_protein,
             total_carbs = excluded.total_carbs,
             total_fat = excluded.total_fat,
             updated_at = excluded.updated_at
         RETURNING id",
        params![
            date_key(header.date),
            header.target_calories,
            header.meal_count,
            snapshot,
            header.totals.calories,
            header.totals.protein_g,
            header.totals.carbs_g,
            header.totals.fat_g,
            now,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Replace the whole item list of a plan; `meal_index` follows slice order.
pub(crate) fn replace_plan_items(
    conn: &Connection,
    plan_id: i64,
    items: &[PlanItem],
) -> PlanResult<()> {
    conn.execute(
        "DELETE FROM meal_plan_items WHERE meal_plan_id = ?1",
        params![plan_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO meal_plan_items (meal_plan_id, meal_index, item_type, item_id, servings, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (idx, item) in items.iter().enumerate() {
        let meal_index = i64::try_from(idx).unwrap_or(i64::MAX);
        stmt.execute(params![
            plan_id,
            meal_index,
            item.item_type,
            item.item_id,
            item.servings,
            item.title,
        ])?;
    }
    Ok(())
}

pub(crate) fn set_item_servings(conn: &Connection, item_id: i64, servings: f64) -> PlanResult<()> {
    conn.execute(
        "UPDATE meal_plan_items SET servings = ?1 WHERE id = ?2",
        params![servings, item_id],
    )?;
    Ok(())
}

pub(crate) fn set_item_recipe(
    conn: &Connection,
    item_id: i64,
    recipe_id: i64,
    notes: &str,
) -> PlanResult<()> {
    conn.execute(
        "UPDATE meal_plan_items SET item_id = ?1, notes = ?2 WHERE id = ?3",
        params![recipe_id, notes, item_id],
    )?;
    Ok(())
}

pub(crate) fn write_plan_totals(
    conn: &Connection,
    plan_id: i64,
    totals: Macros,
    snapshot: Option<&MacroSnapshot>,
) -> PlanResult<()> {
    let snapshot = snapshot.map(serde_json::to_string).transpose()?;
    let now = Local::now().to_rfc3339();
    conn.execute(
        "UPDATE meal_plans SET total_calories = ?1, total_protein = ?2, total_carbs = ?3,
         total_fat = ?4, macros_json = COALESCE(?5, macros_json), updated_at = ?6 WHERE id = ?7",
        params![
            totals.calories,
            totals.protein_g,
            totals.carbs_g,
            totals.fat_g,
            snapshot,
            now,
            plan_id,
        ],
    )?;
    Ok(())
}

/// Contribution of one stored item at current catalog values, plus a display
/// title. Items whose catalog row is gone contribute nothing.
pub(crate) fn item_contribution(
    conn: &Connection,
    item: &MealPlanItem,
) -> PlanResult<(Macros, String)> {
    let fallback = || {
        item.notes
            .clone()
            .unwrap_or_else(|| format!("{} #{}", item.item_type, item.item_id))
    };
    let resolved = match item.item_type {
        ItemType::Recipe => find_recipe(conn, item.item_id)?
            .map(|r| (r.per_serving().scaled(item.servings), r.title)),
        ItemType::Product => find_product(conn, item.item_id)?
            .map(|p| (p.per_100().scaled(item.servings), p.name)),
    };
    Ok(resolved.unwrap_or_else(|| (Macros::default(), fallback())))
}
