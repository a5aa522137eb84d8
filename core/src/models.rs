use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

// --- Nutrition values ---

/// Calories plus the three tracked macros, in kcal and grams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

impl Macros {
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            calories: self.calories * factor,
            protein_g: self.protein_g * factor,
            carbs_g: self.carbs_g * factor,
            fat_g: self.fat_g * factor,
        }
    }
}

impl Add for Macros {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            calories: self.calories + rhs.calories,
            protein_g: self.protein_g + rhs.protein_g,
            carbs_g: self.carbs_g + rhs.carbs_g,
            fat_g: self.fat_g + rhs.fat_g,
        }
    }
}

impl AddAssign for Macros {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Macros {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Optional gram targets for the day (or, after `per_meal`, for one slot).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat_g: Option<f64>,
}

impl MacroTargets {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.protein_g.is_none() && self.carbs_g.is_none() && self.fat_g.is_none()
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn per_meal(&self, meal_count: usize) -> Self {
        let n = meal_count.max(1) as f64;
        Self {
            protein_g: self.protein_g.map(|v| v / n),
            carbs_g: self.carbs_g.map(|v| v / n),
            fat_g: self.fat_g.map(|v| v / n),
        }
    }

    /// Derive any missing gram target from a percentage split of `calories`.
    /// Explicit gram targets win over the split.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fill_from_split(self, calories: f64, split: MacroSplit) -> Self {
        let protein = calories * split.protein_pct as f64 / 100.0 / 4.0;
        let carbs = calories * split.carbs_pct as f64 / 100.0 / 4.0;
        let fat = calories * split.fat_pct as f64 / 100.0 / 9.0;
        Self {
            protein_g: self.protein_g.or(Some(protein)),
            carbs_g: self.carbs_g.or(Some(carbs)),
            fat_g: self.fat_g.or(Some(fat)),
        }
    }
}

/// Percent-of-calories split between protein, carbs and fat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroSplit {
    pub protein_pct: i64,
    pub carbs_pct: i64,
    pub fat_pct: i64,
}

impl Default for MacroSplit {
    fn default() -> Self {
        Self {
            protein_pct: 30,
            carbs_pct: 35,
            fat_pct: 35,
        }
    }
}

impl FromStr for MacroSplit {
    type Err = anyhow::Error;

    /// Parses `P/C/F`, e.g. `30/40/30`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').map(str::trim).collect();
        let [p, c, f] = parts.as_slice() else {
            bail!("Invalid macro split '{s}'. Use protein/carbs/fat percentages like 30/40/30");
        };
        let parse = |v: &str| -> Result<i64> {
            v.parse()
                .map_err(|_| anyhow::anyhow!("Invalid percentage '{v}' in macro split '{s}'"))
        };
        let split = Self {
            protein_pct: parse(*p)?,
            carbs_pct: parse(*c)?,
            fat_pct: parse(*f)?,
        };
        validate_macro_split(split.protein_pct, split.carbs_pct, split.fat_pct)?;
        Ok(split)
    }
}

pub fn validate_macro_split(protein: i64, carbs: i64, fat: i64) -> Result<()> {
    if protein < 0 || carbs < 0 || fat < 0 {
        bail!("Macro percentages must be non-negative");
    }
    if protein > 100 || carbs > 100 || fat > 100 {
        bail!("Each macro percentage must be between 0 and 100");
    }
    let sum = protein + carbs + fat;
    if sum != 100 {
        bail!("Macro percentages must sum to 100 (got {sum})");
    }
    Ok(())
}

// --- Catalog ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_type: Option<String>,
}

/// One recipe ingredient as it arrives from the catalog. `quantity` and
/// `unit` are for the whole recipe, not per serving. Entries without both
/// are kept as free text in `raw`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: i64,
    pub title: String,
    pub source: Option<String>,
    pub url: Option<String>,
    pub servings: Option<f64>,
    /// Per-serving values.
    pub calories: Option<f64>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub fiber_g: Option<f64>,
    pub tags: Vec<Tag>,
}

impl Recipe {
    /// Per-serving macros with absent values counted as zero.
    #[must_use]
    pub fn per_serving(&self) -> Macros {
        Macros {
            calories: self.calories.unwrap_or(0.0),
            protein_g: self.protein_g.unwrap_or(0.0),
            carbs_g: self.carbs_g.unwrap_or(0.0),
            fat_g: self.fat_g.unwrap_or(0.0),
        }
    }

    /// Case-insensitive exact match against any of this recipe's tags.
    /// `wanted` must already be lowercase.
    #[must_use]
    pub fn has_any_tag(&self, wanted: &[String]) -> bool {
        self.tags
            .iter()
            .any(|t| wanted.contains(&t.name.trim().to_lowercase()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub brand: Option<String>,
    pub sku: Option<String>,
    pub calories_per_100: Option<f64>,
    pub protein_per_100: Option<f64>,
    pub carbs_per_100: Option<f64>,
    pub fat_per_100: Option<f64>,
    pub fiber_per_100: Option<f64>,
}

impl Product {
    #[must_use]
    pub fn per_100(&self) -> Macros {
        Macros {
            calories: self.calories_per_100.unwrap_or(0.0),
            protein_g: self.protein_per_100.unwrap_or(0.0),
            carbs_g: self.carbs_per_100.unwrap_or(0.0),
            fat_g: self.fat_per_100.unwrap_or(0.0),
        }
    }

    #[must_use]
    pub fn portion(&self, grams: f64) -> Macros {
        self.per_100().scaled(grams / 100.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRecipe {
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub servings: Option<f64>,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default)]
    pub protein_g: Option<f64>,
    #[serde(default)]
    pub carbs_g: Option<f64>,
    #[serde(default)]
    pub fat_g: Option<f64>,
    #[serde(default)]
    pub fiber_g: Option<f64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub calories_per_100: Option<f64>,
    #[serde(default)]
    pub protein_per_100: Option<f64>,
    #[serde(default)]
    pub carbs_per_100: Option<f64>,
    #[serde(default)]
    pub fat_per_100: Option<f64>,
    #[serde(default)]
    pub fiber_per_100: Option<f64>,
}

// --- Plans ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Recipe,
    Product,
}

impl ItemType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recipe => "recipe",
            Self::Product => "product",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for ItemType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ItemType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "recipe" => Ok(Self::Recipe),
            "product" => Ok(Self::Product),
            other => Err(FromSqlError::Other(
                format!("unknown plan item type '{other}'").into(),
            )),
        }
    }
}

/// One chosen entry of a plan under construction, before it is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct PlanItem {
    pub item_type: ItemType,
    pub item_id: i64,
    pub servings: f64,
    pub title: String,
    pub macros: Macros,
}

impl PlanItem {
    #[must_use]
    pub fn recipe(recipe: &Recipe) -> Self {
        Self {
            item_type: ItemType::Recipe,
            item_id: recipe.id,
            servings: 1.0,
            title: recipe.title.clone(),
            macros: recipe.per_serving(),
        }
    }

    #[must_use]
    pub fn product(product: &Product, grams: f64) -> Self {
        Self {
            item_type: ItemType::Product,
            item_id: product.id,
            servings: grams / 100.0,
            title: product.name.clone(),
            macros: product.portion(grams),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTarget {
    pub calories: f64,
    #[serde(flatten)]
    pub macros: MacroTargets,
}

/// Target-vs-actual record stored with each plan as JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroSnapshot {
    pub target: SnapshotTarget,
    pub actual: Macros,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealPlan {
    pub id: i64,
    pub date: NaiveDate,
    pub target_calories: f64,
    pub meal_count: i64,
    pub snapshot: Option<MacroSnapshot>,
    pub totals: Macros,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealPlanItem {
    pub id: i64,
    pub meal_plan_id: i64,
    pub meal_index: i64,
    pub item_type: ItemType,
    pub item_id: i64,
    pub servings: f64,
    pub notes: Option<String>,
}

/// A stored item joined with its current catalog values.
#[derive(Debug, Clone, Serialize)]
pub struct PlanDetailItem {
    #[serde(flatten)]
    pub item: MealPlanItem,
    pub title: String,
    pub macros: Macros,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanDetail {
    #[serde(flatten)]
    pub plan: MealPlan,
    pub items: Vec<PlanDetailItem>,
}

// --- Requests and results ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    pub target_calories: f64,
    #[serde(default = "default_meal_count")]
    pub meal_count: i64,
    #[serde(default)]
    pub macro_targets: MacroTargets,
    #[serde(default)]
    pub exclusions: Vec<String>,
    /// Tag preferences per slot; slot `i` uses entry `i` when present.
    #[serde(default)]
    pub preferred_tags: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub slot_labels: Option<Vec<String>>,
}

fn default_meal_count() -> i64 {
    3
}

/// Upper bound on slots per day.
pub const MAX_MEALS: i64 = 12;

impl PlanRequest {
    #[must_use]
    pub fn new(target_calories: f64, meal_count: i64) -> Self {
        Self {
            target_calories,
            meal_count,
            ..Self::default()
        }
    }

    /// Meal count clamped to `1..=MAX_MEALS`.
    #[must_use]
    pub fn slots(&self) -> usize {
        usize::try_from(self.meal_count.clamp(1, MAX_MEALS)).unwrap_or(1)
    }

    /// Plan exactly these slots: one meal each, biased toward the preset's tags.
    #[must_use]
    pub fn with_slots(mut self, slots: &[SlotPreset]) -> Self {
        if slots.is_empty() {
            return self;
        }
        self.meal_count = i64::try_from(slots.len()).unwrap_or(i64::MAX);
        self.preferred_tags = Some(
            slots
                .iter()
                .map(|s| s.tags().iter().map(ToString::to_string).collect())
                .collect(),
        );
        self.slot_labels = Some(slots.iter().map(|s| s.label().to_string()).collect());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotPreset {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl SlotPreset {
    pub const ALL: [Self; 4] = [Self::Breakfast, Self::Lunch, Self::Dinner, Self::Snack];

    #[must_use]
    pub fn tags(self) -> &'static [&'static str] {
        match self {
            Self::Breakfast => &["ontbijt", "breakfast"],
            Self::Lunch => &["lunch", "brood", "salade"],
            Self::Dinner => &["diner", "avondeten", "hoofdgerecht", "maaltijd"],
            Self::Snack => &["snack", "tussendoor", "borrel"],
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Breakfast => "Breakfast",
            Self::Lunch => "Lunch",
            Self::Dinner => "Dinner",
            Self::Snack => "Snack",
        }
    }
}

impl FromStr for SlotPreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.label().eq_ignore_ascii_case(&lower) || p.tags().contains(&lower.as_str()))
            .ok_or_else(|| {
                anyhow::anyhow!("Invalid slot '{s}'. Must be one of: breakfast, lunch, dinner, snack")
            })
    }
}

/// Breakfast, lunch and dinner bias for the first three slots; later slots are unbiased.
#[must_use]
pub fn default_slot_tags(meal_count: usize) -> Vec<Vec<String>> {
    let presets = [SlotPreset::Breakfast, SlotPreset::Lunch, SlotPreset::Dinner];
    (0..meal_count)
        .map(|i| {
            presets
                .get(i)
                .map(|p| p.tags().iter().map(ToString::to_string).collect())
                .unwrap_or_default()
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyPlan {
    pub plan_id: i64,
    pub date: NaiveDate,
    pub items: Vec<PlanItem>,
    pub totals: Macros,
    /// Slots left empty because the recipe pool ran out.
    pub unfilled_slots: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekDay {
    pub date: NaiveDate,
    pub plan_id: i64,
    pub totals: Macros,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubstituteCandidate {
    pub recipe: Recipe,
    pub shared_tags: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShoppingRecipe {
    pub recipe_id: i64,
    pub title: String,
    pub servings: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShoppingProduct {
    pub product_id: i64,
    pub name: String,
    pub grams: f64,
}

/// Ingredient quantity summed over every planned serving, keyed by
/// lowercased name and unit.
#[derive(Debug, Clone, Serialize)]
pub struct ShoppingIngredient {
    pub name: String,
    pub unit: String,
    pub quantity: f64,
}

/// Ingredient without a usable quantity or unit, counted per recipe item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShoppingFreeItem {
    pub text: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShoppingList {
    pub start: NaiveDate,
    pub days: u32,
    pub ingredients: Vec<ShoppingIngredient>,
    pub other_ingredients: Vec<ShoppingFreeItem>,
    pub recipes: Vec<ShoppingRecipe>,
    pub products: Vec<ShoppingProduct>,
}
