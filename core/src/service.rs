use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;

use crate::db::Database;
use crate::error::PlanResult;
use crate::import::{self, CatalogBundle, ImportSummary};
use crate::models::{
    DailyPlan, MacroSplit, Macros, MealPlan, PlanDetail, PlanRequest, Product, Recipe,
    ShoppingList, SubstituteCandidate, WeekDay,
};
use crate::persist::RetryPolicy;
use crate::{mutate, planner, shopping};

/// Entry point for the CLI and the HTTP API. Owns the store and the retry
/// policy used for every write.
pub struct PlannerService {
    db: Database,
    retry: RetryPolicy,
}

impl PlannerService {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    pub fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        Ok(Self::from_database(Database::open_with_busy_timeout(
            path,
            busy_timeout,
        )?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self {
            db,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // --- Generation ---

    pub fn generate_daily_plan(&self, request: &PlanRequest, date: NaiveDate) -> PlanResult<DailyPlan> {
        planner::generate_daily_plan(&self.db, request, date, &self.retry)
    }

    pub fn generate_weekly_plan(
        &self,
        request: &PlanRequest,
        start: NaiveDate,
        days: u32,
    ) -> PlanResult<Vec<WeekDay>> {
        planner::generate_weekly_plan(&self.db, request, start, days, &self.retry)
    }

    /// Fill any missing macro target from the stored macro split.
    pub fn apply_macro_split(&self, mut request: PlanRequest) -> Result<PlanRequest> {
        let split = self.db.macro_split()?;
        request.macro_targets = request
            .macro_targets
            .fill_from_split(request.target_calories, split);
        Ok(request)
    }

    // --- Mutation ---

    pub fn update_item_servings(&self, item_id: i64, servings: f64) -> PlanResult<Macros> {
        mutate::update_item_servings(&self.db, item_id, servings, &self.retry)
    }

    pub fn substitute_item(&self, item_id: i64, new_recipe_id: i64) -> PlanResult<Macros> {
        mutate::substitute_item(&self.db, item_id, new_recipe_id, &self.retry)
    }

    pub fn rank_substitutes(&self, recipe_id: i64, limit: usize) -> PlanResult<Vec<SubstituteCandidate>> {
        mutate::rank_substitutes(&self.db, recipe_id, limit)
    }

    pub fn recompute_plan_totals(&self, plan_id: i64) -> PlanResult<Macros> {
        crate::persist::with_retry(&self.retry, "recompute plan totals", || {
            self.db
                .write(|conn| mutate::recompute_plan_totals(conn, plan_id))
        })
    }

    // --- Reading ---

    pub fn get_plan_detail(&self, date: NaiveDate) -> PlanResult<Option<PlanDetail>> {
        self.db.get_plan_detail(date)
    }

    pub fn list_plans(&self, limit: usize) -> PlanResult<Vec<MealPlan>> {
        self.db.list_plans(limit)
    }

    pub fn shopping_list(&self, start: NaiveDate, days: u32) -> PlanResult<ShoppingList> {
        shopping::shopping_list(&self.db, start, days)
    }

    // --- Catalog ---

    pub fn import_catalog(&self, bundle: &CatalogBundle, dry_run: bool) -> Result<ImportSummary> {
        import::import_catalog(&self.db, bundle, dry_run)
    }

    pub fn list_recipes(&self) -> PlanResult<Vec<Recipe>> {
        self.db.list_recipes()
    }

    pub fn list_products(&self) -> PlanResult<Vec<Product>> {
        self.db.list_products()
    }

    // --- Settings ---

    pub fn macro_split(&self) -> Result<MacroSplit> {
        self.db.macro_split()
    }

    pub fn set_macro_split(&self, split: MacroSplit) -> Result<()> {
        self.db.set_macro_split(split)
    }
}
