mod catalog;
mod helpers;
mod item;
mod plan;
mod settings;
mod shopping;

pub(crate) use catalog::{cmd_catalog_import, cmd_catalog_products, cmd_catalog_recipes};
pub(crate) use helpers::parse_date;
pub(crate) use item::{cmd_item_alternatives, cmd_item_servings, cmd_item_substitute};
pub(crate) use plan::{PlanOptions, cmd_plan_day, cmd_plan_list, cmd_plan_show, cmd_plan_week};
pub(crate) use settings::{cmd_split_set, cmd_split_show};
pub(crate) use shopping::cmd_shopping;
