use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use plate_core::error::PlanError;
use plate_core::models::{
    ItemType, MAX_MEALS, MacroTargets, Macros, PlanDetail, Recipe, SlotPreset,
};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Parse a comma-separated slot list such as `breakfast,lunch,snack`.
pub(crate) fn parse_slots(s: &str) -> Result<Vec<SlotPreset>> {
    let slots = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::parse::<SlotPreset>)
        .collect::<Result<Vec<SlotPreset>>>()?;
    if slots.is_empty() {
        bail!("No slots given. Use e.g. --slots breakfast,lunch,dinner");
    }
    if i64::try_from(slots.len()).map_or(true, |n| n > MAX_MEALS) {
        bail!("At most {MAX_MEALS} slots per day");
    }
    Ok(slots)
}

pub(crate) fn macro_targets(
    protein: Option<f64>,
    carbs: Option<f64>,
    fat: Option<f64>,
) -> Result<MacroTargets> {
    for (name, value) in [("protein", protein), ("carbs", carbs), ("fat", fat)] {
        if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
            bail!("--{name} must be a non-negative number of grams");
        }
    }
    Ok(MacroTargets {
        protein_g: protein,
        carbs_g: carbs,
        fat_g: fat,
    })
}

/// Print a library error and exit 2 when it is a not-found result.
pub(crate) fn exit_if_not_found(err: &PlanError, json: bool) {
    if matches!(err, PlanError::NotFound { .. }) {
        let message = capitalize(&err.to_string());
        if json {
            println!("{}", json_error(&message));
        } else {
            eprintln!("{message}");
        }
        std::process::exit(2);
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

pub(crate) fn print_plan_detail(detail: &PlanDetail) {
    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "Item ID")]
        id: i64,
        #[tabled(rename = "Type")]
        kind: String,
        #[tabled(rename = "Ref")]
        item_id: i64,
        #[tabled(rename = "Name")]
        title: String,
        #[tabled(rename = "Servings")]
        servings: String,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "P")]
        protein: String,
        #[tabled(rename = "C")]
        carbs: String,
        #[tabled(rename = "F")]
        fat: String,
    }

    let rows: Vec<ItemRow> = detail
        .items
        .iter()
        .map(|d| ItemRow {
            id: d.item.id,
            kind: d.item.item_type.to_string(),
            item_id: d.item.item_id,
            title: truncate(&d.title, 40),
            servings: format_servings(d.item.item_type, d.item.servings),
            calories: format!("{:.0}", no_neg_zero(d.macros.calories)),
            protein: format!("{:.1}", no_neg_zero(d.macros.protein_g)),
            carbs: format!("{:.1}", no_neg_zero(d.macros.carbs_g)),
            fat: format!("{:.1}", no_neg_zero(d.macros.fat_g)),
        })
        .collect();

    println!("Plan for {} (#{})", detail.plan.date, detail.plan.id);
    if rows.is_empty() {
        println!("No items.");
    } else {
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(4..9)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }
    print_totals("Total", &detail.plan.totals, Some(detail.plan.target_calories));
}

/// Products are stored as hundreds of grams; show them in grams.
pub(crate) fn format_servings(item_type: ItemType, servings: f64) -> String {
    match item_type {
        ItemType::Recipe => format!("{servings:.2}"),
        ItemType::Product => format!("{:.0}g", servings * 100.0),
    }
}

pub(crate) fn print_totals(label: &str, totals: &Macros, target_calories: Option<f64>) {
    let target = target_calories.map_or_else(String::new, |t| format!(" / {t:.0}"));
    println!(
        "{label}: {:.0}{target} kcal | P {:.1}g | C {:.1}g | F {:.1}g",
        no_neg_zero(totals.calories),
        no_neg_zero(totals.protein_g),
        no_neg_zero(totals.carbs_g),
        no_neg_zero(totals.fat_g),
    );
}

pub(crate) fn print_recipe_table(recipes: &[&Recipe], shared_tags: Option<&[i64]>) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "P")]
        protein: String,
        #[tabled(rename = "C")]
        carbs: String,
        #[tabled(rename = "F")]
        fat: String,
        #[tabled(rename = "Tags")]
        tags: String,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut tags = r
                .tags
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if let Some(shared) = shared_tags.and_then(|s| s.get(i)) {
                tags = format!("{shared} shared: {tags}");
            }
            RecipeRow {
                id: r.id,
                title: truncate(&r.title, 40),
                calories: r.calories.map_or("-".into(), |v| format!("{v:.0}")),
                protein: r.protein_g.map_or("-".into(), |v| format!("{v:.1}")),
                carbs: r.carbs_g.map_or("-".into(), |v| format!("{v:.1}")),
                fat: r.fat_g.map_or("-".into(), |v| format!("{v:.1}")),
                tags: truncate(&tags, 40),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_none() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(
            parse_date(Some("tomorrow".to_string())).unwrap(),
            today + chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert!(parse_date(Some("15-01-2024".to_string())).is_err());
    }

    #[test]
    fn test_parse_slots() {
        let slots = parse_slots("breakfast, Dinner,snack").unwrap();
        assert_eq!(
            slots,
            [SlotPreset::Breakfast, SlotPreset::Dinner, SlotPreset::Snack]
        );
        assert!(parse_slots(" , ").is_err());
        assert!(parse_slots("lunch,brunch").is_err());
        assert!(parse_slots(&vec!["snack"; 13].join(",")).is_err());
        assert_eq!(parse_slots(&vec!["snack"; 12].join(",")).unwrap().len(), 12);
    }

    #[test]
    fn test_macro_targets_validation() {
        let t = macro_targets(Some(120.0), None, Some(60.0)).unwrap();
        assert_eq!(t.protein_g, Some(120.0));
        assert_eq!(t.carbs_g, None);
        assert!(macro_targets(Some(-5.0), None, None).is_err());
        assert!(macro_targets(None, Some(f64::NAN), None).is_err());
    }

    #[test]
    fn test_format_servings() {
        assert_eq!(format_servings(ItemType::Recipe, 1.5), "1.50");
        assert_eq!(format_servings(ItemType::Product, 1.5), "150g");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("recipe 4 not found"), "Recipe 4 not found");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("Müsli", 10), "Müsli");
    }

    #[test]
    fn test_no_neg_zero() {
        assert_eq!(no_neg_zero(-0.0).to_bits(), 0.0_f64.to_bits());
        assert_eq!(no_neg_zero(-3.0), -3.0);
    }
}
