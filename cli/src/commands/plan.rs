use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::Args;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use plate_core::models::{MAX_MEALS, PlanRequest, default_slot_tags};
use plate_core::service::PlannerService;

use super::helpers::{
    json_error, macro_targets, no_neg_zero, parse_slots, print_plan_detail, print_totals,
};

/// Targets and filters shared by `plan day` and `plan week`.
#[derive(Args, Debug, Clone)]
pub(crate) struct PlanOptions {
    /// Daily calorie target
    #[arg(short, long)]
    pub calories: f64,
    /// Number of meals (slots) per day
    #[arg(short, long, default_value = "3")]
    pub meals: i64,
    /// Daily protein target in grams
    #[arg(long)]
    pub protein: Option<f64>,
    /// Daily carbs target in grams
    #[arg(long)]
    pub carbs: Option<f64>,
    /// Daily fat target in grams
    #[arg(long)]
    pub fat: Option<f64>,
    /// Skip recipes and products whose name contains this text (repeatable or comma-separated)
    #[arg(short = 'x', long, value_delimiter = ',')]
    pub exclude: Vec<String>,
    /// Explicit slots, e.g. "breakfast,lunch,snack" (overrides --meals)
    #[arg(long)]
    pub slots: Option<String>,
    /// Fill missing macro targets from the saved macro split
    #[arg(long)]
    pub split: bool,
    /// Bias the first slots toward breakfast/lunch/dinner tags
    #[arg(long)]
    pub bias_tags: bool,
}

pub(crate) fn build_request(svc: &PlannerService, opts: &PlanOptions) -> Result<PlanRequest> {
    if !opts.calories.is_finite() || opts.calories <= 0.0 {
        bail!("Calorie target must be greater than 0");
    }
    if !(1..=MAX_MEALS).contains(&opts.meals) {
        bail!("--meals must be between 1 and {MAX_MEALS}");
    }

    let mut request = PlanRequest::new(opts.calories, opts.meals);
    request.macro_targets = macro_targets(opts.protein, opts.carbs, opts.fat)?;
    request.exclusions.clone_from(&opts.exclude);

    if let Some(slots) = &opts.slots {
        request = request.with_slots(&parse_slots(slots)?);
    } else if opts.bias_tags {
        request.preferred_tags = Some(default_slot_tags(request.slots()));
    }
    if opts.split {
        request = svc.apply_macro_split(request)?;
    }
    Ok(request)
}

pub(crate) fn cmd_plan_day(
    svc: &PlannerService,
    opts: &PlanOptions,
    date: NaiveDate,
    json: bool,
) -> Result<()> {
    let request = build_request(svc, opts)?;
    let plan = svc.generate_daily_plan(&request, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    if let Some(detail) = svc.get_plan_detail(date)? {
        print_plan_detail(&detail);
    }
    if plan.unfilled_slots > 0 {
        eprintln!(
            "Warning: {} slot(s) left empty; not enough recipes in the catalog.",
            plan.unfilled_slots
        );
    }
    Ok(())
}

pub(crate) fn cmd_plan_week(
    svc: &PlannerService,
    opts: &PlanOptions,
    start: NaiveDate,
    days: u32,
    json: bool,
) -> Result<()> {
    let request = build_request(svc, opts)?;
    let week = svc.generate_weekly_plan(&request, start, days)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&week)?);
        return Ok(());
    }

    #[derive(Tabled)]
    struct DayRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Plan")]
        plan_id: i64,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "P")]
        protein: String,
        #[tabled(rename = "C")]
        carbs: String,
        #[tabled(rename = "F")]
        fat: String,
    }

    let rows: Vec<DayRow> = week
        .iter()
        .map(|d| DayRow {
            date: d.date.format("%a %Y-%m-%d").to_string(),
            plan_id: d.plan_id,
            calories: format!("{:.0}", no_neg_zero(d.totals.calories)),
            protein: format!("{:.1}", no_neg_zero(d.totals.protein_g)),
            carbs: format!("{:.1}", no_neg_zero(d.totals.carbs_g)),
            fat: format!("{:.1}", no_neg_zero(d.totals.fat_g)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    println!("Target: {:.0} kcal per day", request.target_calories);
    Ok(())
}

pub(crate) fn cmd_plan_show(svc: &PlannerService, date: NaiveDate, json: bool) -> Result<()> {
    let Some(detail) = svc.get_plan_detail(date)? else {
        let message = format!("No plan for {date}");
        if json {
            println!("{}", json_error(&message));
        } else {
            eprintln!("{message}");
        }
        process::exit(2);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        print_plan_detail(&detail);
        if let Some(snapshot) = &detail.plan.snapshot {
            if let Some(slots) = &snapshot.slots {
                println!("Slots: {}", slots.join(", "));
            }
            print_totals("Planned", &snapshot.actual, None);
        }
    }
    Ok(())
}

pub(crate) fn cmd_plan_list(svc: &PlannerService, limit: usize, json: bool) -> Result<()> {
    let plans = svc.list_plans(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }
    if plans.is_empty() {
        println!("No plans yet. Create one with `plate plan day --calories 2000`.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Meals")]
        meals: i64,
        #[tabled(rename = "Target")]
        target: String,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "P")]
        protein: String,
        #[tabled(rename = "C")]
        carbs: String,
        #[tabled(rename = "F")]
        fat: String,
    }

    let rows: Vec<PlanRow> = plans
        .iter()
        .map(|p| PlanRow {
            date: p.date.to_string(),
            id: p.id,
            meals: p.meal_count,
            target: format!("{:.0}", p.target_calories),
            calories: format!("{:.0}", no_neg_zero(p.totals.calories)),
            protein: format!("{:.1}", no_neg_zero(p.totals.protein_g)),
            carbs: format!("{:.1}", no_neg_zero(p.totals.carbs_g)),
            fat: format!("{:.1}", no_neg_zero(p.totals.fat_g)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..8)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
