use anyhow::Result;

use plate_core::models::MacroSplit;
use plate_core::service::PlannerService;

pub(crate) fn cmd_split_show(svc: &PlannerService, json: bool) -> Result<()> {
    let split = svc.macro_split()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&split)?);
    } else {
        println!(
            "Macro split: protein {}% / carbs {}% / fat {}%",
            split.protein_pct, split.carbs_pct, split.fat_pct
        );
    }
    Ok(())
}

pub(crate) fn cmd_split_set(svc: &PlannerService, split: &str, json: bool) -> Result<()> {
    let split: MacroSplit = split.parse()?;
    svc.set_macro_split(split)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&split)?);
    } else {
        println!(
            "Macro split set to {}/{}/{}",
            split.protein_pct, split.carbs_pct, split.fat_pct
        );
    }
    Ok(())
}
