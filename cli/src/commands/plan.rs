use anyhow::Result;
use std::process;

use platter_core::models::{DateWindow, MealId};
use platter_core::service::{MealPlanSource, PlannerService};

use super::helpers::{json_error, parse_date, print_plan_table};

pub(crate) fn cmd_plan(
    svc: &PlannerService,
    source: &dyn MealPlanSource,
    window: Option<DateWindow>,
    show_done: bool,
    json: bool,
) -> Result<()> {
    let view = svc.plan_view(source, window)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        if view.error.is_some() {
            process::exit(3);
        }
        return Ok(());
    }

    if let Some(err) = &view.error {
        let status = err
            .status_code
            .map_or_else(|| "no response".to_string(), |s| s.to_string());
        eprintln!("Could not load the meal plan ({}, {status})", err.message);
        eprintln!("  {}", err.url);
        if let Some(text) = err.response_text.as_deref().filter(|t| !t.is_empty()) {
            eprintln!("  {}", super::helpers::truncate(text, 200));
        }
        process::exit(3);
    }

    if let Some(w) = view.window {
        println!("=== {} to {} ===\n", w.start, w.end);
    }

    if view.visible.is_empty() {
        println!("Nothing left to cook.");
    } else {
        print_plan_table(&view.visible);
    }

    let done = view.done.len();
    if show_done && done > 0 {
        println!("\nDone:");
        print_plan_table(&view.done);
    } else if done > 0 {
        println!("\n{done} done (use --done to list)");
    }

    Ok(())
}

pub(crate) fn cmd_done(svc: &PlannerService, meal_id: MealId, json: bool) -> Result<()> {
    let marked = svc.mark_done(meal_id)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "meal_id": meal_id, "marked": marked })
        );
    } else if marked {
        println!("Marked meal {meal_id} as done");
    } else {
        println!("Meal {meal_id} is already done");
    }
    Ok(())
}

pub(crate) fn cmd_readd(svc: &PlannerService, meal_id: MealId, json: bool) -> Result<()> {
    if svc.re_add(meal_id)? {
        if json {
            println!(
                "{}",
                serde_json::json!({ "meal_id": meal_id, "removed": true })
            );
        } else {
            println!("Meal {meal_id} is back on the plan");
        }
        Ok(())
    } else {
        if json {
            println!(
                "{}",
                json_error(&format!("Meal {meal_id} was not marked done"))
            );
        } else {
            eprintln!("Meal {meal_id} was not marked done");
        }
        process::exit(2);
    }
}

pub(crate) fn cmd_done_list(svc: &PlannerService, json: bool) -> Result<()> {
    let markers = svc.list_done()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&markers)?);
        return Ok(());
    }
    if markers.is_empty() {
        println!("No meals marked done");
        return Ok(());
    }
    for m in &markers {
        let when = m.done_at.as_deref().unwrap_or("?");
        println!("  [{}] done at {when}", m.meal_id);
    }
    Ok(())
}

pub(crate) fn cmd_remove(
    svc: &PlannerService,
    source: &dyn MealPlanSource,
    meal_id: MealId,
    json: bool,
) -> Result<()> {
    svc.remove_from_plan(source, meal_id)?;
    if json {
        println!("{}", serde_json::json!({ "success": true, "meal_id": meal_id }));
    } else {
        println!("Removed meal {meal_id} from the plan");
    }
    Ok(())
}

pub(crate) fn cmd_add(
    svc: &PlannerService,
    source: &dyn MealPlanSource,
    slug: &str,
    date: Option<String>,
    entry_type: &str,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    svc.add_to_plan(source, date, slug, entry_type)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "success": true, "recipe": slug, "date": date, "entry_type": entry_type })
        );
    } else {
        println!("Planned {slug} for {entry_type} on {date}");
    }
    Ok(())
}
