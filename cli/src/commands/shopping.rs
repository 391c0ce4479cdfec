use anyhow::{Context, Result, bail};
use std::io::Read;
use std::path::Path;

use platter_core::models::DateWindow;
use platter_core::service::{GroceryList, MealPlanSource, PlannerService};

use super::helpers::print_shopping_table;

pub(crate) fn cmd_shopping_show(svc: &PlannerService, json: bool) -> Result<()> {
    let entries = svc.shopping_list()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("Shopping list is empty");
    } else {
        print_shopping_table(&entries);
    }
    Ok(())
}

pub(crate) fn cmd_shopping_build(
    svc: &PlannerService,
    source: &dyn MealPlanSource,
    window: Option<DateWindow>,
    json: bool,
) -> Result<()> {
    let build = svc.build_shopping_list(source, window)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&build)?);
    } else {
        println!(
            "Shopping list rebuilt: {} ingredients from {} recipes",
            build.written, build.recipes
        );
    }
    Ok(())
}

/// Replace the list from a JSON array of `[id, name]` pairs (`-` reads stdin).
pub(crate) fn cmd_shopping_set(svc: &PlannerService, file: &Path, json: bool) -> Result<()> {
    let raw = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };
    let value: serde_json::Value = serde_json::from_str(&raw).context("Input is not valid JSON")?;
    let Some(pairs) = value.as_array() else {
        bail!("Expected a JSON array of [id, name] pairs");
    };

    let written = svc.replace_shopping_pairs(pairs)?;
    if json {
        println!("{}", serde_json::json!({ "written": written }));
    } else {
        println!("Shopping list replaced ({written} items)");
    }
    Ok(())
}

pub(crate) fn cmd_shopping_clear(svc: &PlannerService, json: bool) -> Result<()> {
    svc.replace_shopping_list(&[])?;
    if json {
        println!("{}", serde_json::json!({ "written": 0 }));
    } else {
        println!("Shopping list cleared");
    }
    Ok(())
}

pub(crate) fn cmd_shopping_send(
    svc: &PlannerService,
    grocery: &dyn GroceryList,
    list_name: &str,
    json: bool,
) -> Result<()> {
    let sent = svc.send_shopping_list(grocery, list_name)?;
    if json {
        println!("{}", serde_json::json!({ "sent": sent, "list": list_name }));
    } else if sent == 0 {
        println!("Shopping list is empty; nothing sent");
    } else {
        println!("Sent {sent} items to '{list_name}'");
    }
    Ok(())
}
