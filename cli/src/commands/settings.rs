use anyhow::Result;

use crate::config::Config;

pub(crate) fn cmd_config_show(config: &Config, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&config.settings)?);
        return Ok(());
    }
    let s = &config.settings;
    println!("Data directory:    {}", config.data_dir.display());
    println!("Database:          {}", config.db_path.display());
    println!("days_before:       {}", s.days_before);
    println!("days_after:        {}", s.days_after);
    println!("grocery_list_name: {}", s.grocery_list_name);
    println!("http_timeout_secs: {}", s.http_timeout_secs);
    println!("log_level:         {}", s.log_level);
    Ok(())
}

pub(crate) fn cmd_config_set(config: &mut Config, key: &str, value: &str, json: bool) -> Result<()> {
    config.settings.set(key, value)?;
    config.settings.save(&config.settings_path())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&config.settings)?);
    } else {
        println!("Set {key} = {value}");
    }
    Ok(())
}
