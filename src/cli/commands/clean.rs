//! `clean`: purge generated artifacts after confirmation.

use std::io::{BufRead, Write};

use anyhow::Result;

use crate::services::Controller;

pub async fn handle_clean(controller: &Controller, force: bool) -> Result<()> {
    if !force && !confirm(&format!(
        "Remove all batchflow data under {}? [y/N] ",
        controller.data_dir().display()
    ))? {
        println!("Aborted.");
        return Ok(());
    }
    controller.clean().await?;
    println!("Cleaned {}", controller.data_dir().display());
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
