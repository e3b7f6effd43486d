// Copyright 2023 Remi Bernotavicius

use crate::database;
use crate::database::models::NewIngredient;
use crate::query;
use crate::Result;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Deserialize)]
struct IngredientEntry {
    name: String,
    measurement_unit: String,
}

/// Bulk-loads reference ingredients from a JSON file of
/// `[{"name": ..., "measurement_unit": ...}]` entries. Entries already in the
/// database are skipped. Returns the number of new rows.
pub fn load_ingredients(
    conn: &mut database::Connection,
    path: impl AsRef<Path>,
) -> Result<usize> {
    let file = File::open(path.as_ref())?;
    let entries: Vec<IngredientEntry> = serde_json::from_reader(BufReader::new(file))?;

    let total = entries.len();
    let mut added = 0;
    for entry in entries {
        let inserted = query::add_ingredient(
            conn,
            NewIngredient {
                name: entry.name,
                measurement_unit: entry.measurement_unit,
            },
        )?;
        if inserted {
            added += 1;
        }
    }
    log::info!("imported {added} of {total} ingredients ({} already present)", total - added);
    Ok(added)
}
