//! Export of emitted action records and solutions.

use std::fs::File;

use serde::Serialize;
use uuid::Uuid;

use crate::core::solution::{Action, Solution};

#[derive(Serialize)]
struct ActionRecord {
    position: usize,
    action_type: String,
    resource_id: Uuid,
    input_parameters: String,
}

/// Saves the ordered action records of a plan to a CSV file, one row per
/// action in emission order.
pub fn save_actions_csv(actions: &[Action], path: &str) -> Result<(), std::io::Error> {
    let file = File::create(path)?;
    let mut wtr = csv::Writer::from_writer(file);
    for (position, action) in actions.iter().enumerate() {
        wtr.serialize(ActionRecord {
            position,
            action_type: action.action_type.to_string(),
            resource_id: action.resource_id,
            input_parameters: serde_json::to_string(&action.input_parameters)?,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Saves the whole solution (actions, post-plan model, efficacy) as pretty
/// JSON.
pub fn save_solution_json(solution: &Solution, path: &str) -> Result<(), std::io::Error> {
    let mut file = File::create(path)?;
    serde_json::to_writer_pretty(&mut file, solution)?;
    Ok(())
}
