//! JSON result objects printed by each subcommand.

use rollcall_core::{Identity, IdentitySummary};
use rollcall_engine::{AttendanceOutcome, Error};
use serde_json::{json, Value};

pub const REGISTERED: &str = "Student registered successfully.";
pub const CRITICAL: &str = "A critical system error occurred.";

pub fn registered(identity: &Identity) -> Value {
    json!({
        "success": true,
        "message": REGISTERED,
        "student": IdentitySummary::from(identity),
    })
}

pub fn attendance(outcome: &AttendanceOutcome) -> Value {
    json!({
        "success": true,
        "message": outcome.message(),
        "date": outcome.date.format("%Y-%m-%d").to_string(),
        "present": outcome.present,
        "faces": outcome.faces,
        "annotated_image": outcome.annotated.as_ref().map(|p| p.display().to_string()),
    })
}

pub fn roster(students: &[IdentitySummary], warning: Option<&str>) -> Value {
    let mut out = json!({
        "success": true,
        "message": format!("{} students registered.", students.len()),
        "count": students.len(),
        "students": students,
    });
    if let Some(warning) = warning {
        out["warning"] = Value::from(warning);
    }
    out
}

pub fn failure(err: &Error) -> Value {
    json!({
        "success": false,
        "message": err.to_string(),
        "error": err.kind(),
    })
}

pub fn unauthorized() -> Value {
    json!({
        "success": false,
        "message": Error::Unauthorized.to_string(),
    })
}

pub fn critical(err: &anyhow::Error) -> Value {
    json!({
        "success": false,
        "message": CRITICAL,
        "error": format!("{err:#}"),
    })
}
