//! Replica status.

use serde::Serialize;

use crate::error::CliError;
use crate::output;

use super::session::Session;

#[derive(Serialize)]
struct Status {
    store: String,
    state: String,
    gates_synced: bool,
    phones_synced: bool,
    gates: usize,
    phones: usize,
}

fn detail(s: &Status) -> String {
    [
        format!("Store:   {}", s.store),
        format!("State:   {}", s.state),
        format!(
            "Gates:   {} (synced: {})",
            s.gates,
            output::flag(s.gates_synced, false)
        ),
        format!(
            "Phones:  {} (synced: {})",
            s.phones,
            output::flag(s.phones_synced, false)
        ),
    ]
    .join("\n")
}

pub fn handle(session: &Session) -> Result<(), CliError> {
    let repo = session.repository();
    let status = Status {
        store: session.store_path().display().to_string(),
        state: format!("{:?}", session.state()).to_lowercase(),
        gates_synced: repo.gates_synced(),
        phones_synced: repo.phones_synced(),
        gates: repo.gate_count(),
        phones: repo.phone_count(),
    };
    let out = output::render_single(session.format, &status, detail, |s| s.state.clone())?;
    session.print(&out);
    Ok(())
}
