//! Gate command handlers.

use std::sync::Arc;

use opener_core::{Command as CoreCommand, Gate};
use tabled::Tabled;

use crate::cli::{GatesArgs, GatesCommand};
use crate::error::CliError;
use crate::output;

use super::session::Session;
use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct GateRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Device")]
    device_id: String,
    #[tabled(rename = "Rolling Code")]
    rolling_code: u32,
    #[tabled(rename = "Phones")]
    phones: String,
}

impl From<&Arc<Gate>> for GateRow {
    fn from(g: &Arc<Gate>) -> Self {
        Self {
            id: g.id.clone(),
            name: g.name.clone(),
            device_id: g.device_id.clone(),
            rolling_code: g.rolling_code,
            phones: phone_keys(g),
        }
    }
}

fn phone_keys(g: &Gate) -> String {
    g.phones
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn detail(g: &Arc<Gate>) -> String {
    let phones = phone_keys(g);
    [
        format!("ID:            {}", g.id),
        format!("Name:          {}", util::or_dash(&g.name)),
        format!("Device:        {}", util::or_dash(&g.device_id)),
        format!("Rolling code:  {}", g.rolling_code),
        format!("Phones:        {}", util::or_dash(&phones)),
        format!("Opener svc:    {}", util::or_dash(&g.opener_service_uuid)),
        format!("  counter:     {}", util::or_dash(&g.counter_uuid)),
        format!("  opener:      {}", util::or_dash(&g.opener_uuid)),
        format!("Admin svc:     {}", util::or_dash(&g.admin_service_uuid)),
        format!("  phone flash: {}", util::or_dash(&g.phone_flasher_uuid)),
        format!("  rc flash:    {}", util::or_dash(&g.rc_flasher_uuid)),
        format!("  get token:   {}", util::or_dash(&g.get_token_uuid)),
        format!("  get flash:   {}", util::or_dash(&g.get_flash_uuid)),
    ]
    .join("\n")
}

fn render_gate(session: &Session, gate: &Arc<Gate>) -> Result<(), CliError> {
    let out = output::render_single(session.format, gate, detail, |g| g.id.clone())?;
    session.print(&out);
    Ok(())
}

fn render_gates(session: &Session, gates: &[Arc<Gate>]) -> Result<(), CliError> {
    let out = output::render_list(session.format, gates, |g| GateRow::from(g), |g| g.id.clone())?;
    session.print(&out);
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(session: &Session, args: GatesArgs) -> Result<(), CliError> {
    let repo = session.repository();

    match args.command {
        GatesCommand::List => render_gates(session, &repo.list_gates()),

        GatesCommand::Get { id } => render_gate(session, &util::resolve_gate(repo, &id)?),

        GatesCommand::ForPhone { key } => render_gates(session, &repo.gates_for_phone_key(key)),

        GatesCommand::Create {
            id,
            name,
            device_id,
            from_file,
        } => {
            let mut gate: Gate = match from_file {
                Some(path) => serde_json::from_value(util::read_json_file(&path)?)?,
                None => Gate::default(),
            };
            if let Some(name) = name {
                gate.name = name;
            }
            if let Some(device_id) = device_id {
                gate.device_id = device_id;
            }
            gate.id.clone_from(&id);

            let stream = repo.subscribe_gates();
            session
                .execute(CoreCommand::CreateGate {
                    id: id.clone(),
                    gate: gate.clone(),
                })
                .await?;
            session
                .confirm(stream, "gate create", |r| {
                    r.gate(&id).is_some_and(|g| *g == gate)
                })
                .await?;
            render_gate(session, &util::resolve_gate(repo, &id)?)
        }

        GatesCommand::Delete { id } => {
            util::resolve_gate(repo, &id)?;
            let stream = repo.subscribe_gates();
            session
                .execute(CoreCommand::DeleteGate { id: id.clone() })
                .await?;
            session
                .confirm(stream, "gate delete", |r| r.gate(&id).is_none())
                .await?;
            if !session.quiet {
                eprintln!("Deleted gate {id}");
            }
            Ok(())
        }

        GatesCommand::AddPhone { gate_id, key } => {
            util::resolve_gate(repo, &gate_id)?;
            let stream = repo.subscribe_gates();
            session
                .execute(CoreCommand::AddGatePhone {
                    gate_id: gate_id.clone(),
                    key,
                })
                .await?;
            session
                .confirm(stream, "gate add-phone", |r| {
                    r.gate(&gate_id).is_some_and(|g| g.has_phone(key))
                })
                .await?;
            render_gate(session, &util::resolve_gate(repo, &gate_id)?)
        }

        GatesCommand::RemovePhone { gate_id, key } => {
            util::resolve_gate(repo, &gate_id)?;
            let stream = repo.subscribe_gates();
            session
                .execute(CoreCommand::RemoveGatePhone {
                    gate_id: gate_id.clone(),
                    key,
                })
                .await?;
            session
                .confirm(stream, "gate remove-phone", |r| {
                    r.gate(&gate_id).is_some_and(|g| !g.has_phone(key))
                })
                .await?;
            render_gate(session, &util::resolve_gate(repo, &gate_id)?)
        }

        GatesCommand::RollingCode { gate_id, code } => {
            util::resolve_gate(repo, &gate_id)?;
            let stream = repo.subscribe_gates();
            session
                .execute(CoreCommand::SetRollingCode {
                    gate_id: gate_id.clone(),
                    rolling_code: code,
                })
                .await?;
            session
                .confirm(stream, "gate rolling-code", |r| {
                    r.gate(&gate_id).is_some_and(|g| g.rolling_code == code)
                })
                .await?;
            render_gate(session, &util::resolve_gate(repo, &gate_id)?)
        }
    }
}
