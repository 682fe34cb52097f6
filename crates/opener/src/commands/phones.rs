//! Phone command handlers.

use std::sync::Arc;

use opener_core::{
    Command as CoreCommand, CommandResult, Phone, PhoneCapability, PhoneCreateAttributes,
    PhoneUpdateAttributes,
};
use tabled::Tabled;

use crate::cli::{PhonesArgs, PhonesCommand};
use crate::error::CliError;
use crate::output;

use super::session::Session;
use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct PhoneRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Key")]
    key: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Number")]
    number: String,
    #[tabled(rename = "Active")]
    active: String,
    #[tabled(rename = "Activated")]
    activated: String,
}

impl PhoneRow {
    fn new(p: &Arc<Phone>, color: bool) -> Self {
        Self {
            id: p.id.clone(),
            key: p.key,
            name: p.friendly_name.clone(),
            owner: p.owner.clone(),
            number: p.number.clone(),
            active: output::flag(p.active, color),
            activated: output::flag(p.is_activated(), color),
        }
    }
}

fn detail(p: &Arc<Phone>) -> String {
    let mut lines = vec![
        format!("ID:        {}", p.id),
        format!("Key:       {}", p.key),
        format!("Name:      {}", util::or_dash(&p.friendly_name)),
        format!("Owner:     {}", util::or_dash(&p.owner)),
        format!("Number:    {}", util::or_dash(&p.number)),
        format!("Email:     {}", util::or_dash(&p.email)),
        format!("Active:    {}", output::flag(p.active, false)),
        format!("PIN:       {}", if p.pin.is_some() { "****" } else { "-" }),
        format!("UID:       {}", p.uid.as_deref().unwrap_or("-")),
    ];
    if let Some(ref activation) = p.activation {
        lines.push(format!("Code:      {}", activation.code));
        lines.push(format!(
            "Issued:    {}",
            activation
                .when
                .map_or_else(|| "pending".into(), |t| t.to_rfc3339())
        ));
    }
    lines.join("\n")
}

fn render_phone(session: &Session, phone: &Arc<Phone>) -> Result<(), CliError> {
    let out = output::render_single(session.format, phone, detail, |p| p.id.clone())?;
    session.print(&out);
    Ok(())
}

/// True once every field named in `attrs` holds its new value.
fn applied(phone: &Phone, attrs: &PhoneUpdateAttributes) -> bool {
    attrs.pin.is_none_or(|pin| phone.pin == Some(pin))
        && attrs
            .friendly_name
            .as_ref()
            .is_none_or(|v| phone.friendly_name == *v)
        && attrs.owner.as_ref().is_none_or(|v| phone.owner == *v)
        && attrs
            .uid
            .as_ref()
            .is_none_or(|v| phone.uid.as_ref() == Some(v))
        && attrs.number.as_ref().is_none_or(|v| phone.number == *v)
        && attrs.email.as_ref().is_none_or(|v| phone.email == *v)
}

// ── Handler ─────────────────────────────────────────────────────────

#[allow(clippy::too_many_lines)]
pub async fn handle(session: &Session, args: PhonesArgs) -> Result<(), CliError> {
    let repo = session.repository();

    match args.command {
        PhonesCommand::List => {
            let phones = repo.all_phones();
            let out = output::render_list(
                session.format,
                &phones,
                |p| PhoneRow::new(p, session.color),
                |p| p.id.clone(),
            )?;
            session.print(&out);
            Ok(())
        }

        PhonesCommand::Get { phone } => render_phone(session, &util::resolve_phone(repo, &phone)?),

        PhonesCommand::Create {
            key,
            name,
            owner,
            number,
            email,
        } => {
            let attrs = PhoneCreateAttributes {
                key,
                friendly_name: name,
                owner,
                number,
                email,
            };
            let stream = repo.subscribe_phones();
            let CommandResult::Created { id } =
                session.execute(CoreCommand::CreatePhone(attrs)).await?
            else {
                return Err(CliError::Internal("phone create returned no id".into()));
            };
            session
                .confirm(stream, "phone create", |r| r.get_phone(&id).is_some())
                .await?;
            render_phone(session, &util::resolve_phone(repo, &id)?)
        }

        PhonesCommand::Update {
            phone,
            pin,
            name,
            owner,
            uid,
            number,
            email,
        } => {
            let id = util::resolve_phone(repo, &phone)?.id.clone();
            let attributes = PhoneUpdateAttributes {
                pin,
                friendly_name: name,
                owner,
                uid,
                number,
                email,
            };
            let stream = repo.subscribe_phones();
            session
                .execute(CoreCommand::UpdatePhone {
                    id: id.clone(),
                    attributes: attributes.clone(),
                })
                .await?;
            session
                .confirm(stream, "phone update", |r| {
                    r.get_phone(&id).is_some_and(|p| applied(&p, &attributes))
                })
                .await?;
            render_phone(session, &util::resolve_phone(repo, &id)?)
        }

        PhonesCommand::Delete { phone } => {
            let id = util::resolve_phone(repo, &phone)?.id.clone();
            let stream = repo.subscribe_phones();
            session
                .execute(CoreCommand::DeletePhone { id: id.clone() })
                .await?;
            session
                .confirm(stream, "phone delete", |r| r.get_phone(&id).is_none())
                .await?;
            if !session.quiet {
                eprintln!("Deleted phone {id}");
            }
            Ok(())
        }

        PhonesCommand::Activate { phone } => set_active(session, &phone, true).await,
        PhonesCommand::Deactivate { phone } => set_active(session, &phone, false).await,

        PhonesCommand::SetActivation { phone, code } => {
            let id = util::resolve_phone(repo, &phone)?.id.clone();
            let stream = repo.subscribe_phones();
            session
                .execute(CoreCommand::SetActivation {
                    id: id.clone(),
                    code,
                })
                .await?;
            session
                .confirm(stream, "phone set-activation", |r| {
                    r.get_phone(&id).is_some_and(|p| {
                        p.activation
                            .as_ref()
                            .is_some_and(|a| a.code == code && a.when.is_some())
                    })
                })
                .await?;
            render_phone(session, &util::resolve_phone(repo, &id)?)
        }

        PhonesCommand::Notify { phone } => {
            let id = util::resolve_phone(repo, &phone)?.id.clone();
            let handle = repo.phone_handle(&id).ok_or_else(|| CliError::NotFound {
                resource_type: "phone".into(),
                identifier: id.clone(),
                list_command: "phones list".into(),
            })?;
            handle.notify();
            if !session.quiet {
                eprintln!(
                    "Notification requested for {} ({})",
                    handle.id(),
                    util::or_dash(&handle.owner())
                );
            }
            Ok(())
        }
    }
}

async fn set_active(session: &Session, phone: &str, active: bool) -> Result<(), CliError> {
    let repo = session.repository();
    let id = util::resolve_phone(repo, phone)?.id.clone();
    let stream = repo.subscribe_phones();
    session
        .execute(CoreCommand::ActivatePhone {
            id: id.clone(),
            active,
        })
        .await?;
    session
        .confirm(stream, "phone activate", |r| {
            r.get_phone(&id).is_some_and(|p| p.active == active)
        })
        .await?;
    render_phone(session, &util::resolve_phone(repo, &id)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applied_checks_only_named_fields() {
        let phone = Phone {
            friendly_name: "hall".into(),
            owner: "ana".into(),
            pin: Some(1234),
            ..Phone::default()
        };

        let rename = PhoneUpdateAttributes {
            friendly_name: Some("hall".into()),
            ..PhoneUpdateAttributes::default()
        };
        assert!(applied(&phone, &rename));

        let repin = PhoneUpdateAttributes {
            pin: Some(9999),
            ..PhoneUpdateAttributes::default()
        };
        assert!(!applied(&phone, &repin));

        let set_uid = PhoneUpdateAttributes {
            uid: Some("u-1".into()),
            ..PhoneUpdateAttributes::default()
        };
        assert!(!applied(&phone, &set_uid));
    }
}
