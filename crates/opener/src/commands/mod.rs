//! Command dispatch: bridges CLI args -> core Commands -> output formatting.

pub mod config_cmd;
pub mod gates;
pub mod phones;
pub mod session;
pub mod status;
pub mod util;

use crate::cli::Command;
use crate::error::CliError;

use self::session::Session;

/// Dispatch a store-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, session: &Session) -> Result<(), CliError> {
    match cmd {
        Command::Gates(args) => gates::handle(session, args).await,
        Command::Phones(args) => phones::handle(session, args).await,
        Command::Status => status::handle(session),
        // Config and Completions are handled before a session is opened
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "command does not use the store".into(),
        )),
    }
}
