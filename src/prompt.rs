//! Terminal prompts. Everything here assumes an attended terminal; callers
//! check `user_attended` first so piped and scripted runs never block.

use anyhow::Result;
use console::Term;

pub fn user_attended() -> bool {
    console::user_attended()
}

/// Asks a yes/no question, with a default used for an empty reply. Keeps
/// asking until the reply is recognizable.
pub fn confirm_default(question: &str, default: bool) -> Result<bool> {
    let term = Term::stdout();
    let hint = if default { "[Y/n]" } else { "[y/N]" };

    loop {
        term.write_str(&format!("{} {} ", question, hint))?;
        let reply = term.read_line()?;

        match reply.trim().to_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => term.write_line("Please answer yes or no")?,
        }
    }
}

/// Prompts for a secret without echoing it. An empty reply means the user
/// declined to supply one.
pub fn read_token(question: &str) -> Result<Option<String>> {
    let term = Term::stdout();
    term.write_str(&format!("{}: ", question))?;

    let token = term.read_secure_line()?;
    let token = token.trim().to_string();

    if token.is_empty() {
        Ok(None)
    } else {
        Ok(Some(token))
    }
}
