//! GitHub token discovery from the user's netrc file.
//!
//! The lookup is a convenience: a missing or unusable file simply means no
//! token, and the caller falls back to prompting. Nothing here ever fails
//! hard.

use std::fs;
use std::path::PathBuf;

const GITHUB_HOST: &str = "github.com";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Keyword {
    Machine,
    Login,
    Password,
    Account,
    Macdef,
}

fn keyword(word: &str) -> Option<Keyword> {
    match word {
        "machine" => Some(Keyword::Machine),
        "login" => Some(Keyword::Login),
        "password" => Some(Keyword::Password),
        "account" => Some(Keyword::Account),
        "macdef" => Some(Keyword::Macdef),
        _ => None,
    }
}

/// Looks for a GitHub personal access token in `~/.netrc` (`~/_netrc` on
/// Windows). Returns None when the file is absent, unreadable, or holds no
/// usable entry.
pub fn find_github_token() -> Option<String> {
    let path = netrc_path()?;
    let text = fs::read_to_string(&path).ok()?;
    let token = scan(&text);
    if token.is_some() {
        tracing::debug!("Found GitHub token in {}", path.display());
    }
    token
}

fn netrc_path() -> Option<PathBuf> {
    let file_name = if cfg!(windows) { "_netrc" } else { ".netrc" };
    dirs::home_dir().map(|home| home.join(file_name))
}

/// Word-at-a-time netrc scan. A `machine github.com` entry arms the
/// scanner; the next `password` while armed is the candidate token and is
/// only accepted as exactly 40 hex characters (the classic GitHub PAT
/// shape). Any other password, another machine, or the `default` section
/// disarms it; a later github.com entry may re-arm.
fn scan(text: &str) -> Option<String> {
    let mut armed = false;
    let mut pending: Option<Keyword> = None;
    let mut word = String::new();

    // Trailing newline so the final word is flushed even when the file
    // does not end with one
    for ch in text.chars().chain(std::iter::once('\n')) {
        match ch {
            '\r' => continue,
            ' ' | '\t' | '\n' => {
                if word.is_empty() {
                    continue;
                }

                match pending.take() {
                    Some(Keyword::Machine) => armed = word == GITHUB_HOST,
                    Some(Keyword::Password) => {
                        if armed {
                            let re = regex::Regex::new(r"^[0-9a-fA-F]{40}$").unwrap();
                            if re.is_match(&word) {
                                return Some(word);
                            }
                            armed = false;
                        }
                    }
                    Some(_) => {}
                    None => {
                        if let Some(kw) = keyword(&word) {
                            pending = Some(kw);
                        } else if word == "default" {
                            armed = false;
                        }
                    }
                }

                word.clear();
            }
            _ => word.push(ch),
        }
    }

    None
}
