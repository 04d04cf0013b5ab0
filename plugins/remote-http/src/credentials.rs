//! Remote-management credentials cached for the life of the process.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use fleet_lifecycle::{ContainerRef, CredentialStore, Credentials};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Credentials seeded from the command line and, when interactive,
/// re-entered by the operator after a rejection.
#[derive(Debug, Default)]
pub struct PromptingCredentials {
    cached: Mutex<Option<Credentials>>,
    interactive: bool,
}

impl PromptingCredentials {
    pub fn new(initial: Option<Credentials>, interactive: bool) -> Self {
        Self {
            cached: Mutex::new(initial),
            interactive,
        }
    }
}

#[async_trait]
impl CredentialStore for PromptingCredentials {
    fn get(&self) -> Option<Credentials> {
        self.cached.lock().clone()
    }

    async fn prompt(&self, container: &ContainerRef) -> Option<Credentials> {
        if !self.interactive {
            debug!(container = %container, "not interactive, skipping credential prompt");
            return None;
        }
        let name = container.name.clone();
        let answer = tokio::task::spawn_blocking(move || {
            let stdin = io::stdin();
            read_credentials(&mut stdin.lock(), &mut io::stderr(), &name, |_| {
                read_hidden()
            })
        })
        .await;

        match answer {
            Ok(Ok(creds)) => {
                *self.cached.lock() = creds.clone();
                creds
            }
            Ok(Err(err)) => {
                warn!(error = %err, "failed to read credentials");
                None
            }
            Err(err) => {
                warn!(error = %err, "credential prompt task failed");
                None
            }
        }
    }

    fn clear(&self) {
        self.cached.lock().take();
    }
}

/// Read a user line from `input`, then the password through
/// `read_password`. An empty user means the operator declined.
fn read_credentials<R, W, P>(
    input: &mut R,
    prompt: &mut W,
    container: &str,
    read_password: P,
) -> io::Result<Option<Credentials>>
where
    R: BufRead,
    W: Write,
    P: FnOnce(&mut R) -> io::Result<String>,
{
    write!(prompt, "Remote user for container {container}: ")?;
    prompt.flush()?;
    let mut user = String::new();
    input.read_line(&mut user)?;
    let user = user.trim();
    if user.is_empty() {
        return Ok(None);
    }

    write!(prompt, "Password for {user}: ")?;
    prompt.flush()?;
    let password = read_password(input)?;
    writeln!(prompt)?;
    Ok(Some(Credentials::new(user, password)))
}

/// Read one line from the terminal with echo turned off.
fn read_hidden() -> io::Result<String> {
    terminal::enable_raw_mode()?;
    let password = read_keys();
    terminal::disable_raw_mode()?;
    password
}

fn read_keys() -> io::Result<String> {
    let mut password = String::new();
    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }
        match code {
            KeyCode::Enter => return Ok(password),
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "password entry interrupted",
                ));
            }
            KeyCode::Char(c) => password.push(c),
            KeyCode::Backspace => {
                password.pop();
            }
            _ => {}
        }
    }
}
