//! Keyring command: the credential-store utility.

use std::io::{self, BufRead};

use anyhow::{Context, Result};
use clap::Subcommand;

use nodes::{CredentialStore, KeyringStore};

#[derive(Subcommand)]
pub enum Action {
    /// Print the secret stored for (service, user).
    Get { service: String, user: String },
    /// Store a secret; read from stdin when not given.
    Set {
        service: String,
        user: String,
        password: Option<String>,
    },
    /// Delete the secret stored for (service, user).
    Del { service: String, user: String },
}

pub fn run(action: Action) -> Result<()> {
    let store = KeyringStore;
    match action {
        Action::Get { service, user } => {
            println!("{}", store.get(&service, &user)?);
        }
        Action::Set {
            service,
            user,
            password,
        } => {
            let password = match password {
                Some(p) => p,
                None => read_line().context("cannot read the password from stdin")?,
            };
            store.set(&service, &user, &password)?;
            println!("Done");
        }
        Action::Del { service, user } => {
            store.delete(&service, &user)?;
            println!("Done");
        }
    }
    Ok(())
}

fn read_line() -> io::Result<String> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
