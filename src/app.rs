use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use url::Url;

use crate::config;
use crate::host::{Host, Notice};
use crate::manager::Manager;
use crate::storage::{self, CustomInstance};
use crate::transfer::FsFileAccess;

pub const USAGE: &str = "tube-instances - manage API instances and the account session.

Usage: tube-instances [--config PATH] <command>

Commands:
  choices                     List public and custom instances
  custom list                 List custom instances
  custom add <name> <url>     Register a custom instance
  custom remove <url>         Remove a custom instance
  custom clear                Remove all custom instances
  use <url>                   Select the default instance
  auth-instance <url>         Select the instance used for the account
  auth-toggle <on|off>        Use a separate instance for the account
  status                      Show the selected instances and session
  login <user> <password>     Log in on the auth instance
  register <user> <password>  Create an account on the auth instance
  logout                      End the session
  delete-account <password>   Delete the account and end the session
  import <file>               Subscribe to the channels in a NewPipe export
  export <file>               Write subscriptions as a NewPipe export

Flags:
  --config PATH               Read configuration from PATH
  --version, -V               Show version and exit
  --help,    -h               Show this help message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Choices,
    CustomList,
    CustomAdd { name: String, url: String },
    CustomRemove { url: String },
    CustomClear,
    Use { url: String },
    AuthInstance { url: String },
    AuthToggle(bool),
    Status,
    Login { username: String, password: String },
    Register { username: String, password: String },
    Logout,
    DeleteAccount { password: String },
    Import { file: String },
    Export { file: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config_file: Option<PathBuf>,
    pub command: Command,
}

pub fn parse_args<I>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = String>,
{
    let mut config_file = None;
    let mut words = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().context("--config requires a path")?;
            config_file = Some(PathBuf::from(path));
        } else if let Some(path) = arg.strip_prefix("--config=") {
            config_file = Some(PathBuf::from(path));
        } else {
            words.push(arg);
        }
    }

    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    let command = match words.as_slice() {
        ["choices"] => Command::Choices,
        ["custom", "list"] | ["custom"] => Command::CustomList,
        ["custom", "add", name, url] => Command::CustomAdd {
            name: name.to_string(),
            url: url.to_string(),
        },
        ["custom", "remove", url] => Command::CustomRemove {
            url: url.to_string(),
        },
        ["custom", "clear"] => Command::CustomClear,
        ["use", url] => Command::Use {
            url: checked_url(url)?,
        },
        ["auth-instance", url] => Command::AuthInstance {
            url: checked_url(url)?,
        },
        ["auth-toggle", value] => Command::AuthToggle(parse_switch(value)?),
        ["status"] => Command::Status,
        ["login", username, password] => Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        },
        ["register", username, password] => Command::Register {
            username: username.to_string(),
            password: password.to_string(),
        },
        ["logout"] => Command::Logout,
        ["delete-account", password] => Command::DeleteAccount {
            password: password.to_string(),
        },
        ["import", file] => Command::Import {
            file: file.to_string(),
        },
        ["export", file] => Command::Export {
            file: file.to_string(),
        },
        [] => bail!("no command given, see --help"),
        other => bail!("unrecognized command: {}", other.join(" ")),
    };

    Ok(Invocation {
        config_file,
        command,
    })
}

fn checked_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw).with_context(|| format!("invalid instance url {raw:?}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("instance url must use http or https: {raw}");
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn parse_switch(value: &str) -> Result<bool> {
    match value {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => bail!("expected on or off, got {value:?}"),
    }
}

/// Host for the command line: notices go to stdout. Errors also come back
/// to `main` as the command's result and are printed there.
struct ConsoleHost;

impl Host for ConsoleHost {
    fn recreate(&self) {
        log::debug!("endpoints changed, state reloaded on next access");
    }

    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Error(message) => log::debug!("transfer failed: {message}"),
            _ => println!("{notice}"),
        }
    }
}

pub fn run(invocation: Invocation) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: invocation.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;

    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?,
    );
    let mut manager = Manager::open(&cfg, store, Arc::new(ConsoleHost))?;

    execute(&mut manager, invocation.command)?;
    manager.close()
}

fn execute(manager: &mut Manager, command: Command) -> Result<()> {
    match command {
        Command::Choices => {
            let default_url = manager.state().default_url.clone();
            for choice in manager.registry().build_choices()? {
                let marker = if choice.api_url == default_url { '*' } else { ' ' };
                println!("{marker} {}\t{}", choice.display_name, choice.api_url);
            }
        }
        Command::CustomList => {
            for instance in manager.registry().list_custom()? {
                println!("{}\t{}", instance.name, instance.api_url);
            }
        }
        Command::CustomAdd { name, url } => {
            let added = manager
                .registry()
                .add_custom(CustomInstance::new(name, url))?;
            println!("Added {}\t{}", added.name, added.api_url);
        }
        Command::CustomRemove { url } => {
            if !manager.registry().remove_custom(&url)? {
                bail!("no custom instance with url {url}");
            }
            println!("Removed {url}");
        }
        Command::CustomClear => {
            manager.registry().clear_all()?;
            println!("Cleared custom instances");
        }
        Command::Use { url } => manager.select_default_instance(&url)?,
        Command::AuthInstance { url } => manager.select_auth_instance(&url)?,
        Command::AuthToggle(enabled) => manager.set_auth_instance_enabled(enabled)?,
        Command::Status => {
            let state = manager.state();
            println!("default instance: {}", state.default_url);
            println!("auth instance:    {}", state.auth_url);
            println!(
                "separate auth:    {}",
                if state.auth_enabled { "on" } else { "off" }
            );
            println!(
                "logged in:        {}",
                if state.is_logged_in() { "yes" } else { "no" }
            );
        }
        Command::Login { username, password } => manager.request_login(&username, &password)?,
        Command::Register { username, password } => {
            manager.request_register(&username, &password)?
        }
        Command::Logout => manager.request_logout()?,
        Command::DeleteAccount { password } => manager.request_delete_account(&password)?,
        Command::Import { file } => {
            manager.import_subscriptions(&FsFileAccess, Some(&file))?;
        }
        Command::Export { file } => {
            manager.export_subscriptions(&FsFileAccess, Some(&file))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn parses_config_flag_anywhere() {
        let parsed = parse_args(args("custom list --config /tmp/c.yaml")).unwrap();
        assert_eq!(parsed.config_file, Some(PathBuf::from("/tmp/c.yaml")));
        assert_eq!(parsed.command, Command::CustomList);

        let parsed = parse_args(args("--config=/tmp/d.yaml status")).unwrap();
        assert_eq!(parsed.config_file, Some(PathBuf::from("/tmp/d.yaml")));
        assert_eq!(parsed.command, Command::Status);
    }

    #[test]
    fn parses_selection_commands() {
        assert_eq!(
            parse_args(args("use https://api.example/")).unwrap().command,
            Command::Use {
                url: "https://api.example".into()
            }
        );
        assert_eq!(
            parse_args(args("auth-toggle off")).unwrap().command,
            Command::AuthToggle(false)
        );
        assert!(parse_args(args("auth-toggle maybe")).is_err());
        assert!(parse_args(args("use not-a-url")).is_err());
    }

    #[test]
    fn rejects_unknown_and_empty() {
        assert!(parse_args(args("")).is_err());
        assert!(parse_args(args("custom add onlyname")).is_err());
        assert!(parse_args(args("--config")).is_err());
    }
}
