use anyhow::Result;
use clap::{Parser, Subcommand};
use roster_output::*;
use roster_state::{Commit, StoreError, StoreEvent};
use roster_types::UserId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{AppStore, EditFields, FormFields};

const SHELL_HELP: &str = r#"Commands:
  submit --name N --email E --phone P [--address A] --image FILE
  view ID            show a user's details
  edit               switch the shown user to edit mode
  save [--name N] [--email E] [--phone P] [--address A] [--image FILE]
  cancel             leave edit mode without saving
  delete ID          delete a user
  new                back to the empty form
  list               show the user list
  reload             re-read storage
  help               this text
  quit               leave the shell

Quote values containing spaces: submit --name "Ann Lee" ..."#;

#[derive(Parser)]
#[command(no_binary_name = true, disable_help_subcommand = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand)]
enum ShellCommand {
    Submit {
        #[command(flatten)]
        fields: FormFields,
    },
    View {
        id: UserId,
    },
    Edit,
    Save {
        #[command(flatten)]
        fields: EditFields,
    },
    Cancel,
    Delete {
        id: UserId,
    },
    New,
    List,
    Reload,
    Help,
    #[command(alias = "exit")]
    Quit,
}

/// What the loop does after a command succeeds.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    /// The command printed its own output.
    Continue,
    /// Show the screen again, even if nothing in the store changed.
    Redraw,
    Quit,
}

pub async fn run_shell(mut store: AppStore, json_output: bool) -> Result<()> {
    let mut events = store.subscribe();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    render(&store, json_output, &mut stdout).await?;

    loop {
        stdout.write_all(b"roster> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let tokens = match split_args(&line) {
            Ok(tokens) if tokens.is_empty() => continue,
            Ok(tokens) => tokens,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        let command = match ShellLine::try_parse_from(&tokens) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                println!("{}", e.render());
                continue;
            }
        };

        let redraw = match execute(&mut store, command).await {
            Ok(Flow::Quit) => break,
            Ok(Flow::Redraw) => true,
            Ok(Flow::Continue) => false,
            Err(e) => {
                report(&e, json_output);
                false
            }
        };

        if drain_events(&mut events) || redraw {
            render(&store, json_output, &mut stdout).await?;
        }
    }

    Ok(())
}

async fn execute(store: &mut AppStore, command: ShellCommand) -> Result<Flow, StoreError> {
    match command {
        ShellCommand::Submit { fields } => {
            let (form, image) = fields.split();
            let commit = store.submit(form, image).await?;
            if commit == Commit::Discarded {
                println!("Submission discarded: the view changed while the image was read.");
            }
        }
        ShellCommand::View { id } => {
            store.view_user(id)?;
        }
        ShellCommand::Edit => store.begin_editing()?,
        ShellCommand::Save { fields } => {
            let current = store.selected().cloned().ok_or(StoreError::NoSelection)?;
            let (form, image) = fields.apply(&current);
            let commit = store.save_edit(form, image).await?;
            if commit == Commit::Discarded {
                println!("Edit discarded: the view changed while the image was read.");
            }
        }
        ShellCommand::Cancel => store.cancel_edit()?,
        ShellCommand::Delete { id } => {
            store.delete_user(id)?;
        }
        ShellCommand::New => store.back_to_form(),
        ShellCommand::List => {
            println!("{}", format_user_table(store.users()));
            return Ok(Flow::Continue);
        }
        ShellCommand::Reload => store.reload()?,
        ShellCommand::Help => {
            println!("{}", SHELL_HELP);
            return Ok(Flow::Continue);
        }
        ShellCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Redraw)
}

fn report(error: &StoreError, json_output: bool) {
    match error.field_errors() {
        Some(errors) if json_output => println!("{}", to_json(&serde_json::json!({ "errors": errors }))),
        Some(errors) => println!("Invalid input:\n{}", format_field_errors(errors)),
        None => println!("Error: {}", error),
    }
}

/// Returns whether anything happened since the last call.
fn drain_events(events: &mut broadcast::Receiver<StoreEvent>) -> bool {
    let mut changed = false;
    loop {
        match events.try_recv() {
            Ok(event) => {
                debug!("Store event: {:?}", event);
                changed = true;
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!("Missed {} store events", skipped);
                changed = true;
            }
            Err(_) => return changed,
        }
    }
}

async fn render(store: &AppStore, json_output: bool, stdout: &mut tokio::io::Stdout) -> Result<()> {
    let screen = if json_output {
        to_json(&view_json(store.view(), store.users()))
    } else {
        format_screen(store.view(), store.users())
    };
    stdout.write_all(screen.as_bytes()).await?;
    stdout.write_all(b"\n\n").await?;
    stdout.flush().await?;
    Ok(())
}

/// Splits a command line into words. Single and double quotes group words;
/// a backslash escapes the next character outside single quotes.
pub(crate) fn split_args(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('\''), _) => current.push(c),
            (_, '\\') => match chars.next() {
                Some(escaped) => {
                    current.push(escaped);
                    in_word = true;
                }
                None => return Err("Trailing backslash".to_string()),
            },
            (Some(_), _) => current.push(c),
            (None, '\'') | (None, '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, _) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err("Unterminated quote".to_string());
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("  view 42 ").unwrap(), vec!["view", "42"]);
        assert_eq!(
            split_args(r#"submit --name "Ann Lee" --address 'Flat 2, "B"'"#).unwrap(),
            vec!["submit", "--name", "Ann Lee", "--address", "Flat 2, \"B\""]
        );
        assert_eq!(split_args(r"a\ b c").unwrap(), vec!["a b", "c"]);
        assert_eq!(split_args(r#"--address """#).unwrap(), vec!["--address", ""]);
        assert!(split_args("").unwrap().is_empty());
        assert!(split_args("say \"hi").is_err());
        assert!(split_args("oops\\").is_err());
    }

    #[test]
    fn test_parse_shell_commands() {
        let line = ShellLine::try_parse_from(["view", "17"]).unwrap();
        assert!(matches!(line.command, ShellCommand::View { id: UserId(17) }));

        let line = ShellLine::try_parse_from(["save", "--phone", "0987654321"]).unwrap();
        match line.command {
            ShellCommand::Save { fields } => {
                assert_eq!(fields.phone.as_deref(), Some("0987654321"));
                assert!(fields.name.is_none());
            }
            _ => panic!("expected save"),
        }

        let line = ShellLine::try_parse_from(["submit", "--name", "Ann"]).unwrap();
        match line.command {
            ShellCommand::Submit { fields } => {
                let (form, image) = fields.split();
                assert_eq!(form.name, "Ann");
                assert_eq!(form.phone, "");
                assert!(image.is_none());
            }
            _ => panic!("expected submit"),
        }

        assert!(ShellLine::try_parse_from(["exit"]).is_ok());
        assert!(ShellLine::try_parse_from(["frobnicate"]).is_err());
    }

    #[tokio::test]
    async fn test_execute_walks_the_views() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("me.gif");
        std::fs::write(&image, b"GIF89a....").unwrap();

        let storage =
            roster_store::LocalStorage::open(&dir.path().join("db"), "usersData", 10 * 1024 * 1024)
                .unwrap();
        let mut store = AppStore::open(storage).unwrap();
        let mut events = store.subscribe();

        let line = split_args(&format!(
            "submit --name Ann --email a@b.com --phone 1234567890 --image {}",
            image.display()
        ))
        .unwrap();
        let command = ShellLine::try_parse_from(&line).unwrap().command;
        execute(&mut store, command).await.unwrap();
        assert!(drain_events(&mut events));
        let id = store.users()[0].id;
        assert_eq!(store.view(), roster_types::ViewState::detail(id));

        execute(&mut store, ShellCommand::Edit).await.unwrap();
        let save = ShellLine::try_parse_from(["save", "--name", "Ann Lee"]).unwrap().command;
        execute(&mut store, save).await.unwrap();
        assert_eq!(store.get(id).unwrap().name, "Ann Lee");
        assert!(store.get(id).unwrap().image.starts_with("data:image/gif;base64,"));

        let bad = ShellLine::try_parse_from(["save", "--phone", "12"]).unwrap().command;
        let err = execute(&mut store, bad).await.err().unwrap();
        assert!(err.field_errors().is_some());

        drain_events(&mut events);
        execute(&mut store, ShellCommand::Delete { id }).await.unwrap();
        assert!(drain_events(&mut events));
        assert_eq!(store.view(), roster_types::ViewState::Form);
        assert!(store.is_empty());

        assert!(matches!(execute(&mut store, ShellCommand::Quit).await, Ok(Flow::Quit)));
        assert!(!drain_events(&mut events));
    }

    #[tokio::test]
    async fn test_unchanged_view_still_redraws() {
        let dir = tempfile::tempdir().unwrap();
        let storage =
            roster_store::LocalStorage::open(&dir.path().join("db"), "usersData", 10 * 1024 * 1024)
                .unwrap();
        let mut store = AppStore::open(storage).unwrap();
        let image: Box<dyn roster_form::ImageSource> =
            Box::new(roster_form::ImageBytes::new(b"GIF89a....".to_vec()));
        let form = roster_types::UserForm::new("Ann", "a@b.com", "1234567890", "");
        let id = store.submit(form, Some(image)).await.unwrap().applied().unwrap().id;

        let mut events = store.subscribe();
        let flow = execute(&mut store, ShellCommand::View { id }).await.unwrap();
        assert_eq!(flow, Flow::Redraw);
        let flow = execute(&mut store, ShellCommand::Cancel).await.unwrap();
        assert_eq!(flow, Flow::Redraw);
        assert!(!drain_events(&mut events));

        assert_eq!(execute(&mut store, ShellCommand::List).await.unwrap(), Flow::Continue);
        assert_eq!(execute(&mut store, ShellCommand::Help).await.unwrap(), Flow::Continue);
    }
}
