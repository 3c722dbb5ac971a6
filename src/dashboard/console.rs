// console.rs
//
// Operator console. Reads menu choices from stdin on its own thread and
// forwards them to the dashboard queue as `UserAction`s.

use std::io::{stdin, stdout, BufRead, Write};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::UnboundedSender;

use crate::dashboard::app::{DashboardEvent, UserAction};

pub fn print_menu() {
    println!("\nSAM Grid Control Operator Console");
    println!("1. Set Origin");
    println!("2. Set Destination");
    println!("3. Start Mission");
    println!("4. Toggle Log Panel");
    println!("5. Show Status");
    println!("6. Retry Map Sync");
    println!("7. Save Map Snapshot");
    println!("8. Export Mission Log");
    println!("9. Exit");
    print!("Enter your choice: ");
    let _ = stdout().flush();
}

/// Maps a menu choice to an action. `prompt` asks for free text (origin or
/// destination) and returns `None` when input ended.
pub fn action_for<F>(choice: &str, mut prompt: F) -> Option<UserAction>
where
    F: FnMut(&str) -> Option<String>,
{
    match choice.trim().parse::<u32>().unwrap_or(0) {
        1 => prompt("Enter origin: ").map(UserAction::SetOrigin),
        2 => prompt("Enter destination: ").map(UserAction::SetDestination),
        3 => Some(UserAction::StartMission),
        4 => Some(UserAction::ToggleLog),
        5 => Some(UserAction::ShowStatus),
        6 => Some(UserAction::RetryMapSync),
        7 => Some(UserAction::Snapshot),
        8 => Some(UserAction::ExportLog),
        9 => Some(UserAction::Quit),
        _ => None,
    }
}

fn read_line(input: &mut impl BufRead) -> Option<String> {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// Starts the console thread. It stops after Exit, at end of input, or once
/// the dashboard queue is closed.
pub fn spawn_console(events: UnboundedSender<DashboardEvent>) -> JoinHandle<()> {
    thread::spawn(move || {
        let stdin = stdin();
        let mut input = stdin.lock();
        loop {
            print_menu();
            let Some(choice) = read_line(&mut input) else {
                log::debug!("console input closed");
                break;
            };
            let action = action_for(&choice, |label| {
                print!("{}", label);
                let _ = stdout().flush();
                read_line(&mut input)
            });
            let Some(action) = action else {
                println!("Invalid choice. Try again.");
                continue;
            };
            let quit = action == UserAction::Quit;
            if events.send(action.into()).is_err() || quit {
                break;
            }
        }
    })
}
