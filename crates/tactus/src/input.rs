use std::io::{self, BufRead};
use std::thread;

use tactus_core::MetronomeCommand;
use tokio::sync::mpsc;

pub const HELP: &str = "\
Commands (press Enter after each):
  <space> or t   start/stop
  + / -          tempo up/down by 1 BPM (+5, -10 for bigger steps)
  b <bpm>        set tempo
  n <beats>      set beats per measure (1-15)
  d <value>      set beat value (2, 4, 8, 16)
  ?              show state
  q              quit";

/// What a line typed at the prompt asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Command(MetronomeCommand),
    Help,
    Quit,
    Invalid(String),
    Empty,
}

pub fn parse_line(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return if line.contains(' ') {
            Input::Command(MetronomeCommand::Toggle)
        } else {
            Input::Empty
        };
    }

    let mut parts = line.split_whitespace();
    let head = parts.next().unwrap_or_default();
    let arg = parts.next();

    match (head, arg) {
        ("t" | "toggle", None) => Input::Command(MetronomeCommand::Toggle),
        ("q" | "quit", None) => Input::Quit,
        ("h" | "help", None) => Input::Help,
        ("?", None) => Input::Command(MetronomeCommand::QueryState),
        ("b", Some(value)) => match value.parse() {
            Ok(tempo_bpm) => Input::Command(MetronomeCommand::SetTempo { tempo_bpm }),
            Err(_) => Input::Invalid(format!("not a tempo: {}", value)),
        },
        ("n", Some(value)) => match value.parse() {
            Ok(numerator) => Input::Command(MetronomeCommand::SetNumerator { numerator }),
            Err(_) => Input::Invalid(format!("not a beat count: {}", value)),
        },
        ("d", Some(value)) => match value.parse() {
            Ok(denominator) => Input::Command(MetronomeCommand::SetDenominator { denominator }),
            Err(_) => Input::Invalid(format!("not a beat value: {}", value)),
        },
        (nudge, None) if nudge.starts_with(['+', '-']) => parse_nudge(nudge),
        _ => Input::Invalid(format!("unknown command: {}", line.trim())),
    }
}

fn parse_nudge(text: &str) -> Input {
    let (sign, amount) = text.split_at(1);
    let amount = if amount.is_empty() {
        Ok(1)
    } else {
        amount.parse::<i16>()
    };

    match amount {
        Ok(amount) => {
            let delta_bpm = if sign == "-" {
                amount.saturating_neg()
            } else {
                amount
            };
            Input::Command(MetronomeCommand::NudgeTempo { delta_bpm })
        }
        Err(_) => Input::Invalid(format!("not a tempo step: {}", text)),
    }
}

/// Read commands from stdin on a dedicated thread until `q` or end of input.
pub fn spawn_reader(
    command_tx: mpsc::UnboundedSender<MetronomeCommand>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("tactus-input".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::error!("Failed to read input: {}", e);
                        break;
                    }
                };

                let command = match parse_line(&line) {
                    Input::Command(command) => command,
                    Input::Quit => MetronomeCommand::Shutdown,
                    Input::Help => {
                        println!("{}", HELP);
                        continue;
                    }
                    Input::Invalid(message) => {
                        println!("{} (h for help)", message);
                        continue;
                    }
                    Input::Empty => continue,
                };

                let quit = command == MetronomeCommand::Shutdown;
                if command_tx.send(command).is_err() || quit {
                    break;
                }
            }
            log::debug!("Input thread exiting");
        })
}
