//! Operator console on stdin.
//!
//! Stands in for the touchscreen: each line is one command. Under
//! simulation the console also drives the simulated door and scripts the
//! purchase server.

use anyhow::{Context, bail};
use stockbox_flow::{DispatcherHandle, SelectionResult, SessionSnapshot};
use stockbox_hardware::simulated::SimulatedDoorHandle;
use stockbox_hardware::{DoorState, HardwareManager};
use stockbox_network::{AuthorizationStatus, PendingCause, ScriptedAuthorizer};
use stockbox_storage::{Database, SqliteTelemetryRepository, TelemetryRepository};
use tokio::sync::mpsc;
use tracing::debug;

const DEFAULT_HISTORY: i64 = 20;

const HELP: &str = "\
commands:
  select N        buy from level N
  touch           touch the screen
  reset           abort the current purchase
  spin            run the dispensing spindle
  status          show the current session
  health          check every device
  history [N]     last N transitions (default 20)
  open | close    move the simulated door
  valid | invalid | pending [network|server]
                  queue the next purchase server answer (simulation)
  help            this text
  quit            shut down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Select(u16),
    Touch,
    Reset,
    Spin,
    Status,
    Health,
    History(i64),
    Door(DoorState),
    Answer(AuthorizationStatus),
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let argument = words.next();
        if words.next().is_some() {
            bail!("too many arguments to '{}'", verb);
        }

        let command = match (verb.to_ascii_lowercase().as_str(), argument) {
            ("select", Some(level)) => Self::Select(
                level
                    .parse()
                    .with_context(|| format!("'{}' is not a level number", level))?,
            ),
            ("select", None) => bail!("usage: select N"),
            ("touch", None) => Self::Touch,
            ("reset", None) => Self::Reset,
            ("spin", None) => Self::Spin,
            ("status", None) => Self::Status,
            ("health", None) => Self::Health,
            ("history", None) => Self::History(DEFAULT_HISTORY),
            ("history", Some(count)) => {
                let count: i64 = count
                    .parse()
                    .with_context(|| format!("'{}' is not a count", count))?;
                if count <= 0 {
                    bail!("history count must be positive");
                }
                Self::History(count)
            }
            ("open", None) => Self::Door(DoorState::Open),
            ("close", None) => Self::Door(DoorState::Closed),
            ("valid", None) => Self::Answer(AuthorizationStatus::valid()),
            ("invalid", None) => Self::Answer(AuthorizationStatus::Invalid),
            ("pending", None) => {
                Self::Answer(AuthorizationStatus::Pending(PendingCause::AwaitingPayment))
            }
            ("pending", Some("network")) => {
                Self::Answer(AuthorizationStatus::Pending(PendingCause::NetworkUnreachable))
            }
            ("pending", Some("server")) => {
                Self::Answer(AuthorizationStatus::Pending(PendingCause::ServerError))
            }
            ("help" | "?", None) => Self::Help,
            ("quit" | "exit", None) => Self::Quit,
            (verb, Some(argument)) => bail!("unexpected argument '{}' to '{}'", argument, verb),
            (verb, None) => bail!("unknown command '{}', try 'help'", verb),
        };
        Ok(Some(command))
    }
}

/// Controls only available when the kiosk runs simulated.
pub struct Simulation {
    pub door: SimulatedDoorHandle,
    pub script: ScriptedAuthorizer,
}

pub struct Console {
    pub handle: DispatcherHandle,
    pub hardware: HardwareManager,
    pub storage: Option<Database>,
    pub simulation: Option<Simulation>,
}

impl Console {
    /// Process lines until `quit` or end of input.
    pub async fn run(&self, mut lines: mpsc::Receiver<String>) -> anyhow::Result<()> {
        println!("{}", HELP);
        while let Some(line) = lines.recv().await {
            match ConsoleCommand::parse(&line) {
                Ok(Some(ConsoleCommand::Quit)) => return Ok(()),
                Ok(Some(command)) => self.execute(command).await?,
                Ok(None) => {}
                Err(e) => println!("{:#}", e),
            }
        }
        debug!("Console input closed");
        Ok(())
    }

    async fn execute(&self, command: ConsoleCommand) -> anyhow::Result<()> {
        match command {
            ConsoleCommand::Select(level) => {
                let result = self
                    .handle
                    .select_level(level)
                    .await
                    .context("dispatcher stopped")?;
                match result {
                    SelectionResult::Accepted(session) => {
                        println!("level {} selected, session {}", level, session)
                    }
                    SelectionResult::Busy => println!("busy, another purchase is in progress"),
                    SelectionResult::Asleep => println!("asleep, touch the screen first"),
                    SelectionResult::InvalidLevel => println!("no level {}", level),
                }
            }
            ConsoleCommand::Touch => self.handle.touch().await.context("dispatcher stopped")?,
            ConsoleCommand::Reset => self.handle.reset().await.context("dispatcher stopped")?,
            ConsoleCommand::Spin => self
                .handle
                .request_spin()
                .await
                .context("dispatcher stopped")?,
            ConsoleCommand::Status => println!("{}", describe(&self.handle.current())),
            ConsoleCommand::Health => {
                let report = self.hardware.health_check().await;
                for record in &report.devices {
                    println!(
                        "{:<12} connected={} fallback={} failures={}",
                        record.kind.to_string(),
                        record.connected,
                        record.using_fallback,
                        record.consecutive_failures
                    );
                }
            }
            ConsoleCommand::History(count) => match &self.storage {
                Some(db) => {
                    let rows = SqliteTelemetryRepository::new(db.pool().clone())
                        .recent_transitions(count)
                        .await
                        .context("failed to read transition history")?;
                    if rows.is_empty() {
                        println!("no transitions recorded");
                    }
                    for row in rows.iter().rev() {
                        println!("{}", row);
                    }
                }
                None => println!("storage is disabled"),
            },
            ConsoleCommand::Door(state) => match &self.simulation {
                Some(simulation) => {
                    simulation.door.set(state);
                    println!("door {}", state);
                }
                None => println!("the door can only be moved under --simulate"),
            },
            ConsoleCommand::Answer(status) => match &self.simulation {
                Some(simulation) => {
                    println!("next purchase check answers {:?}", status);
                    simulation.script.push(status);
                }
                None => println!("purchase answers can only be scripted under --simulate"),
            },
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => {}
        }
        Ok(())
    }
}

fn describe(snapshot: &SessionSnapshot) -> String {
    let mut text = format!("{}: {}", snapshot.state, snapshot.message);
    if let Some(level) = snapshot.level {
        text.push_str(&format!("\n  level {}", level));
    }
    if let Some(session) = &snapshot.session_id {
        text.push_str(&format!("\n  session {}", session));
    }
    if let Some(remaining) = snapshot.remaining {
        text.push_str(&format!(
            "\n  timer {}s left",
            remaining.as_secs_f32().ceil() as u64
        ));
    }
    let stats = &snapshot.statistics;
    text.push_str(&format!(
        "\n  completed {} / failed {} / network incidents {} / server incidents {}",
        stats.completed_purchases,
        stats.failed_purchases,
        stats.network_incidents,
        stats.server_incidents
    ));
    if !snapshot.degraded.is_empty() {
        let devices: Vec<String> = snapshot.degraded.iter().map(|kind| kind.to_string()).collect();
        text.push_str(&format!("\n  simulated: {}", devices.join(", ")));
    }
    text
}

/// Read stdin on a plain thread so a pending read never blocks shutdown.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;
    use stockbox_flow::{PurchaseState, Statistics};

    #[rstest]
    #[case("select 3", ConsoleCommand::Select(3))]
    #[case("  SELECT   10 ", ConsoleCommand::Select(10))]
    #[case("touch", ConsoleCommand::Touch)]
    #[case("reset", ConsoleCommand::Reset)]
    #[case("spin", ConsoleCommand::Spin)]
    #[case("history", ConsoleCommand::History(DEFAULT_HISTORY))]
    #[case("history 5", ConsoleCommand::History(5))]
    #[case("open", ConsoleCommand::Door(DoorState::Open))]
    #[case("close", ConsoleCommand::Door(DoorState::Closed))]
    #[case("invalid", ConsoleCommand::Answer(AuthorizationStatus::Invalid))]
    #[case(
        "pending network",
        ConsoleCommand::Answer(AuthorizationStatus::Pending(PendingCause::NetworkUnreachable))
    )]
    #[case("exit", ConsoleCommand::Quit)]
    fn test_parse(#[case] line: &str, #[case] expected: ConsoleCommand) {
        assert_eq!(ConsoleCommand::parse(line).unwrap(), Some(expected));
    }

    #[rstest]
    #[case("select")]
    #[case("select three")]
    #[case("select 1 2")]
    #[case("history 0")]
    #[case("touch now")]
    #[case("pending later")]
    #[case("dance")]
    fn test_parse_rejects(#[case] line: &str) {
        assert!(ConsoleCommand::parse(line).is_err());
    }

    #[test]
    fn test_blank_line_is_ignored() {
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_describe_idle() {
        let text = describe(&SessionSnapshot::default());
        assert!(text.starts_with("Idle: Select a product"));
        assert!(text.contains("completed 0 / failed 0"));
        assert!(!text.contains("session"));
    }

    #[test]
    fn test_describe_active_session() {
        let snapshot = SessionSnapshot {
            state: PurchaseState::DoorUnlocked,
            level: Some(stockbox_core::Level::new(4).unwrap()),
            remaining: Some(Duration::from_millis(12_300)),
            statistics: Statistics {
                completed_purchases: 7,
                ..Statistics::default()
            },
            message: "Open compartment 4".to_string(),
            ..SessionSnapshot::default()
        };
        let text = describe(&snapshot);
        assert!(text.contains("level 4"));
        assert!(text.contains("timer 13s left"));
        assert!(text.contains("completed 7"));
    }
}
