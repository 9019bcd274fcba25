//! Interactive console – the numbered operator menu.
//!
//! ```text
//!   1  start all sensors
//!   2  stop all sensors
//!   3  exit
//!   4  pick a sensor and publish a chosen value
//! ```
//!
//! Option 4 lists the fleet by index; `-1` cancels.  Anything that is not a
//! number prints a hint and returns to the menu.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use colored::Colorize;
use envsim_runtime::Fleet;
use tokio::runtime::Handle;

/// How often the input loop checks the shutdown flag while stdin is idle.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// What the console expects the next input line to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    Menu,
    PickSensor,
    /// Value for the sensor at this fleet index.
    EnterValue(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Console<'a> {
    fleet: &'a Fleet,
    runtime: Handle,
    prompt: Prompt,
}

impl<'a> Console<'a> {
    pub fn new(fleet: &'a Fleet, runtime: Handle) -> Self {
        Self {
            fleet,
            runtime,
            prompt: Prompt::Menu,
        }
    }

    pub fn prompt(&self) -> Prompt {
        self.prompt
    }

    /// Feed one line of operator input.
    ///
    /// Must be called from outside the Tokio runtime: fleet operations are
    /// driven to completion with [`Handle::block_on`].
    pub fn handle_line(&mut self, line: &str) -> Flow {
        let input = line.trim();
        match self.prompt {
            Prompt::Menu => self.menu(input),
            Prompt::PickSensor => {
                self.prompt = Prompt::Menu;
                match input.parse::<i64>() {
                    Ok(-1) => println!("Cancelled"),
                    Ok(i) if i >= 0 && (i as usize) < self.fleet.len() => {
                        let index = i as usize;
                        let name = self.fleet.sensors()[index].name();
                        println!("Enter value to generate for {}:", name.bold());
                        self.prompt = Prompt::EnterValue(index);
                    }
                    Ok(_) => println!("{}", "Invalid number".red()),
                    Err(_) => invalid_number(),
                }
                Flow::Continue
            }
            Prompt::EnterValue(index) => {
                self.prompt = Prompt::Menu;
                match input.parse::<f64>() {
                    Ok(value) => {
                        let sensor = &self.fleet.sensors()[index];
                        match self.runtime.block_on(sensor.generate_value(value)) {
                            Ok(()) => println!("  {} {} ← {}", "✓".green(), sensor.name(), value),
                            Err(e) => println!("{}: {}", "Could not publish".red(), e),
                        }
                    }
                    Err(_) => invalid_number(),
                }
                Flow::Continue
            }
        }
    }

    fn menu(&mut self, input: &str) -> Flow {
        match input.parse::<i64>() {
            Ok(1) => {
                let running = self.runtime.block_on(self.fleet.start_all());
                println!("Sensors started ({running}/{})", self.fleet.len());
            }
            Ok(2) => {
                self.runtime.block_on(self.fleet.stop_all());
                println!("Sensors stopped");
            }
            Ok(3) => {
                self.runtime.block_on(self.fleet.stop_all());
                println!("{}", "Exiting program...".yellow());
                return Flow::Exit;
            }
            Ok(4) => {
                println!("Select a sensor (-1 to cancel):");
                for (i, sensor) in self.fleet.sensors().iter().enumerate() {
                    println!("  {}: {}", i.to_string().cyan(), sensor.name());
                }
                self.prompt = Prompt::PickSensor;
            }
            Ok(_) => print_menu(),
            Err(_) => invalid_number(),
        }
        Flow::Continue
    }
}

pub fn print_menu() {
    println!("  Press {} to start sensors", "1".bold().cyan());
    println!("  Press {} to stop sensors", "2".bold().cyan());
    println!("  Press {} to end program", "3".bold().cyan());
    println!("  Press {} to produce specified data by specified sensor", "4".bold().cyan());
}

fn invalid_number() {
    println!("{}", "Please enter a valid number.".red());
}

/// Run the console on stdin until the operator exits, stdin closes or
/// `shutdown` is raised.
pub fn run(fleet: &Fleet, runtime: Handle, shutdown: &AtomicBool) {
    print_menu();
    let lines = spawn_stdin_reader();
    let mut console = Console::new(fleet, runtime);

    while !shutdown.load(Ordering::SeqCst) {
        match lines.recv_timeout(SHUTDOWN_POLL) {
            Ok(line) => {
                if console.handle_line(&line) == Flow::Exit {
                    shutdown.store(true, Ordering::SeqCst);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

// The reader thread blocks in `read_line`; it is left behind on exit.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        loop {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            }
        }
    });
    rx
}
