//! Pomoledger - a Pomodoro timer that keeps a ledger of focused time per task.
//!
//! Tasks, their accumulated time and session history are kept in a local
//! key-value store and survive restarts. The countdown is driven from the
//! wall clock, so it stays correct across system sleep.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

mod app;
mod clock;
mod countdown;
mod event;
mod identity;
mod ledger;
mod models;
mod notifications;
mod persistence;
mod timer;
mod view;

use app::{App, CompletionEvent};
use clock::{SharedClock, SystemClock, VisibilityWatch};
use event::{Console, EventResult};
use identity::{IdentityProvider, PublicAddressLookup};
use persistence::{KeyValueStore, MemoryStore, SqliteStore};
use timer::TimerMessage;

/// Everything the main thread reacts to.
enum Inbox {
    Line(String),
    InputClosed,
    Timer(TimerMessage),
}

/// Terminal front-end driven by the input and timer threads.
struct Pomoledger {
    app: Arc<Mutex<App>>,
    console: Console,
    inbox: Receiver<Inbox>,
    is_terminal: bool,
}

impl Pomoledger {
    fn new(app: Arc<Mutex<App>>, inbox: Receiver<Inbox>) -> Self {
        Self {
            app,
            console: Console::new(),
            inbox,
            is_terminal: io::stdout().is_terminal(),
        }
    }

    fn run(&mut self) {
        println!("{}", view::HELP);
        self.prompt();

        while let Ok(message) = self.inbox.recv() {
            match message {
                Inbox::Line(line) => {
                    if self.handle_line(&line) {
                        break;
                    }
                    self.prompt();
                }
                Inbox::InputClosed => break,
                Inbox::Timer(TimerMessage::StateChanged { title }) => {
                    self.update_title(&title);
                }
                Inbox::Timer(TimerMessage::Completed(event)) => {
                    self.handle_completion(&event);
                    self.prompt();
                }
            }
        }

        self.shutdown();
    }

    /// Returns true when the user asked to quit.
    fn handle_line(&mut self, line: &str) -> bool {
        let command = match event::parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return false,
            Err(message) => {
                println!("{}", message);
                return false;
            }
        };

        let result = {
            let Ok(mut app) = self.app.lock() else {
                log::error!("App state poisoned");
                return true;
            };
            self.console.handle(&mut app, command)
        };

        match result {
            EventResult::Quit => return true,
            EventResult::Output(text) => println!("{}", text),
            EventResult::Notice(text) => println!("! {}", text),
            EventResult::Continue => {}
        }
        false
    }

    fn handle_completion(&self, event: &CompletionEvent) {
        let notifications_enabled = match self.app.lock() {
            Ok(app) => app.settings.notifications_enabled,
            Err(_) => false,
        };

        println!();
        println!("🍅 {}", notifications::completion_body(event).replace('\n', " "));
        self.update_title("🍅");

        if notifications_enabled {
            notifications::notify_session_complete(event);
        }
    }

    fn update_title(&self, title: &str) {
        if self.is_terminal {
            print!("\x1b]0;{}\x07", title);
            let _ = io::stdout().flush();
        }
    }

    fn prompt(&self) {
        print!("> ");
        let _ = io::stdout().flush();
    }

    fn shutdown(&self) {
        match self.app.lock() {
            Ok(mut app) => app.shutdown(),
            Err(_) => log::error!("App state poisoned; ledger not saved on exit"),
        }
        self.update_title("");
    }
}

fn open_store() -> Box<dyn KeyValueStore> {
    match SqliteStore::open_default() {
        Ok(store) => Box::new(store),
        Err(e) => {
            log::error!("Failed to open database ({}); changes will not be saved", e);
            Box::new(MemoryStore::new())
        }
    }
}

fn spawn_identity_lookup<P>(app: Arc<Mutex<App>>, provider: P)
where
    P: IdentityProvider + Send + 'static,
{
    thread::spawn(move || {
        let Some(identity) = provider.lookup() else {
            log::info!("Keeping locally generated identity");
            return;
        };
        match app.lock() {
            Ok(mut app) => app.adopt_identity(identity),
            Err(_) => log::error!("App state poisoned; identity not adopted"),
        }
    });
}

fn spawn_input_reader(tx: Sender<Inbox>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(Inbox::Line(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(Inbox::InputClosed);
    });
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let clock: SharedClock = Arc::new(SystemClock);
    let store = open_store();

    // First run: start on a local identity and ask the network in the background
    let settings = persistence::load_settings(store.as_ref());
    let needs_lookup =
        settings.identity_lookup && identity::cached_identity(store.as_ref()).is_none();

    let app = Arc::new(Mutex::new(App::new(Arc::clone(&clock), store, None)));
    if needs_lookup {
        let timeout = Duration::from_millis(settings.identity_timeout_ms);
        spawn_identity_lookup(Arc::clone(&app), PublicAddressLookup::new(timeout));
    }

    let (tx, rx) = mpsc::channel();

    // Save when the process loses the foreground, catch up when it returns
    let mut watch = VisibilityWatch::new();
    let hidden_app = Arc::clone(&app);
    watch.on_hidden(move || {
        if let Ok(mut app) = hidden_app.lock() {
            app.persist();
        }
    });
    let restored_app = Arc::clone(&app);
    let restored_tx = tx.clone();
    watch.on_visibility_restored(move || {
        let completion = match restored_app.lock() {
            Ok(mut app) => app.catch_up(),
            Err(_) => None,
        };
        if let Some(event) = completion {
            let _ = restored_tx.send(Inbox::Timer(TimerMessage::Completed(event)));
        }
    });

    // Spawn timer tick thread, forwarding into the main inbox
    let (timer_tx, timer_rx) = mpsc::channel();
    let timer_app = Arc::clone(&app);
    let timer_clock = Arc::clone(&clock);
    thread::spawn(move || {
        timer::run_timer_loop(timer_app, timer_clock, watch, timer_tx);
    });
    let forward_tx = tx.clone();
    thread::spawn(move || {
        for message in timer_rx {
            if forward_tx.send(Inbox::Timer(message)).is_err() {
                return;
            }
        }
    });

    spawn_input_reader(tx);

    let mut pomoledger = Pomoledger::new(app, rx);
    pomoledger.run();

    Ok(())
}
