//! Interactive console host: one active session driven from stdin.

use std::error::Error;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use swiftshare_session::{
    ConnectionStatus, Endpoint, FileIdentityStore, HeadlessSurface, RoomId, Session,
    SessionController, SessionEnv, TransportConfig, WebsocketConnector,
};

use crate::command::{usage, Command};

pub type HostResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Last values printed to the console, so only changes are reported.
#[derive(Default)]
struct Shown {
    status: Option<ConnectionStatus>,
    peers: usize,
    files: usize,
}

impl Shown {
    fn report(&mut self, session: &Session) {
        let status = session.status();
        if self.status != Some(status) {
            self.status = Some(status);
            let note = if session.is_editable() { "" } else { " (read-only)" };
            println!("[{}] {status}{note}", session.room());
        }

        let peers = session.presence().count();
        if peers != self.peers {
            self.peers = peers;
            println!("[{}] {peers} online", session.room());
        }

        let files = session.files();
        if files.len() > self.files {
            for entry in &files[self.files..] {
                println!("[{}] shared {} ({})", session.room(), entry.name, entry.display_size());
            }
        }
        self.files = files.len();
    }
}

pub async fn run(room: Option<RoomId>) -> HostResult {
    let endpoint = Endpoint::from_env()?;
    info!("Using endpoint {}", endpoint.base());

    let surface = Arc::new(HeadlessSurface::new());
    let env = SessionEnv {
        connector: Arc::new(WebsocketConnector::new(TransportConfig::new(endpoint))),
        identity: Arc::new(FileIdentityStore::default_location()),
        surface: surface.clone(),
    };

    let room = room.unwrap_or_else(RoomId::generate);
    host(env, &surface, room, BufReader::new(tokio::io::stdin())).await
}

/// Run one console session over `input`. The active session is closed on
/// every exit, errors included.
pub async fn host<R>(
    env: SessionEnv,
    surface: &HeadlessSurface,
    room: RoomId,
    input: R,
) -> HostResult
where
    R: AsyncBufRead + Unpin,
{
    let mut controller = SessionController::new(env);
    let result = drive(&mut controller, surface, room, input).await;
    controller.close();
    info!("Bye");
    result
}

async fn drive<R>(
    controller: &mut SessionController,
    surface: &HeadlessSurface,
    room: RoomId,
    input: R,
) -> HostResult
where
    R: AsyncBufRead + Unpin,
{
    controller.open(room, None)?;
    println!("{}", usage());

    let mut shown = Shown::default();
    let mut lines = input.lines();

    loop {
        let Some(session) = controller.active_mut() else {
            break;
        };
        shown.report(session);

        // A session that gave up has no event stream left to wait on.
        let live = session.is_live();
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = session.next_event(), if live => continue,
        };

        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Room(room) => {
                controller.open(room, None)?;
                shown = Shown::default();
            }
            command => {
                if let Some(session) = controller.active_mut() {
                    execute(session, surface, command);
                }
            }
        }
    }

    Ok(())
}

fn execute(session: &mut Session, surface: &HeadlessSurface, command: Command) {
    match command {
        Command::Name(name) => match session.set_local_display_name(name.clone()) {
            Ok(()) => println!("you are now {name}"),
            Err(e) => warn!("Cannot rename: {e}"),
        },
        Command::File(entry) => {
            println!("sharing {} ({})", entry.name, entry.display_size());
            session.add_file(entry);
        }
        Command::Text => println!("{}", session.get_snapshot_text()),
        Command::Files => {
            let files = session.files();
            if files.is_empty() {
                println!("no files shared yet");
            }
            for entry in files {
                println!("{}  {}  {}", entry.name, entry.display_size(), entry.url);
            }
        }
        Command::Who => {
            for entry in session.presence().entries() {
                let you = if entry.is_local { " (you)" } else { "" };
                println!("{} {}{you}", entry.color, entry.name);
            }
        }
        Command::Type(text) => {
            if !surface.type_text(&format!("{text}\n")) {
                println!("read-only until the room is synced");
            }
        }
        Command::Quit | Command::Room(_) => {}
    }
}
