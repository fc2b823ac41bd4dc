//! Console commands understood by the host.

use swiftshare_session::room::sanitize;
use swiftshare_session::{DisplayName, FileManifestEntry, RoomId};

/// One line of console input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `/name <display name>`
    Name(DisplayName),
    /// `/file <name> <url> <size> [key]`
    File(FileManifestEntry),
    /// `/text`
    Text,
    /// `/files`
    Files,
    /// `/who`
    Who,
    /// `/room <room-id>`
    Room(RoomId),
    /// `/quit`
    Quit,
    /// Anything not starting with `/`: typed into the document
    Type(String),
}

const USAGE: &str = "commands: /name <name>, /file <name> <url> <size> [key], /text, /files, /who, /room <id>, /quit";

pub fn usage() -> &'static str {
    USAGE
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Type(line.to_string()));
        };

        let (verb, args) = rest
            .split_once(char::is_whitespace)
            .map(|(v, a)| (v, a.trim()))
            .unwrap_or((rest.trim(), ""));

        match verb {
            "name" => DisplayName::parse(args)
                .map(Self::Name)
                .ok_or_else(|| "usage: /name <display name>".to_string()),
            "file" => parse_file(args).map(Self::File),
            "text" => Ok(Self::Text),
            "files" => Ok(Self::Files),
            "who" => Ok(Self::Who),
            "room" => RoomId::parse(&sanitize(args))
                .map(Self::Room)
                .map_err(|e| e.to_string()),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '/{other}'; {USAGE}")),
        }
    }
}

fn parse_file(args: &str) -> Result<FileManifestEntry, String> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let [name, url, size, rest @ ..] = parts.as_slice() else {
        return Err("usage: /file <name> <url> <size> [key]".to_string());
    };
    let size: u64 = size
        .parse()
        .map_err(|_| format!("invalid size '{size}', expected bytes"))?;
    let key = rest.first().copied().unwrap_or(*name);
    Ok(FileManifestEntry::new(*name, *url, size, key))
}
