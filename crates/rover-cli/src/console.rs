use anyhow::{bail, Context, Result};
use rover_proto::Vector2;

/// One line typed on the drive console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCmd {
    Connect(String),
    Disconnect,
    Left(Vector2),
    Right(Vector2),
    Drive(Vector2),
    Release,
    Swap(bool),
    Sweep(bool),
    Dodge(bool),
    Sound(bool),
    Status,
    Stats,
    Devices,
    Help,
    Quit,
}

pub const HELP: &str = "\
connect <id|name>   open the link to a paired rover
disconnect          close the link
left <x> <y>        left stick (throttle unless swapped)
right <x> <y>       right stick (steering unless swapped)
drive <x> <y>       set the combined drive vector
release             recentre both sticks
swap|sweep|dodge|sound on|off
status | stats | devices | help | quit";

/// Blank lines and `#` comments yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCmd>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let cmd = match verb.as_str() {
        "connect" => match args.as_slice() {
            [dev] => ConsoleCmd::Connect(dev.to_string()),
            _ => bail!("usage: connect <id|name>"),
        },
        "disconnect" => ConsoleCmd::Disconnect,
        "left" => ConsoleCmd::Left(vector(&args)?),
        "right" => ConsoleCmd::Right(vector(&args)?),
        "drive" => ConsoleCmd::Drive(vector(&args)?),
        "release" | "stop" => ConsoleCmd::Release,
        "swap" => ConsoleCmd::Swap(toggle(&args)?),
        "sweep" => ConsoleCmd::Sweep(toggle(&args)?),
        "dodge" => ConsoleCmd::Dodge(toggle(&args)?),
        "sound" => ConsoleCmd::Sound(toggle(&args)?),
        "status" => ConsoleCmd::Status,
        "stats" => ConsoleCmd::Stats,
        "devices" => ConsoleCmd::Devices,
        "help" | "?" => ConsoleCmd::Help,
        "quit" | "exit" => ConsoleCmd::Quit,
        other => bail!("unknown command {:?} (try help)", other),
    };
    Ok(Some(cmd))
}

fn vector(args: &[&str]) -> Result<Vector2> {
    let [x, y] = args else { bail!("expected <x> <y>") };
    let x: f32 = x.parse().with_context(|| format!("bad x {:?}", x))?;
    let y: f32 = y.parse().with_context(|| format!("bad y {:?}", y))?;
    Ok(Vector2::clamped(x, y))
}

fn toggle(args: &[&str]) -> Result<bool> {
    match args {
        ["on" | "1" | "true"] => Ok(true),
        ["off" | "0" | "false"] => Ok(false),
        _ => bail!("expected on|off"),
    }
}
