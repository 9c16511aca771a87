// pairchat terminal client
// Line-based harness around the session engine: type to chat, slash commands for the rest

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use pairchat::config::{self, Config, Profile};
use pairchat::media::ImageAttachment;
use pairchat::session::{ChatMessage, Command, Prompt, Stage};
use pairchat::{logging, runtime, SessionEvent, SessionView};

const INPUT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default, PartialEq)]
struct Options {
    name: Option<String>,
    interests: Option<Vec<String>>,
    video: bool,
    dev: bool,
    debug: bool,
}

impl Options {
    fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.name {
            config.identity.display_name = name.clone();
        }
        if let Some(interests) = &self.interests {
            config.identity.interests = interests.clone();
        }
        if self.video {
            config.chat.video = true;
        }
        if self.dev {
            config.signaling.profile = Profile::Development;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args);

    logging::init(options.debug)?;

    let mut config = config::load_config()?;
    options.apply(&mut config);

    println!(
        "pairchat: {} as {}{}",
        config.signaling.endpoint().host,
        config.identity.display_name,
        if config.chat.video { " (video)" } else { "" }
    );
    println!("Type /help for commands.");

    let mut client = runtime::start_session(&config)?;

    // stdin blocks, so it gets its own thread
    let (line_tx, line_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut printer = Printer::default();
    'outer: loop {
        while let Some(event) = client.try_recv_event() {
            if !printer.show(event) {
                break 'outer;
            }
        }

        match line_rx.recv_timeout(INPUT_POLL) {
            Ok(line) => match parse_line(&line) {
                LineAction::Commands(commands) => {
                    for command in commands {
                        client.send_command(command)?;
                    }
                }
                LineAction::Help => print_help(),
                LineAction::Error(message) => println!("[{}]", message),
                LineAction::Quit => break,
                LineAction::Nothing => {}
            },
            Err(RecvTimeoutError::Timeout) => {}
            // stdin closed
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    client.shutdown();
    Ok(())
}

fn parse_args(args: &[String]) -> Options {
    let mut options = Options::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--name" | "-n" => match iter.next() {
                Some(name) => options.name = Some(name.clone()),
                None => usage_error(&args[0], "--name requires a value"),
            },
            "--interests" | "-i" => match iter.next() {
                Some(list) => options.interests = Some(split_interests(list)),
                None => usage_error(&args[0], "--interests requires a value"),
            },
            "--video" => options.video = true,
            "--dev" => options.dev = true,
            "--debug" => options.debug = true,
            "--help" | "-h" => {
                print_usage(&args[0]);
                std::process::exit(0);
            }
            other => usage_error(&args[0], &format!("Unknown argument: {}", other)),
        }
    }

    options
}

fn split_interests(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn usage_error(program: &str, message: &str) -> ! {
    eprintln!("Error: {}", message);
    print_usage(program);
    std::process::exit(1);
}

fn print_usage(program: &str) {
    println!("pairchat - talk to a random stranger");
    println!();
    println!("Usage:");
    println!("  {} [options]", program);
    println!();
    println!("Options:");
    println!("  --name <name>          Name shown to your partner");
    println!("  --interests <a,b,c>    Prefer partners with these interests");
    println!("  --video                Start a video call with each partner");
    println!("  --dev                  Use the development pairing server");
    println!("  --debug                Write a debug log to {}", logging::LOG_FILE_PATH);
    println!("  --help                 Show this message");
    println!();
    println!("Settings are read from {}", config::get_config_path().display());
}

fn print_help() {
    println!("  <text>        send a message");
    println!("  /img <path>   send an image");
    println!("  /req          ask your partner for an image");
    println!("  /stop         leave the chat (asks to confirm)");
    println!("  /sure         confirm leaving");
    println!("  /new          find a new partner");
    println!("  /quit         exit");
}

#[derive(Debug, PartialEq)]
enum LineAction {
    Commands(Vec<Command>),
    Help,
    Error(String),
    Quit,
    Nothing,
}

fn parse_line(line: &str) -> LineAction {
    let line = line.trim();
    if line.is_empty() {
        return LineAction::Nothing;
    }
    if !line.starts_with('/') {
        return LineAction::Commands(vec![Command::Keystroke, Command::SendText(line.to_string())]);
    }

    let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let command = match name {
        "/stop" => Command::StopRequested,
        "/sure" => Command::ConfirmDisconnect,
        "/new" => Command::StartNew,
        "/req" => Command::RequestImage,
        "/img" if rest.is_empty() => Command::SendImage(None),
        "/img" => match ImageAttachment::from_path(Path::new(rest)) {
            Ok(image) => Command::SendImage(Some(image)),
            Err(e) => return LineAction::Error(format!("cannot read {}: {}", rest, e)),
        },
        "/help" => return LineAction::Help,
        "/quit" => return LineAction::Quit,
        other => return LineAction::Error(format!("unknown command {}", other)),
    };
    LineAction::Commands(vec![command])
}

/// Turns view snapshots into chat lines
#[derive(Default)]
struct Printer {
    last: Option<SessionView>,
    printed: usize,
}

impl Printer {
    /// Returns false once the session has stopped
    fn show(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Updated(view) => self.render(view),
            SessionEvent::Prompt(Prompt::SelectImage) => println!("[choose a file: /img <path>]"),
            SessionEvent::Error(message) => println!("[error] {}", message),
            SessionEvent::Stopped => return false,
        }
        true
    }

    fn render(&mut self, view: SessionView) {
        let previous = self.last.take();
        let partner = view.partner_name.clone();

        if previous.as_ref().map(|p| p.stage) != Some(view.stage) {
            match view.stage {
                Stage::Connecting => println!("Connecting to server..."),
                Stage::Active => println!("You're now chatting with a random stranger. Say hi!"),
                Stage::ConfirmDisconnect => println!("Really leave? /sure to confirm, or keep chatting."),
                Stage::Disconnected if view.partner_left => {
                    println!("{} has disconnected. /new for a new chat.", partner)
                }
                Stage::Disconnected if view.waiting_for_partner => {
                    println!("Looking for someone you can chat with...")
                }
                Stage::Disconnected => println!("You have disconnected. /new for a new chat."),
            }
        }

        if view.stage == Stage::Active
            && previous.as_ref().and_then(|p| p.matched_interest.as_ref()) != view.matched_interest.as_ref()
        {
            if let Some(interest) = &view.matched_interest {
                println!("You both like {}.", interest);
            }
        }

        if view.conversation.len() < self.printed {
            self.printed = view.conversation.len();
        }
        for message in &view.conversation[self.printed..] {
            println!("{}", format_message(message, view.identity.as_deref()));
        }
        self.printed = view.conversation.len();

        let was_typing = previous.as_ref().map_or(false, |p| p.partner_typing);
        if view.partner_typing && !was_typing {
            println!("{} is typing...", partner);
        }

        if view.call_status.is_some() && previous.as_ref().map(|p| &p.call_status) != Some(&view.call_status) {
            if let Some(status) = &view.call_status {
                println!("[call] {:?}", status);
            }
        }

        self.last = Some(view);
    }
}

fn format_message(message: &ChatMessage, identity: Option<&str>) -> String {
    let label = message.author_label(identity);
    match message {
        ChatMessage::Text { text, .. } => format!("{}: {}", label, text),
        ChatMessage::Image { image_data, .. } => {
            let kind = image_data
                .strip_prefix("data:")
                .and_then(|rest| rest.split(';').next())
                .unwrap_or("image");
            format!("{}: [{} image]", label, kind)
        }
        ChatMessage::ImageRequestReceived { .. } => {
            format!("{} would like an image. /img <path> to send one.", label)
        }
        ChatMessage::ImageRequestSent { .. } => "You asked for an image.".to_string(),
    }
}
